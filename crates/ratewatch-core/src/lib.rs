//! # ratewatch-core
//!
//! Quota snapshot acquisition and adaptive polling for OpenAI rate limits.
//!
//! This crate provides:
//! - Snapshot sources, scheduler, trend tracker and poll engine (`services::quota`)
//! - API key storage and Codex login detection (`credentials` module)
//! - User settings (`settings` module)
//! - Unified error handling (`error` module)

pub mod credentials;
pub mod error;
pub mod services;
pub mod settings;

// Re-exports for convenience
pub use error::{Error, Result};
pub use settings::Settings;

// Re-export commonly used types from services
pub use services::quota::{
    AccountInfo, AcquireRequest, Acquisition, AdaptiveScheduler, BurnTrend, EngineCommand,
    EngineHandle, PollEngine, PollMode, PollingConfig, PollingStatus, QuotaError,
    RemoteProbeSource, RemoteUsageClient, SessionLogSource, SessionWindow, SnapshotSource,
    TrendTracker, UsageSnapshot,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version
pub fn version() -> &'static str {
    VERSION
}

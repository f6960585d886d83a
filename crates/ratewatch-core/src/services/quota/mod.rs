//! Quota tracking module
//!
//! Periodically determines how much of an OpenAI rate limit has been used and
//! when it resets, and publishes the result as a single normalized snapshot.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ PollEngine (actor)                                      │
//! │   - AdaptiveScheduler: when to poll next                │
//! │   - TrendTracker: hourly burn and its direction         │
//! │   - watch<PollingStatus>: published state               │
//! └─────────────────────────────────────────────────────────┘
//!          │
//!          ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │ trait SnapshotSource                                    │
//! │   - acquire() -> Snapshot | NotFound | Failed           │
//! └─────────────────────────────────────────────────────────┘
//!          │
//!     ┌────┴─────────┐
//!     ▼              ▼
//! ┌──────────┐  ┌──────────────┐
//! │ OpenAI   │  │ Codex session│
//! │ probe    │  │ logs (JSONL) │
//! └──────────┘  └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use ratewatch_core::services::quota::{PollEngine, PollMode, PollingConfig};
//!
//! let handle = PollEngine::new(PollingConfig {
//!     mode: PollMode::LocalSession,
//!     ..Default::default()
//! })
//! .spawn();
//!
//! let mut updates = handle.subscribe();
//! while updates.changed().await.is_ok() {
//!     println!("{}", updates.borrow().status_text);
//! }
//! ```

pub mod types;
pub mod provider;
pub mod session_log;
pub mod remote;
pub mod scheduler;
pub mod trend;
pub mod timer;
pub mod engine;

// Re-export main types
pub use types::{AccountInfo, BurnTrend, PollMode, SessionWindow, UsageSnapshot};

// Re-export source trait and error
pub use provider::{AcquireRequest, Acquisition, QuotaError, SnapshotSource};

// Re-export sources
pub use remote::{RemoteProbeSource, RemoteUsageClient};
pub use session_log::{has_recent_session, scan, SessionLogSource, DEFAULT_SESSION_MAX_AGE};

// Re-export engine parts
pub use engine::{EngineCommand, EngineHandle, PollEngine, PollingStatus};
pub use scheduler::AdaptiveScheduler;
pub use timer::{spawn_ticker, PollingConfig};
pub use trend::{hourly_burn_percent, TrendTracker};

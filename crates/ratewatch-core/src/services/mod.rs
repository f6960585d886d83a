//! Services module

pub mod quota;

pub use quota::{
    AdaptiveScheduler, Acquisition, EngineHandle, PollEngine, PollMode, PollingConfig,
    PollingStatus, QuotaError, SnapshotSource, TrendTracker, UsageSnapshot,
};

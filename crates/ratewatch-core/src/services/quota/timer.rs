//! Poll timer and engine configuration
//!
//! The timer is a separate task that only sends unforced poll commands to the
//! engine. Whether a tick turns into a request is up to the engine's
//! scheduler.
//!
//! ```text
//!   ┌───────────┐  Poll { forced: false }  ┌────────────┐
//!   │  ticker   │ ───────────────────────▶ │ PollEngine │
//!   │ (interval)│                          │  (actor)   │
//!   └───────────┘                          └────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::engine::EngineCommand;
use super::session_log::{self, DEFAULT_SESSION_MAX_AGE};
use super::types::PollMode;
use crate::settings::{self, Settings, DEFAULT_MODEL};

// ============================================================================
// Configuration
// ============================================================================

/// Engine configuration
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Source to poll
    pub mode: PollMode,
    /// Base refresh interval
    pub interval: Duration,
    /// Model for remote probes
    pub model: String,
    /// Session log root for local mode
    pub sessions_root: PathBuf,
    /// Session files older than this are ignored
    pub session_max_age: Option<Duration>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            mode: PollMode::RemoteApi,
            interval: Duration::from_secs(settings::DEFAULT_INTERVAL_SECS),
            model: DEFAULT_MODEL.to_string(),
            sessions_root: session_log::default_sessions_dir(),
            session_max_age: Some(DEFAULT_SESSION_MAX_AGE),
        }
    }
}

impl PollingConfig {
    /// Configuration from saved settings and the resolved mode
    pub fn from_settings(settings: &Settings, mode: PollMode) -> Self {
        Self {
            mode,
            interval: settings.refresh_interval(),
            model: settings.model.clone(),
            sessions_root: settings.sessions_root(),
            ..Default::default()
        }
    }

    /// Normalize the interval to a supported value
    pub fn validate(mut self) -> Self {
        let secs = settings::normalize_interval(self.interval.as_secs());
        self.interval = Duration::from_secs(secs);
        self
    }
}

// ============================================================================
// Ticker
// ============================================================================

/// Spawn the recurring poll timer
///
/// The first tick fires one `period` after start; missed ticks are delayed
/// rather than bunched. The task ends on its own once the engine is gone.
pub fn spawn_ticker(period: Duration, commands: mpsc::WeakSender<EngineCommand>) -> JoinHandle<()> {
    log::debug!("[quota:timer] Starting ticker every {}s", period.as_secs());

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let Some(sender) = commands.upgrade() else {
                break;
            };
            if sender.send(EngineCommand::Poll { forced: false }).await.is_err() {
                break;
            }
        }
        log::debug!("[quota:timer] Ticker stopped");
    })
}

// ============================================================================
// Tests
// ============================================================================

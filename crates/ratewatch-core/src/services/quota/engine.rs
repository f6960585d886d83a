//! Poll engine
//!
//! A single tokio task owns every piece of mutable polling state: mode,
//! retained snapshot, status and error text, scheduler and trend tracker.
//! Everything else talks to it through [`EngineHandle`]:
//!
//! ```text
//!  EngineHandle ──┐
//!                 ├─ mpsc<EngineCommand> ──▶ ┌──────────┐ ── spawn ──▶ SnapshotSource::acquire
//!  ticker ────────┘                          │  actor   │ ◀─ Completion ──────┘
//!                                            └──────────┘
//!                                                 │ watch<PollingStatus>
//!                                                 ▼
//!                                              readers
//! ```
//!
//! At most one acquisition is in flight. Poll requests that arrive while one
//! is running are dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::provider::{AcquireRequest, Acquisition, QuotaError, SnapshotSource};
use super::remote::RemoteProbeSource;
use super::scheduler::AdaptiveScheduler;
use super::session_log::SessionLogSource;
use super::timer::{spawn_ticker, PollingConfig};
use super::trend::TrendTracker;
use super::types::{AccountInfo, BurnTrend, PollMode, UsageSnapshot};
use crate::credentials::{non_empty, MemorySecretStore, SecretStore};
use crate::error::{Error, Result};
use crate::settings;

const COMMAND_BUFFER: usize = 32;

/// Scheduled polls this close to the gate are let through
const TICK_TOLERANCE_SECS: i64 = 3;

pub const STATUS_NOT_REFRESHED: &str = "Not refreshed yet";
pub const STATUS_WAITING_FOR_API_KEY: &str = "Waiting for API key";
pub const STATUS_WAITING_FOR_SESSION: &str = "Waiting for session data";

// ============================================================================
// Published State
// ============================================================================

/// Everything a presentation layer needs, published as one value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingStatus {
    /// Most recent snapshot, if any
    pub snapshot: Option<UsageSnapshot>,
    /// Whether an acquisition is in flight
    pub is_polling: bool,
    pub status_text: String,
    pub error_text: Option<String>,
    pub burn_trend: BurnTrend,
    /// Estimated share of the token limit used per hour, in percent
    pub hourly_burn_percent: Option<f64>,
    pub mode: PollMode,
    /// Earliest time a scheduled poll will run
    pub next_poll_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    /// Number of completed acquisitions
    pub poll_count: u64,
    /// Codex account email, when a login was found
    pub account_email: Option<String>,
}

impl PollingStatus {
    fn initial(mode: PollMode, account: &AccountInfo) -> Self {
        Self {
            snapshot: None,
            is_polling: false,
            status_text: STATUS_NOT_REFRESHED.to_string(),
            error_text: None,
            burn_trend: BurnTrend::Steady,
            hourly_burn_percent: None,
            mode,
            next_poll_at: None,
            consecutive_failures: 0,
            poll_count: 0,
            account_email: account.email.clone(),
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

/// Messages accepted by the engine task
pub enum EngineCommand {
    /// Run one poll; unforced polls respect the scheduler gate
    Poll { forced: bool },
    /// Switch source; resets trend, error and backoff, then polls
    SetMode(PollMode),
    /// Change the base refresh interval and restart the timer
    SetInterval(Duration),
    /// Change the model used by remote probes
    SetModel(String),
    /// Store a new API key; empty deletes it
    SetApiKey(String),
    Shutdown,
}

impl std::fmt::Debug for EngineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineCommand::Poll { forced } => f.debug_struct("Poll").field("forced", forced).finish(),
            EngineCommand::SetMode(mode) => f.debug_tuple("SetMode").field(mode).finish(),
            EngineCommand::SetInterval(interval) => {
                f.debug_tuple("SetInterval").field(interval).finish()
            }
            EngineCommand::SetModel(model) => f.debug_tuple("SetModel").field(model).finish(),
            EngineCommand::SetApiKey(_) => f.write_str("SetApiKey(<redacted>)"),
            EngineCommand::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Result of a spawned acquisition
struct Completion {
    mode: PollMode,
    forced: bool,
    acquisition: Acquisition,
}

// ============================================================================
// Builder
// ============================================================================

/// Poll engine builder
///
/// # Example
///
/// ```ignore
/// use ratewatch_core::services::quota::{PollEngine, PollingConfig};
///
/// let handle = PollEngine::new(PollingConfig::default())
///     .with_api_key(Some("sk-...".to_string()))
///     .spawn();
///
/// let status = handle.wait_for_poll(1).await?;
/// println!("{}", status.status_text);
/// handle.shutdown().await;
/// ```
pub struct PollEngine {
    config: PollingConfig,
    remote: Arc<dyn SnapshotSource>,
    local: Arc<dyn SnapshotSource>,
    secret_store: Arc<dyn SecretStore>,
    api_key: Option<String>,
    account: AccountInfo,
    force_initial_poll: bool,
}

impl PollEngine {
    /// Engine with the default remote and session-log sources
    pub fn new(config: PollingConfig) -> Self {
        let config = config.validate();
        let local = SessionLogSource::with_root(config.sessions_root.clone())
            .with_max_age(config.session_max_age);

        Self {
            remote: Arc::new(RemoteProbeSource::default()),
            local: Arc::new(local),
            secret_store: Arc::new(MemorySecretStore::new()),
            api_key: None,
            account: AccountInfo::default(),
            force_initial_poll: false,
            config,
        }
    }

    /// Replace the source serving `source.mode()`
    pub fn with_source(mut self, source: Arc<dyn SnapshotSource>) -> Self {
        match source.mode() {
            PollMode::RemoteApi => self.remote = source,
            PollMode::LocalSession => self.local = source,
        }
        self
    }

    /// Store that receives API key changes
    pub fn with_secret_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.secret_store = store;
        self
    }

    /// API key to start with
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.and_then(non_empty);
        self
    }

    /// Account shown alongside the status
    pub fn with_account(mut self, account: AccountInfo) -> Self {
        self.account = account;
        self
    }

    /// Treat the startup poll as a user request
    ///
    /// The startup poll then reports "waiting" states in the status text,
    /// which one-shot callers want to show.
    pub fn force_initial_poll(mut self) -> Self {
        self.force_initial_poll = true;
        self
    }

    /// Start the engine task
    ///
    /// Must be called from within a tokio runtime. The engine immediately
    /// runs one poll.
    pub fn spawn(self) -> EngineHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (completion_tx, completion_rx) = mpsc::channel(1);
        let initial = PollingStatus::initial(self.config.mode, &self.account);
        let (status_tx, status_rx) = watch::channel(initial.clone());

        let actor = EngineActor {
            scheduler: AdaptiveScheduler::new(self.config.interval),
            trend: TrendTracker::new(),
            status: initial,
            config: self.config,
            remote: self.remote,
            local: self.local,
            secret_store: self.secret_store,
            api_key: self.api_key,
            in_flight: None,
            pending_forced: false,
            force_initial_poll: self.force_initial_poll,
            status_tx,
            commands: command_tx.downgrade(),
            completions: completion_tx,
            ticker: None,
        };
        let task = tokio::spawn(actor.run(command_rx, completion_rx));

        EngineHandle {
            commands: command_tx,
            status: status_rx,
            task,
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Control and observation handle for a running engine
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    status: watch::Receiver<PollingStatus>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Send a raw command
    pub async fn send(&self, command: EngineCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::EngineStopped)
    }

    /// Forced poll
    pub async fn refresh(&self) -> Result<()> {
        self.send(EngineCommand::Poll { forced: true }).await
    }

    pub async fn set_mode(&self, mode: PollMode) -> Result<()> {
        self.send(EngineCommand::SetMode(mode)).await
    }

    pub async fn set_interval(&self, interval: Duration) -> Result<()> {
        self.send(EngineCommand::SetInterval(interval)).await
    }

    pub async fn set_model(&self, model: impl Into<String>) -> Result<()> {
        self.send(EngineCommand::SetModel(model.into())).await
    }

    pub async fn set_api_key(&self, api_key: impl Into<String>) -> Result<()> {
        self.send(EngineCommand::SetApiKey(api_key.into())).await
    }

    /// Latest published status
    pub fn status(&self) -> PollingStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every published change
    pub fn subscribe(&self) -> watch::Receiver<PollingStatus> {
        self.status.clone()
    }

    /// Wait until at least `count` acquisitions have completed
    pub async fn wait_for_poll(&self, count: u64) -> Result<PollingStatus> {
        let mut receiver = self.status.clone();
        let status = receiver
            .wait_for(|status| status.poll_count >= count)
            .await
            .map_err(|_| Error::EngineStopped)?;
        Ok(status.clone())
    }

    /// Stop the timer and the engine task
    ///
    /// An acquisition still in flight finishes in the background and its
    /// result is dropped.
    pub async fn shutdown(self) {
        if self.commands.send(EngineCommand::Shutdown).await.is_err() {
            log::debug!("[quota:engine] Engine already stopped");
        }
        if let Err(e) = self.task.await {
            log::warn!("[quota:engine] Engine task ended abnormally: {}", e);
        }
    }
}

// ============================================================================
// Actor
// ============================================================================

struct EngineActor {
    config: PollingConfig,
    remote: Arc<dyn SnapshotSource>,
    local: Arc<dyn SnapshotSource>,
    secret_store: Arc<dyn SecretStore>,
    api_key: Option<String>,
    scheduler: AdaptiveScheduler,
    trend: TrendTracker,
    status: PollingStatus,
    /// Mode of the acquisition currently running
    in_flight: Option<PollMode>,
    /// A mode switch arrived mid-flight; poll once the flight lands
    pending_forced: bool,
    force_initial_poll: bool,
    status_tx: watch::Sender<PollingStatus>,
    commands: mpsc::WeakSender<EngineCommand>,
    completions: mpsc::Sender<Completion>,
    ticker: Option<JoinHandle<()>>,
}

impl EngineActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<EngineCommand>,
        mut completions: mpsc::Receiver<Completion>,
    ) {
        log::info!(
            "[quota:engine] Starting in {} mode, refresh every {}s",
            self.config.mode,
            self.config.interval.as_secs()
        );
        self.restart_ticker();
        self.request_poll(self.force_initial_poll);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(EngineCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(completion) = completions.recv() => self.complete(completion),
            }
        }

        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        log::info!("[quota:engine] Stopped after {} polls", self.status.poll_count);
    }

    fn handle_command(&mut self, command: EngineCommand) {
        log::debug!("[quota:engine] Command: {:?}", command);
        match command {
            EngineCommand::Poll { forced } => self.request_poll(forced),
            EngineCommand::SetMode(mode) => self.switch_mode(mode),
            EngineCommand::SetInterval(interval) => self.change_interval(interval),
            EngineCommand::SetModel(model) => {
                self.config.model = model;
            }
            EngineCommand::SetApiKey(api_key) => self.update_api_key(api_key),
            // Stops the run loop before reaching here
            EngineCommand::Shutdown => {}
        }
    }

    fn source_for(&self, mode: PollMode) -> Arc<dyn SnapshotSource> {
        match mode {
            PollMode::RemoteApi => Arc::clone(&self.remote),
            PollMode::LocalSession => Arc::clone(&self.local),
        }
    }

    fn request_poll(&mut self, forced: bool) {
        if let Some(mode) = self.in_flight {
            log::debug!("[quota:engine] {} poll already running, request dropped", mode);
            return;
        }

        let now = Utc::now();
        let gate_time = if forced {
            now
        } else {
            now + chrono::Duration::seconds(TICK_TOLERANCE_SECS)
        };
        if !self.scheduler.should_poll(gate_time, forced) {
            log::debug!(
                "[quota:engine] Next poll not before {}",
                self.scheduler.next_allowed_poll_at()
            );
            return;
        }

        let mode = self.config.mode;
        let source = self.source_for(mode);
        let request = AcquireRequest {
            auth_token: self.api_key.clone(),
            model: self.config.model.clone(),
        };

        self.in_flight = Some(mode);
        self.status.is_polling = true;
        self.publish();

        log::debug!(
            "[quota:engine] Polling {} (forced: {})",
            source.display_name(),
            forced
        );
        let completions = self.completions.clone();
        tokio::spawn(async move {
            // A panicking source must still land the flight
            let acquire = tokio::spawn(async move { source.acquire(&request).await });
            let acquisition = match acquire.await {
                Ok(acquisition) => acquisition,
                Err(e) => {
                    log::error!("[quota:engine] {} poll task failed: {}", mode, e);
                    Acquisition::Failed(QuotaError::Io(format!("poll task failed: {}", e)))
                }
            };
            let completion = Completion {
                mode,
                forced,
                acquisition,
            };
            if completions.send(completion).await.is_err() {
                log::debug!("[quota:engine] Engine stopped, dropping poll result");
            }
        });
    }

    fn complete(&mut self, completion: Completion) {
        self.in_flight = None;
        self.status.is_polling = false;

        if completion.mode == self.config.mode {
            self.apply(completion, Utc::now());
        } else {
            log::debug!(
                "[quota:engine] Discarding {} result after switching to {}",
                completion.mode,
                self.config.mode
            );
        }
        self.sync_status();
        self.publish();

        if std::mem::take(&mut self.pending_forced) {
            self.request_poll(true);
        }
    }

    fn apply(&mut self, completion: Completion, now: DateTime<Utc>) {
        let Completion {
            mode,
            forced,
            acquisition,
        } = completion;
        self.status.poll_count += 1;
        if !matches!(acquisition, Acquisition::Snapshot(_)) {
            self.trend.reset();
        }

        match acquisition {
            Acquisition::Snapshot(snapshot) => {
                let usage = snapshot.usage_percent();
                match mode {
                    PollMode::RemoteApi => {
                        self.trend.update(&snapshot, self.config.interval);
                    }
                    PollMode::LocalSession => self.trend.reset(),
                }
                log::info!("[quota:engine] {} snapshot, usage {:?}%", mode, usage);

                self.status.status_text = format!("Last checked {}", clock(snapshot.fetched_at));
                self.status.snapshot = Some(snapshot);
                self.status.error_text = None;
                self.scheduler.on_success(usage, now);
            }
            Acquisition::NotFound => {
                log::debug!("[quota:engine] No session data yet");
                self.status.snapshot = None;
                self.status.error_text = None;
                if forced {
                    self.status.status_text = STATUS_WAITING_FOR_SESSION.to_string();
                }
            }
            Acquisition::Failed(QuotaError::NotConfigured(reason)) => {
                log::debug!("[quota:engine] Not configured: {}", reason);
                if forced {
                    self.status.status_text = STATUS_WAITING_FOR_API_KEY.to_string();
                }
            }
            Acquisition::Failed(error) => {
                log::warn!("[quota:engine] {} poll failed: {}", mode, error);
                // A failed scan leaves nothing worth showing; a failed probe
                // keeps the last good snapshot
                if mode == PollMode::LocalSession {
                    self.status.snapshot = None;
                }
                self.status.error_text = Some(error.user_message());

                if error.triggers_backoff() {
                    if forced {
                        self.status.status_text = format!("Last attempt {}", clock(now));
                    }
                    self.scheduler.on_failure(now);
                }
            }
        }
    }

    fn switch_mode(&mut self, mode: PollMode) {
        log::info!("[quota:engine] Switching from {} to {}", self.config.mode, mode);
        self.config.mode = mode;
        self.trend.reset();
        self.status.error_text = None;
        self.scheduler.reset(Utc::now());
        self.sync_status();
        self.publish();

        if self.in_flight.is_some() {
            self.pending_forced = true;
        } else {
            self.request_poll(true);
        }
    }

    fn change_interval(&mut self, interval: Duration) {
        let secs = settings::normalize_interval(interval.as_secs());
        self.config.interval = Duration::from_secs(secs);
        self.scheduler.set_base_interval(self.config.interval, Utc::now());
        self.restart_ticker();
        self.sync_status();
        self.publish();
    }

    fn update_api_key(&mut self, api_key: String) {
        let trimmed = api_key.trim();
        if let Err(e) = self.secret_store.save(trimmed) {
            log::warn!("[quota:engine] Failed to store API key: {}", e);
            self.status.error_text = Some(e.to_string());
            self.publish();
        }
        self.api_key = non_empty(api_key);
    }

    fn restart_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        self.ticker = Some(spawn_ticker(self.config.interval, self.commands.clone()));
    }

    fn sync_status(&mut self) {
        self.status.mode = self.config.mode;
        self.status.burn_trend = self.trend.trend();
        self.status.hourly_burn_percent = self.trend.hourly_burn_percent();
        self.status.consecutive_failures = self.scheduler.consecutive_failures();
        self.status.next_poll_at = Some(self.scheduler.next_allowed_poll_at())
            .filter(|at| *at > DateTime::<Utc>::MIN_UTC);
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status.clone());
    }
}

/// Wall-clock time in the local zone, e.g. "14:05:09"
fn clock(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S").to_string()
}

// ============================================================================
// Tests
// ============================================================================

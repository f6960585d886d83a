//! CLI commands module
//!
//! Contains all CLI command implementations.

pub mod check;
pub mod config;
pub mod scan;
pub mod watch;

use std::path::PathBuf;

use anyhow::Result;
use ratewatch_core::credentials::{default_secret_store, resolve_api_key, CodexAuth};
use ratewatch_core::services::quota::{has_recent_session, DEFAULT_SESSION_MAX_AGE};
use ratewatch_core::{PollEngine, PollMode, PollingConfig, Settings};

use crate::output::OutputFormat;

/// Shared context for all commands
pub struct Context {
    pub settings: Settings,
    pub config_path: PathBuf,
    pub format: OutputFormat,
    pub quiet: bool,
}

/// Saved mode, an explicit override, or the detected default
pub fn resolve_mode(ctx: &Context, requested: Option<PollMode>) -> PollMode {
    if let Some(mode) = requested.or(ctx.settings.mode) {
        return mode;
    }

    let codex_login = CodexAuth::new().has_login();
    let recent_session =
        has_recent_session(&ctx.settings.sessions_root(), DEFAULT_SESSION_MAX_AGE).unwrap_or(false);
    let mode = ctx.settings.effective_mode(codex_login, recent_session);
    log::debug!(
        "Detected {} mode (codex login: {}, recent session: {})",
        mode,
        codex_login,
        recent_session
    );
    mode
}

/// Build a poll engine from the saved settings
pub fn build_engine(ctx: &Context, mode: PollMode, model: Option<String>) -> Result<PollEngine> {
    let mut config = PollingConfig::from_settings(&ctx.settings, mode);
    if let Some(model) = model {
        config.model = model;
    }

    let store = default_secret_store()?;
    let api_key = resolve_api_key(store.as_ref());
    let account = CodexAuth::new().load().unwrap_or_default();

    Ok(PollEngine::new(config)
        .with_secret_store(store)
        .with_api_key(api_key)
        .with_account(account))
}

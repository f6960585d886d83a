//! Quota tracking types
//!
//! Types shared by the snapshot sources, the scheduler and the poll engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Poll Mode
// ============================================================================

/// Where usage snapshots come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollMode {
    /// Probe the remote API and read its rate-limit headers
    RemoteApi,
    /// Scan local Codex session logs for the latest rate-limit record
    LocalSession,
}

impl std::fmt::Display for PollMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollMode::RemoteApi => write!(f, "remote_api"),
            PollMode::LocalSession => write!(f, "local_session"),
        }
    }
}

impl std::str::FromStr for PollMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "remote_api" | "remote" | "api" | "api_key" => Ok(PollMode::RemoteApi),
            "local_session" | "local" | "session" | "codex" => Ok(PollMode::LocalSession),
            _ => Err(format!("Unknown poll mode: {}", s)),
        }
    }
}

// ============================================================================
// Burn Trend
// ============================================================================

/// Direction of the hourly burn estimate compared to the previous poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BurnTrend {
    Rising,
    Falling,
    #[default]
    Steady,
}

impl BurnTrend {
    /// Single-character arrow for compact status lines
    pub fn symbol(&self) -> &'static str {
        match self {
            BurnTrend::Rising => "↑",
            BurnTrend::Falling => "↓",
            BurnTrend::Steady => "→",
        }
    }
}

impl std::fmt::Display for BurnTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BurnTrend::Rising => write!(f, "rising"),
            BurnTrend::Falling => write!(f, "falling"),
            BurnTrend::Steady => write!(f, "steady"),
        }
    }
}

// ============================================================================
// Snapshot Types
// ============================================================================

/// One rate-limit window reported by a local session record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionWindow {
    /// Percentage of the window already used (0.0 - 100.0)
    pub used_percent: Option<f64>,
    /// Window length in minutes
    pub window_minutes: Option<u64>,
    /// When the window resets
    pub resets_at: Option<DateTime<Utc>>,
}

/// A point-in-time snapshot of quota usage
///
/// Produced by exactly one source per acquisition. Remote snapshots carry the
/// request/token header fields; local snapshots carry the session windows.
/// A snapshot is never merged with a previous one, only replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Source that produced this snapshot
    pub origin: PollMode,
    /// Request limit for the current window
    pub requests_limit: Option<u64>,
    /// Requests left in the current window
    pub requests_remaining: Option<u64>,
    /// Request window reset label, verbatim from the server (e.g. "1s", "6m0s")
    pub requests_reset: Option<String>,
    /// Token limit for the current window
    pub tokens_limit: Option<u64>,
    /// Tokens left in the current window
    pub tokens_remaining: Option<u64>,
    /// Token window reset label, verbatim from the server
    pub tokens_reset: Option<String>,
    /// Tokens consumed by the probe request itself
    pub request_tokens_cost: Option<u64>,
    /// Short session window (local mode)
    pub primary: Option<SessionWindow>,
    /// Long session window (local mode)
    pub secondary: Option<SessionWindow>,
    /// When this snapshot was taken
    pub fetched_at: DateTime<Utc>,
}

impl UsageSnapshot {
    /// Create an empty remote snapshot stamped with the current time
    pub fn remote() -> Self {
        Self::empty(PollMode::RemoteApi)
    }

    /// Create a local session snapshot from its two windows
    pub fn local(primary: Option<SessionWindow>, secondary: Option<SessionWindow>) -> Self {
        Self {
            primary,
            secondary,
            ..Self::empty(PollMode::LocalSession)
        }
    }

    fn empty(origin: PollMode) -> Self {
        Self {
            origin,
            requests_limit: None,
            requests_remaining: None,
            requests_reset: None,
            tokens_limit: None,
            tokens_remaining: None,
            tokens_reset: None,
            request_tokens_cost: None,
            primary: None,
            secondary: None,
            fetched_at: Utc::now(),
        }
    }

    /// Fraction of the request quota used, when limit and remaining are known
    pub fn requests_used_fraction(&self) -> Option<f64> {
        used_fraction(self.requests_limit, self.requests_remaining)
    }

    /// Fraction of the token quota used, when limit and remaining are known
    pub fn tokens_used_fraction(&self) -> Option<f64> {
        used_fraction(self.tokens_limit, self.tokens_remaining)
    }

    /// Usage level the scheduler adapts to, as a percentage
    ///
    /// Remote snapshots use the higher of the request and token fractions;
    /// local snapshots use the primary window's used percentage.
    pub fn usage_percent(&self) -> Option<f64> {
        match self.origin {
            PollMode::RemoteApi => {
                let requests = self.requests_used_fraction();
                let tokens = self.tokens_used_fraction();
                let highest = match (requests, tokens) {
                    (Some(r), Some(t)) => Some(r.max(t)),
                    (r, t) => r.or(t),
                };
                highest.map(|fraction| fraction * 100.0)
            }
            PollMode::LocalSession => self.primary.as_ref().and_then(|w| w.used_percent),
        }
    }
}

fn used_fraction(limit: Option<u64>, remaining: Option<u64>) -> Option<f64> {
    match (limit, remaining) {
        (Some(limit), Some(remaining)) if limit > 0 => {
            Some((limit as f64 - remaining as f64) / limit as f64)
        }
        _ => None,
    }
}

// ============================================================================
// Account Info
// ============================================================================

/// Account details recovered from a local Codex login
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Account email, decoded from the login token
    pub email: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================

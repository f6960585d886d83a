//! Snapshot source trait and error types
//!
//! Defines the interface both acquisition strategies implement.

use async_trait::async_trait;
use thiserror::Error;

use super::types::{PollMode, UsageSnapshot};

/// Response bodies longer than this are truncated in error messages
const ERROR_BODY_LIMIT: usize = 220;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while acquiring a usage snapshot
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuotaError {
    /// No credential configured for the source
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// A required setting is blank or invalid
    #[error("{0}")]
    Validation(String),

    /// The local scan completed but found no usage record
    #[error("No rate limit data found: {0}")]
    NotFound(String),

    /// Network request failed before a response arrived
    #[error("Network error: {0}")]
    Network(String),

    /// The remote API answered with a non-success status
    #[error("{}", http_error_message(.status, .body))]
    Http { status: u16, body: String },

    /// The sessions root is missing or is not a directory
    #[error("Sessions folder not found: {0}")]
    Scan(String),

    /// I/O error while reading a session file
    #[error("IO error: {0}")]
    Io(String),

    /// Failed to parse a response or record
    #[error("Parse error: {0}")]
    Parse(String),
}

impl QuotaError {
    /// Message suitable for the status area
    ///
    /// A 401 whose body mentions an incorrect API key gets a short
    /// actionable message; everything else uses the error's own text.
    pub fn user_message(&self) -> String {
        match self {
            QuotaError::Http { status: 401, body }
                if body.to_lowercase().contains("incorrect api key") =>
            {
                "Incorrect API key. Paste a valid OpenAI API key.".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Whether this failure should push the next poll out with backoff
    pub fn triggers_backoff(&self) -> bool {
        matches!(
            self,
            QuotaError::Network(_)
                | QuotaError::Http { .. }
                | QuotaError::Scan(_)
                | QuotaError::Io(_)
                | QuotaError::Parse(_)
        )
    }
}

fn http_error_message(status: &u16, body: &str) -> String {
    if body.is_empty() {
        return format!("OpenAI request failed ({}).", status);
    }
    let trimmed = if body.chars().count() > ERROR_BODY_LIMIT {
        let prefix: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        format!("{}...", prefix)
    } else {
        body.to_string()
    };
    format!("OpenAI request failed ({}): {}", status, trimmed)
}

impl From<std::io::Error> for QuotaError {
    fn from(err: std::io::Error) -> Self {
        QuotaError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for QuotaError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            QuotaError::Network("Request timed out".to_string())
        } else if err.is_connect() {
            QuotaError::Network("Connection failed".to_string())
        } else {
            QuotaError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for QuotaError {
    fn from(err: serde_json::Error) -> Self {
        QuotaError::Parse(err.to_string())
    }
}

// ============================================================================
// Acquisition
// ============================================================================

/// Inputs a source may need for one acquisition
///
/// Built by the engine from its current settings right before each poll.
#[derive(Debug, Clone, Default)]
pub struct AcquireRequest {
    /// API key for remote probes (already trimmed, `None` when blank)
    pub auth_token: Option<String>,
    /// Model identifier for remote probes
    pub model: String,
}

/// Result of one acquisition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Acquisition {
    /// A fresh snapshot
    Snapshot(UsageSnapshot),
    /// The source was reachable but had no usage data yet
    NotFound,
    /// The attempt failed
    Failed(QuotaError),
}

impl From<Result<Option<UsageSnapshot>, QuotaError>> for Acquisition {
    fn from(result: Result<Option<UsageSnapshot>, QuotaError>) -> Self {
        match result {
            Ok(Some(snapshot)) => Acquisition::Snapshot(snapshot),
            Ok(None) | Err(QuotaError::NotFound(_)) => Acquisition::NotFound,
            Err(e) => Acquisition::Failed(e),
        }
    }
}

// ============================================================================
// Source Trait
// ============================================================================

/// A way of obtaining usage snapshots
///
/// The engine holds one implementation per [`PollMode`] and picks the one
/// matching the current mode on every poll, so nothing else in the engine
/// branches on where the data comes from.
///
/// # Example Implementation
///
/// ```ignore
/// use async_trait::async_trait;
/// use ratewatch_core::services::quota::{AcquireRequest, Acquisition, PollMode, SnapshotSource};
///
/// struct FixedSource;
///
/// #[async_trait]
/// impl SnapshotSource for FixedSource {
///     fn source_id(&self) -> &'static str {
///         "fixed"
///     }
///
///     fn mode(&self) -> PollMode {
///         PollMode::LocalSession
///     }
///
///     async fn acquire(&self, _request: &AcquireRequest) -> Acquisition {
///         Acquisition::NotFound
///     }
/// }
/// ```
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Unique identifier used in logs
    fn source_id(&self) -> &'static str;

    /// Human-readable name for this source
    fn display_name(&self) -> &'static str {
        self.source_id()
    }

    /// The mode this source serves
    fn mode(&self) -> PollMode;

    /// Perform one acquisition
    ///
    /// Never panics on bad data; every failure is reported as
    /// [`Acquisition::Failed`] or [`Acquisition::NotFound`].
    async fn acquire(&self, request: &AcquireRequest) -> Acquisition;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let quota_err: QuotaError = io_err.into();
        assert!(matches!(quota_err, QuotaError::Io(_)));
        assert!(quota_err.to_string().contains("file not found"));
    }

    #[test]
    fn test_quota_error_from_serde() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let quota_err: QuotaError = json_err.into();
        assert!(matches!(quota_err, QuotaError::Parse(_)));
    }

    #[test]
    fn test_incorrect_api_key_maps_to_friendly_message() {
        let err = QuotaError::Http {
            status: 401,
            body: r#"{"error":{"message":"Incorrect API key provided: sk-abc***"}}"#.to_string(),
        };
        assert_eq!(
            err.user_message(),
            "Incorrect API key. Paste a valid OpenAI API key."
        );
    }

    #[test]
    fn test_other_http_errors_use_generic_message_with_status() {
        let unauthorized = QuotaError::Http {
            status: 401,
            body: "token revoked".to_string(),
        };
        assert_eq!(
            unauthorized.user_message(),
            "OpenAI request failed (401): token revoked"
        );

        let server = QuotaError::Http {
            status: 500,
            body: "Incorrect API key provided".to_string(),
        };
        assert!(server.user_message().contains("(500)"));

        let empty = QuotaError::Http {
            status: 429,
            body: String::new(),
        };
        assert_eq!(empty.user_message(), "OpenAI request failed (429).");
    }

    #[test]
    fn test_long_http_body_is_truncated() {
        let err = QuotaError::Http {
            status: 400,
            body: "x".repeat(500),
        };
        let message = err.to_string();
        assert!(message.ends_with("..."));
        assert_eq!(
            message.len(),
            "OpenAI request failed (400): ".len() + ERROR_BODY_LIMIT + 3
        );
    }

    #[test]
    fn test_backoff_classification() {
        assert!(QuotaError::Network("down".into()).triggers_backoff());
        assert!(QuotaError::Scan("missing".into()).triggers_backoff());
        assert!(QuotaError::Http { status: 503, body: String::new() }.triggers_backoff());
        assert!(!QuotaError::Validation("Model cannot be empty.".into()).triggers_backoff());
        assert!(!QuotaError::NotConfigured("no key".into()).triggers_backoff());
        assert!(!QuotaError::NotFound("nothing".into()).triggers_backoff());
    }

    #[test]
    fn test_acquisition_from_result() {
        assert_eq!(Acquisition::from(Ok(None)), Acquisition::NotFound);
        assert_eq!(
            Acquisition::from(Err(QuotaError::NotFound("empty".into()))),
            Acquisition::NotFound
        );
        let snapshot = UsageSnapshot::remote();
        assert_eq!(
            Acquisition::from(Ok(Some(snapshot.clone()))),
            Acquisition::Snapshot(snapshot)
        );
        assert!(matches!(
            Acquisition::from(Err(QuotaError::Scan("gone".into()))),
            Acquisition::Failed(QuotaError::Scan(_))
        ));
    }
}

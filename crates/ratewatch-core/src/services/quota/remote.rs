//! OpenAI rate-limit probe
//!
//! The Responses API reports the account's request and token budgets in
//! `x-ratelimit-*` response headers. A tiny request ("ping", capped output)
//! is enough to read them, and its `usage` block tells how many tokens the
//! probe itself consumed.
//!
//! # Example
//!
//! ```ignore
//! use ratewatch_core::services::quota::RemoteUsageClient;
//!
//! let client = RemoteUsageClient::new();
//! let snapshot = client.fetch("sk-...", "gpt-5-codex").await?;
//! println!("{:?} requests left", snapshot.requests_remaining);
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use super::provider::{AcquireRequest, Acquisition, QuotaError, SnapshotSource};
use super::types::{PollMode, UsageSnapshot};

// ============================================================================
// Constants
// ============================================================================

/// OpenAI Responses API endpoint
const RESPONSES_API_URL: &str = "https://api.openai.com/v1/responses";

/// HTTP request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Input sent with every probe
const PROBE_INPUT: &str = "ping";

/// Output cap for the probe (the smallest value the endpoint accepts)
const PROBE_MAX_OUTPUT_TOKENS: u32 = 16;

const HEADER_LIMIT_REQUESTS: &str = "x-ratelimit-limit-requests";
const HEADER_REMAINING_REQUESTS: &str = "x-ratelimit-remaining-requests";
const HEADER_RESET_REQUESTS: &str = "x-ratelimit-reset-requests";
const HEADER_LIMIT_TOKENS: &str = "x-ratelimit-limit-tokens";
const HEADER_REMAINING_TOKENS: &str = "x-ratelimit-remaining-tokens";
const HEADER_RESET_TOKENS: &str = "x-ratelimit-reset-tokens";

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ProbeRequest<'a> {
    model: &'a str,
    input: &'a str,
    max_output_tokens: u32,
}

// ============================================================================
// RemoteUsageClient
// ============================================================================

/// Client issuing the rate-limit probe
pub struct RemoteUsageClient {
    client: Client,
    endpoint: String,
}

impl RemoteUsageClient {
    /// Client for the public OpenAI endpoint
    pub fn new() -> Self {
        Self::with_endpoint(RESPONSES_API_URL)
    }

    /// Client for a custom endpoint
    ///
    /// Useful for testing or API-compatible gateways.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// Endpoint this client probes
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one probe and convert the response into a snapshot
    ///
    /// # Errors
    ///
    /// - `QuotaError::Http` for any non-2xx status, with the body text
    /// - `QuotaError::Network` when the request never completes
    pub async fn fetch(&self, auth_token: &str, model: &str) -> Result<UsageSnapshot, QuotaError> {
        log::info!("[quota:remote] Probing {} with model {}", self.endpoint, model);

        let body = ProbeRequest {
            model,
            input: PROBE_INPUT,
            max_output_tokens: PROBE_MAX_OUTPUT_TOKENS,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", auth_token))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        log::debug!("[quota:remote] API response status: {}", status);

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            log::warn!(
                "[quota:remote] API error: HTTP {} - {}",
                status,
                &error_body[..floor_char_boundary(&error_body, 200)]
            );
            return Err(QuotaError::Http {
                status: status.as_u16(),
                body: error_body,
            });
        }

        let headers = response.headers().clone();
        let response_text = response.text().await?;

        let mut snapshot = snapshot_from_headers(&headers);
        snapshot.request_tokens_cost = total_tokens_from_body(&response_text);

        log::info!(
            "[quota:remote] Requests {:?}/{:?}, tokens {:?}/{:?}, probe cost {:?}",
            snapshot.requests_remaining,
            snapshot.requests_limit,
            snapshot.tokens_remaining,
            snapshot.tokens_limit,
            snapshot.request_tokens_cost
        );
        Ok(snapshot)
    }
}

impl Default for RemoteUsageClient {
    fn default() -> Self {
        Self::new()
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

// ============================================================================
// Response Parsing
// ============================================================================

/// Build a remote snapshot from the rate-limit headers
///
/// `HeaderMap` lookups are case-insensitive. Integer headers that fail to
/// parse are left absent.
fn snapshot_from_headers(headers: &HeaderMap) -> UsageSnapshot {
    UsageSnapshot {
        requests_limit: header_u64(headers, HEADER_LIMIT_REQUESTS),
        requests_remaining: header_u64(headers, HEADER_REMAINING_REQUESTS),
        requests_reset: header_string(headers, HEADER_RESET_REQUESTS),
        tokens_limit: header_u64(headers, HEADER_LIMIT_TOKENS),
        tokens_remaining: header_u64(headers, HEADER_REMAINING_TOKENS),
        tokens_reset: header_string(headers, HEADER_RESET_TOKENS),
        ..UsageSnapshot::remote()
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    header_string(headers, name).and_then(|s| s.parse::<u64>().ok())
}

/// Tokens consumed by the probe, read from the body's `usage` object
///
/// Model families disagree on field names, so this tries `total_tokens`,
/// then `input_tokens + output_tokens`, then
/// `prompt_tokens + completion_tokens`.
fn total_tokens_from_body(body: &str) -> Option<u64> {
    let root: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            log::debug!("[quota:remote] Response body is not JSON: {}", e);
            return None;
        }
    };
    let usage = root.get("usage")?;
    let field = |name: &str| usage.get(name).and_then(|v| v.as_u64());

    if let Some(total) = field("total_tokens") {
        return Some(total);
    }
    if let (Some(input), Some(output)) = (field("input_tokens"), field("output_tokens")) {
        return input.checked_add(output);
    }
    if let (Some(prompt), Some(completion)) = (field("prompt_tokens"), field("completion_tokens")) {
        return prompt.checked_add(completion);
    }
    None
}

// ============================================================================
// SnapshotSource Implementation
// ============================================================================

/// Snapshot source probing the remote API
pub struct RemoteProbeSource {
    client: RemoteUsageClient,
}

impl RemoteProbeSource {
    pub fn new(client: RemoteUsageClient) -> Self {
        Self { client }
    }
}

impl Default for RemoteProbeSource {
    fn default() -> Self {
        Self::new(RemoteUsageClient::new())
    }
}

#[async_trait]
impl SnapshotSource for RemoteProbeSource {
    fn source_id(&self) -> &'static str {
        "openai_api"
    }

    fn display_name(&self) -> &'static str {
        "OpenAI API"
    }

    fn mode(&self) -> PollMode {
        PollMode::RemoteApi
    }

    async fn acquire(&self, request: &AcquireRequest) -> Acquisition {
        let Some(token) = request.auth_token.as_deref().filter(|t| !t.trim().is_empty()) else {
            return Acquisition::Failed(QuotaError::NotConfigured(
                "Add an OpenAI API key or switch to local session mode.".to_string(),
            ));
        };

        let model = request.model.trim();
        if model.is_empty() {
            return Acquisition::Failed(QuotaError::Validation(
                "Model cannot be empty.".to_string(),
            ));
        }

        match self.client.fetch(token.trim(), model).await {
            Ok(snapshot) => Acquisition::Snapshot(snapshot),
            Err(e) => Acquisition::Failed(e),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

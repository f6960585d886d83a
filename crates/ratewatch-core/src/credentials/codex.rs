//! Codex CLI login detection
//!
//! The Codex CLI stores its login in `~/.codex/auth.json`:
//!
//! ```json
//! { "tokens": { "access_token": "...", "id_token": "<jwt>" } }
//! ```
//!
//! A non-empty token means a login exists. The account email is read from the
//! JWT payload without verifying the signature; it is only displayed.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::services::quota::AccountInfo;

/// Claim holding the email in OpenAI-issued tokens
const PROFILE_CLAIM: &str = "https://api.openai.com/profile";

#[derive(Debug, Deserialize)]
struct AuthFile {
    tokens: Option<AuthTokens>,
}

#[derive(Debug, Deserialize)]
struct AuthTokens {
    access_token: Option<String>,
    id_token: Option<String>,
}

/// Reader for the Codex CLI login file
#[derive(Debug, Clone)]
pub struct CodexAuth {
    path: PathBuf,
}

impl CodexAuth {
    /// Reader for `~/.codex/auth.json`
    pub fn new() -> Self {
        Self::with_path(Self::default_auth_path())
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn default_auth_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".codex")
            .join("auth.json")
    }

    /// Load the login and the account email it carries
    ///
    /// # Errors
    ///
    /// `Error::Credential` when the file is missing or holds no token,
    /// `Error::Json` when it is not valid JSON.
    pub fn load(&self) -> Result<AccountInfo> {
        if !self.path.exists() {
            return Err(Error::credential("Codex auth file was not found."));
        }

        let content = std::fs::read_to_string(&self.path)?;
        let auth: AuthFile = serde_json::from_str(&content)?;
        let tokens = auth
            .tokens
            .ok_or_else(|| Error::credential("Codex login token was not found."))?;

        let access_token = tokens.access_token.filter(|t| !t.trim().is_empty());
        let id_token = tokens.id_token.filter(|t| !t.trim().is_empty());
        if access_token.is_none() && id_token.is_none() {
            return Err(Error::credential("Codex login token was not found."));
        }

        let email = id_token
            .as_deref()
            .and_then(decode_jwt_email)
            .or_else(|| access_token.as_deref().and_then(decode_jwt_email));

        log::debug!("[credentials] Codex login found, email present: {}", email.is_some());
        Ok(AccountInfo { email })
    }

    /// Whether a usable login exists
    pub fn has_login(&self) -> bool {
        match self.load() {
            Ok(_) => true,
            Err(e) => {
                log::debug!("[credentials] No Codex login: {}", e);
                false
            }
        }
    }
}

impl Default for CodexAuth {
    fn default() -> Self {
        Self::new()
    }
}

/// Email claim from an unverified JWT
///
/// Checks `email` first, then the OpenAI profile claim.
pub fn decode_jwt_email(token: &str) -> Option<String> {
    let payload_segment = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload_segment.trim_end_matches('='))
        .ok()?;
    let payload: Value = serde_json::from_slice(&bytes).ok()?;

    payload
        .get("email")
        .and_then(|v| v.as_str())
        .or_else(|| {
            payload
                .get(PROFILE_CLAIM)
                .and_then(|profile| profile.get("email"))
                .and_then(|v| v.as_str())
        })
        .map(|s| s.to_string())
}

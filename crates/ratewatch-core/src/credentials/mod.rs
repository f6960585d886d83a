//! API key storage and Codex login detection
//!
//! The OpenAI API key lives in the platform secret store:
//!
//! - **macOS**: Keychain generic password
//! - **Windows**: Credential Manager (via `keyring`)
//! - **Elsewhere**: a file readable only by the owner, next to the settings
//!
//! Saving an empty string deletes the stored key. [`MemorySecretStore`] keeps
//! the key in process memory and is used in tests.

mod codex;

pub use codex::{decode_jwt_email, CodexAuth};

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

/// Secret store service name
pub const SERVICE_NAME: &str = "ratewatch";

/// Secret store account name for the OpenAI API key
pub const API_KEY_ACCOUNT: &str = "openai_api_key";

/// Environment variable consulted when the store holds no key
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// File name used by [`FileSecretStore`] under the config directory
const API_KEY_FILE: &str = "api_key";

// ============================================================================
// Trait
// ============================================================================

/// Storage for a single secret
pub trait SecretStore: Send + Sync {
    /// Human-readable backend name
    fn backend_name(&self) -> &'static str;

    /// Replace the stored secret; an empty string deletes it
    fn save(&self, secret: &str) -> Result<()>;

    /// The stored secret, if any
    ///
    /// Backend failures are logged and reported as no secret.
    fn load(&self) -> Option<String>;
}

/// API key to start the engine with
///
/// The stored key wins; `OPENAI_API_KEY` is used only when the store is empty.
pub fn resolve_api_key(store: &dyn SecretStore) -> Option<String> {
    let stored = store.load().and_then(non_empty);
    if stored.is_some() {
        log::debug!("[credentials] Using API key from {}", store.backend_name());
        return stored;
    }

    let from_env = std::env::var(API_KEY_ENV).ok().and_then(non_empty);
    if from_env.is_some() {
        log::debug!("[credentials] Using API key from {}", API_KEY_ENV);
    }
    from_env
}

/// Trimmed value, or `None` when blank
pub(crate) fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Secret store for the current platform
pub fn default_secret_store() -> Result<Arc<dyn SecretStore>> {
    #[cfg(target_os = "macos")]
    {
        Ok(Arc::new(KeychainSecretStore::new()))
    }

    #[cfg(target_os = "windows")]
    {
        Ok(Arc::new(CredentialManagerSecretStore::new()))
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        let dir = crate::settings::get_config_dir()?;
        Ok(Arc::new(FileSecretStore::new(dir.join(API_KEY_FILE))))
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Secret store that keeps the value in memory
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secret: Mutex<Option<String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: Mutex::new(Some(secret.into())),
        }
    }
}

impl SecretStore for MemorySecretStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn save(&self, secret: &str) -> Result<()> {
        let mut guard = self
            .secret
            .lock()
            .map_err(|_| Error::credential("memory store lock poisoned"))?;
        *guard = if secret.is_empty() {
            None
        } else {
            Some(secret.to_string())
        };
        Ok(())
    }

    fn load(&self) -> Option<String> {
        self.secret.lock().ok().and_then(|guard| guard.clone())
    }
}

// ============================================================================
// File store
// ============================================================================

/// Secret store backed by a single owner-only file
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl SecretStore for FileSecretStore {
    fn backend_name(&self) -> &'static str {
        "file"
    }

    fn save(&self, secret: &str) -> Result<()> {
        if secret.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path)?;
                log::info!("[credentials] Removed API key file {:?}", self.path);
            }
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        use std::io::Write;
        let mut file = options.open(&self.path)?;
        file.write_all(secret.as_bytes())?;
        log::info!("[credentials] Saved API key to {:?}", self.path);
        Ok(())
    }

    fn load(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => non_empty(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                log::warn!("[credentials] Failed to read {:?}: {}", self.path, e);
                None
            }
        }
    }
}

// ============================================================================
// Platform stores
// ============================================================================

/// macOS Keychain generic password
#[cfg(target_os = "macos")]
#[derive(Debug, Default)]
pub struct KeychainSecretStore;

#[cfg(target_os = "macos")]
impl KeychainSecretStore {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(target_os = "macos")]
impl SecretStore for KeychainSecretStore {
    fn backend_name(&self) -> &'static str {
        "keychain"
    }

    fn save(&self, secret: &str) -> Result<()> {
        use security_framework::passwords::{delete_generic_password, set_generic_password};

        if secret.is_empty() {
            // Deleting a missing item is not an error
            if let Err(e) = delete_generic_password(SERVICE_NAME, API_KEY_ACCOUNT) {
                log::debug!("[credentials] Keychain delete: {}", e);
            }
            return Ok(());
        }

        set_generic_password(SERVICE_NAME, API_KEY_ACCOUNT, secret.as_bytes())
            .map_err(|e| Error::credential(format!("Keychain write failed: {}", e)))
    }

    fn load(&self) -> Option<String> {
        use security_framework::passwords::get_generic_password;

        match get_generic_password(SERVICE_NAME, API_KEY_ACCOUNT) {
            Ok(bytes) => String::from_utf8(bytes.to_vec())
                .map_err(|e| log::warn!("[credentials] Keychain data is not valid UTF-8: {}", e))
                .ok()
                .and_then(non_empty),
            Err(e) => {
                log::debug!("[credentials] Keychain lookup failed: {}", e);
                None
            }
        }
    }
}

/// Windows Credential Manager entry
#[cfg(target_os = "windows")]
#[derive(Debug, Default)]
pub struct CredentialManagerSecretStore;

#[cfg(target_os = "windows")]
impl CredentialManagerSecretStore {
    pub fn new() -> Self {
        Self
    }

    fn entry() -> Result<keyring::Entry> {
        keyring::Entry::new(SERVICE_NAME, API_KEY_ACCOUNT)
            .map_err(|e| Error::credential(format!("Credential Manager unavailable: {}", e)))
    }
}

#[cfg(target_os = "windows")]
impl SecretStore for CredentialManagerSecretStore {
    fn backend_name(&self) -> &'static str {
        "credential manager"
    }

    fn save(&self, secret: &str) -> Result<()> {
        let entry = Self::entry()?;
        if secret.is_empty() {
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => return Ok(()),
                Err(e) => return Err(Error::credential(format!("Credential delete failed: {}", e))),
            }
        }
        entry
            .set_password(secret)
            .map_err(|e| Error::credential(format!("Credential write failed: {}", e)))
    }

    fn load(&self) -> Option<String> {
        let entry = Self::entry()
            .map_err(|e| log::debug!("[credentials] {}", e))
            .ok()?;
        match entry.get_password() {
            Ok(secret) => non_empty(secret),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                log::debug!("[credentials] Credential Manager lookup failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    static ENV_MUTEX: StdMutex<()> = StdMutex::new(());

    #[test]
    fn test_non_empty_trims_and_rejects_blank() {
        assert_eq!(non_empty("  sk-key \n".to_string()).as_deref(), Some("sk-key"));
        assert_eq!(non_empty("   ".to_string()), None);
        assert_eq!(non_empty(String::new()), None);
    }

    #[test]
    fn test_memory_store_save_load_delete() {
        let store = MemorySecretStore::new();
        assert_eq!(store.load(), None);

        store.save("sk-one").unwrap();
        assert_eq!(store.load().as_deref(), Some("sk-one"));

        store.save("").unwrap();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_file_store_roundtrip_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = FileSecretStore::new(dir.path().join("nested").join("api_key"));

        assert_eq!(store.load(), None);
        store.save("sk-file").unwrap();
        assert_eq!(store.load().as_deref(), Some("sk-file"));

        store.save("").unwrap();
        assert!(!store.path().exists());
        // Deleting twice is fine
        store.save("").unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = FileSecretStore::new(dir.path().join("api_key"));
        store.save("sk-private").unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_resolve_prefers_stored_key() {
        let _lock = ENV_MUTEX.lock().unwrap();
        std::env::set_var(API_KEY_ENV, "sk-env");

        let store = MemorySecretStore::with_secret("  sk-stored \n");
        assert_eq!(resolve_api_key(&store).as_deref(), Some("sk-stored"));

        std::env::remove_var(API_KEY_ENV);
    }

    #[test]
    fn test_resolve_falls_back_to_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        std::env::set_var(API_KEY_ENV, "sk-env");
        assert_eq!(
            resolve_api_key(&MemorySecretStore::new()).as_deref(),
            Some("sk-env")
        );

        std::env::set_var(API_KEY_ENV, "   ");
        assert_eq!(resolve_api_key(&MemorySecretStore::new()), None);

        std::env::remove_var(API_KEY_ENV);
    }
}

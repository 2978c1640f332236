//! Admin credential resolution
//!
//! The admin key comes from a local cache first and from a secret store second.
//! Absence is an ordinary outcome: callers report it and let the user fix it.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::storage::{get_data_dir, StorageError};

/// Cache key holding the admin credential
pub const CREDENTIAL_CACHE_KEY: &str = "tabby_admin_key";

/// Secret store identifier used as the fallback source
pub const SECRET_ID: &str = "api_key_tabby";

/// Opaque bearer key. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

// ============================================================================
// Local key-value cache
// ============================================================================

/// Local persistent key-value cache
pub trait CredentialCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// In-process cache, mostly for embedding and tests
#[derive(Default)]
pub struct MemoryCredentialCache {
    entries: DashMap<String, String>,
}

impl MemoryCredentialCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialCache for MemoryCredentialCache {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// JSON map stored next to the settings file
pub struct FileCredentialCache {
    path: PathBuf,
}

impl FileCredentialCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Cache file in the default data directory
    pub fn in_data_dir() -> Result<Self, StorageError> {
        Ok(Self::new(get_data_dir()?.join("credentials.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<HashMap<String, String>, StorageError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let json = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

impl CredentialCache for FileCredentialCache {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut map = self.read_map()?;
        map.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&map)?)?;

        tracing::debug!("Stored credential in {}", self.path.display());
        Ok(())
    }
}

// ============================================================================
// Secret store
// ============================================================================

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Secret '{0}' not found")]
    NotFound(String),
    #[error("Secret store unavailable: {0}")]
    Unavailable(String),
}

/// External secret store consulted when the cache is empty
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn find_secret(&self, id: &str) -> Result<String, SecretError>;
}

/// Reads secrets from environment variables named after the upper-cased identifier
/// (`api_key_tabby` -> `API_KEY_TABBY`)
#[derive(Debug, Default, Clone)]
pub struct EnvSecretStore;

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn find_secret(&self, id: &str) -> Result<String, SecretError> {
        let var = id.to_ascii_uppercase();
        match std::env::var(&var) {
            Ok(value) if !value.trim().is_empty() => Ok(value),
            Ok(_) | Err(std::env::VarError::NotPresent) => {
                Err(SecretError::NotFound(id.to_string()))
            }
            Err(e) => Err(SecretError::Unavailable(format!("{}: {}", var, e))),
        }
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Resolves the admin credential: cache first, then secret store
#[derive(Clone)]
pub struct CredentialResolver {
    cache: Arc<dyn CredentialCache>,
    secrets: Arc<dyn SecretStore>,
}

impl CredentialResolver {
    pub fn new(cache: Arc<dyn CredentialCache>, secrets: Arc<dyn SecretStore>) -> Self {
        Self { cache, secrets }
    }

    /// File cache in the data directory, environment as fallback
    pub fn from_data_dir() -> Result<Self, StorageError> {
        Ok(Self::new(
            Arc::new(FileCredentialCache::in_data_dir()?),
            Arc::new(EnvSecretStore),
        ))
    }

    /// Look the credential up. Read-only; `None` means neither source had one.
    pub async fn resolve(&self) -> Option<Credential> {
        match self.cache.get(CREDENTIAL_CACHE_KEY) {
            Ok(Some(value)) if !value.trim().is_empty() => {
                tracing::debug!("Admin key found in local cache");
                return Some(Credential::new(value));
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to read credential cache: {}", e),
        }

        match self.secrets.find_secret(SECRET_ID).await {
            Ok(value) if !value.trim().is_empty() => {
                tracing::debug!("Admin key found in secret store");
                Some(Credential::new(value))
            }
            Ok(_) => {
                tracing::warn!("Secret '{}' is empty", SECRET_ID);
                None
            }
            Err(e) => {
                tracing::warn!("Secret store lookup failed: {}", e);
                None
            }
        }
    }

    /// Write the credential to the local cache
    pub fn store(&self, credential: &Credential) -> Result<(), StorageError> {
        self.cache.set(CREDENTIAL_CACHE_KEY, credential.expose())
    }
}

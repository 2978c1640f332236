//! Persistent storage
//!
//! Credential caching and extension settings, kept in the platform data directory.

pub mod credentials;
pub mod settings;

use std::path::PathBuf;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Could not determine a data directory for this platform")]
    NoDataDir,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Settings migration failed: {0}")]
    Migration(String),
}

/// Get the application data directory
///
/// Windows: %APPDATA%/TabbyLoader, Linux: ~/.local/share/tabbyloader,
/// macOS: ~/Library/Application Support/com.TabbyLoader.TabbyLoader
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    directories::ProjectDirs::from("com", "TabbyLoader", "TabbyLoader")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or(StorageError::NoDataDir)
}

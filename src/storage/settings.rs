//! Settings storage
//!
//! Persists the loader's preferences: server address, auth scheme and the tuning
//! parameters used to build load requests. Older files are migrated on load.

use crate::storage::{get_data_dir, StorageError};
use crate::types::config::{AuthScheme, ClientConfig, ServerConfig, DEFAULT_BASE_URL};
use crate::types::model::{CacheMode, DraftRequest, LoadRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

/// Current on-disk settings version
pub const SETTINGS_VERSION: u32 = 1;

/// Loader settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionSettings {
    #[serde(default)]
    pub version: u32,
    /// Replaces the default server address when set
    #[serde(default)]
    pub url_override: Option<String>,
    #[serde(default)]
    pub auth_scheme: AuthScheme,
    #[serde(default)]
    pub max_seq_len: Option<u32>,
    #[serde(default)]
    pub rope_scale: Option<f64>,
    #[serde(default)]
    pub rope_alpha: Option<f64>,
    #[serde(default)]
    pub no_flash_attention: bool,
    #[serde(default = "default_gpu_split_auto")]
    pub gpu_split_auto: bool,
    #[serde(default)]
    pub gpu_split: Vec<f64>,
    #[serde(default)]
    pub cache_mode: CacheMode,
    /// Draft model loaded with every request, if any
    #[serde(default)]
    pub draft_model: Option<String>,
    #[serde(default)]
    pub draft_rope_scale: Option<f64>,
    #[serde(default)]
    pub draft_rope_alpha: Option<f64>,
    #[serde(default)]
    pub client: ClientConfig,
}

fn default_gpu_split_auto() -> bool {
    true
}

impl Default for ExtensionSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            url_override: None,
            auth_scheme: AuthScheme::default(),
            max_seq_len: None,
            rope_scale: None,
            rope_alpha: None,
            no_flash_attention: false,
            gpu_split_auto: true,
            gpu_split: Vec::new(),
            cache_mode: CacheMode::default(),
            draft_model: None,
            draft_rope_scale: None,
            draft_rope_alpha: None,
            client: ClientConfig::default(),
        }
    }
}

impl ExtensionSettings {
    /// Normalize values that cannot be sent as-is
    pub fn validate(&mut self) {
        if self
            .url_override
            .as_ref()
            .is_some_and(|url| url.trim().is_empty())
        {
            self.url_override = None;
        }

        if self.max_seq_len == Some(0) {
            self.max_seq_len = None;
        }

        for rope in [
            &mut self.rope_scale,
            &mut self.rope_alpha,
            &mut self.draft_rope_scale,
            &mut self.draft_rope_alpha,
        ] {
            if rope.is_some_and(|v| !v.is_finite() || v <= 0.0) {
                *rope = None;
            }
        }

        let before = self.gpu_split.len();
        self.gpu_split.retain(|v| v.is_finite() && *v >= 0.0);
        if self.gpu_split.len() != before {
            tracing::warn!(
                "Dropped {} invalid GPU split value(s)",
                before - self.gpu_split.len()
            );
        }

        if self
            .draft_model
            .as_ref()
            .is_some_and(|name| name.trim().is_empty())
        {
            self.draft_model = None;
        }
    }

    /// Server address and auth scheme, without a credential
    pub fn server_config(&self) -> ServerConfig {
        let url = self
            .url_override
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        ServerConfig::new(url).with_auth_scheme(self.auth_scheme.clone())
    }

    /// Build a load request for `model_id` from the stored tuning parameters
    pub fn to_load_request(&self, model_id: impl Into<String>) -> LoadRequest {
        LoadRequest {
            model_id: model_id.into(),
            max_seq_len: self.max_seq_len,
            rope_scale: self.rope_scale,
            rope_alpha: self.rope_alpha,
            no_flash_attention: self.no_flash_attention,
            gpu_split_auto: self.gpu_split_auto,
            gpu_split: self.gpu_split.clone(),
            cache_mode: self.cache_mode,
            draft: self.draft_model.as_ref().map(|name| DraftRequest {
                model_name: name.clone(),
                rope_scale: self.draft_rope_scale,
                rope_alpha: self.draft_rope_alpha,
            }),
        }
    }
}

// ============================================================================
// Migration
// ============================================================================

/// Bring raw settings JSON up to [`SETTINGS_VERSION`].
///
/// Each step handles exactly one version bump. Running it on current settings is a no-op.
pub fn migrate(mut raw: Value) -> Result<Value, StorageError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| StorageError::Migration("settings root is not an object".to_string()))?;

    let mut version = match obj.get("version") {
        None | Some(Value::Null) => 0,
        Some(v) => v
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| StorageError::Migration(format!("invalid version field: {}", v)))?,
    };

    if version > SETTINGS_VERSION {
        return Err(StorageError::Migration(format!(
            "settings version {} is newer than supported version {}",
            version, SETTINGS_VERSION
        )));
    }

    while version < SETTINGS_VERSION {
        raw = match version {
            0 => migrate_v0_to_v1(raw)?,
            v => {
                return Err(StorageError::Migration(format!(
                    "no migration from version {}",
                    v
                )))
            }
        };
        version += 1;
        tracing::info!("Migrated settings to version {}", version);
    }

    Ok(raw)
}

/// v0 stored the cache mode as a boolean `eightBitCache`
fn migrate_v0_to_v1(mut raw: Value) -> Result<Value, StorageError> {
    let obj = raw
        .as_object_mut()
        .ok_or_else(|| StorageError::Migration("settings root is not an object".to_string()))?;

    let eight_bit = obj
        .remove("eightBitCache")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if !obj.contains_key("cacheMode") {
        let mode = if eight_bit {
            CacheMode::Fp8
        } else {
            CacheMode::Fp16
        };
        obj.insert("cacheMode".to_string(), Value::String(mode.as_str().to_string()));
    }

    obj.insert("version".to_string(), Value::from(1u32));
    Ok(raw)
}

// ============================================================================
// Persistence
// ============================================================================

/// Get the settings file path
pub fn get_settings_path() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join("settings.json"))
}

/// Load settings from disk
///
/// Returns default settings if the file doesn't exist or is corrupted
pub fn load_settings() -> ExtensionSettings {
    match get_settings_path().and_then(|path| load_settings_from(&path)) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            ExtensionSettings::default()
        }
    }
}

/// Load, migrate and validate settings from a specific file
pub fn load_settings_from(path: &Path) -> Result<ExtensionSettings, StorageError> {
    if !path.exists() {
        tracing::info!("Settings file not found, using defaults");
        return Ok(ExtensionSettings::default());
    }

    let json = fs::read_to_string(path)?;
    let raw: Value = serde_json::from_str(&json)?;
    let mut settings: ExtensionSettings = serde_json::from_value(migrate(raw)?)?;
    settings.validate();

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Save settings to the default location
pub fn save_settings(settings: &ExtensionSettings) -> Result<(), StorageError> {
    save_settings_to(&get_settings_path()?, settings)
}

/// Save settings to a specific file
pub fn save_settings_to(path: &Path, settings: &ExtensionSettings) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut settings = settings.clone();
    settings.version = SETTINGS_VERSION;
    let json = serde_json::to_string_pretty(&settings)?;
    fs::write(path, json)?;

    tracing::debug!("Saved settings to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_settings() {
        let settings = ExtensionSettings::default();
        assert_eq!(settings.version, SETTINGS_VERSION);
        assert!(settings.gpu_split_auto);
        assert_eq!(settings.cache_mode, CacheMode::Fp16);
        assert_eq!(settings.auth_scheme, AuthScheme::AdminKey);
        assert_eq!(settings.server_config().base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_migrate_eight_bit_flag() {
        let migrated = migrate(json!({"eightBitCache": true, "maxSeqLen": 8192})).unwrap();
        assert_eq!(migrated["cacheMode"], "FP8");
        assert_eq!(migrated["version"], 1);
        assert!(migrated.get("eightBitCache").is_none());
        assert_eq!(migrated["maxSeqLen"], 8192);

        let migrated = migrate(json!({"eightBitCache": false})).unwrap();
        assert_eq!(migrated["cacheMode"], "FP16");

        let migrated = migrate(json!({})).unwrap();
        assert_eq!(migrated["cacheMode"], "FP16");
    }

    #[test]
    fn test_migrate_keeps_explicit_cache_mode() {
        let migrated = migrate(json!({"eightBitCache": true, "cacheMode": "Q4"})).unwrap();
        assert_eq!(migrated["cacheMode"], "Q4");
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let once = migrate(json!({"eightBitCache": true})).unwrap();
        let twice = migrate(once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_migrate_rejects_future_and_garbage() {
        assert!(matches!(
            migrate(json!({"version": 99})),
            Err(StorageError::Migration(_))
        ));
        assert!(migrate(json!({"version": "one"})).is_err());
        assert!(migrate(json!([1, 2])).is_err());
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = ExtensionSettings {
            url_override: Some("  ".to_string()),
            max_seq_len: Some(0),
            rope_alpha: Some(f64::INFINITY),
            gpu_split: vec![10.0, -2.0, 8.0],
            draft_model: Some(String::new()),
            ..Default::default()
        };
        settings.validate();
        assert!(settings.url_override.is_none());
        assert!(settings.max_seq_len.is_none());
        assert!(settings.rope_alpha.is_none());
        assert_eq!(settings.gpu_split, vec![10.0, 8.0]);
        assert!(settings.draft_model.is_none());
    }

    #[test]
    fn test_load_request_from_settings() {
        let settings = ExtensionSettings {
            max_seq_len: Some(4096),
            gpu_split_auto: false,
            gpu_split: vec![12.0],
            cache_mode: CacheMode::Q8,
            draft_model: Some("tiny".to_string()),
            draft_rope_alpha: Some(2.0),
            ..Default::default()
        };
        let req = settings.to_load_request("llama-7b");
        assert_eq!(req.model_id, "llama-7b");
        assert_eq!(req.max_seq_len, Some(4096));
        assert_eq!(req.cache_mode, CacheMode::Q8);
        assert!(!req.gpu_split_auto);
        let draft = req.draft.expect("draft missing");
        assert_eq!(draft.model_name, "tiny");
        assert_eq!(draft.rope_alpha, Some(2.0));
    }

    #[test]
    fn test_settings_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("settings.json");

        let settings = ExtensionSettings {
            url_override: Some("http://gpu-box:5000".to_string()),
            auth_scheme: AuthScheme::Bearer,
            cache_mode: CacheMode::Q6,
            ..Default::default()
        };
        save_settings_to(&path, &settings).unwrap();
        let loaded = load_settings_from(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_legacy_file_is_migrated_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"urlOverride":"http://old:5000","eightBitCache":true}"#).unwrap();

        let loaded = load_settings_from(&path).unwrap();
        assert_eq!(loaded.cache_mode, CacheMode::Fp8);
        assert_eq!(loaded.version, SETTINGS_VERSION);
        assert_eq!(loaded.server_config().base_url, "http://old:5000");
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_settings_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, ExtensionSettings::default());
    }
}

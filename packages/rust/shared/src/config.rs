//! Application configuration for the backfill tool.
//!
//! User config lives at `~/.backfill/backfill.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BackfillError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "backfill.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".backfill";

// ---------------------------------------------------------------------------
// Config structs (matching backfill.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Document store connection.
    #[serde(default)]
    pub store: StoreConfig,

    /// Source and reference collection names.
    #[serde(default)]
    pub collections: CollectionsConfig,

    /// Field names read and written by the pipeline.
    #[serde(default)]
    pub fields: FieldsConfig,
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the libSQL database file.
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    "backfill.db".into()
}

/// `[collections]` section. Names are opaque and not validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionsConfig {
    /// Collection whose records are missing the target attribute.
    #[serde(default = "default_source")]
    pub source: String,

    /// Collection the owner keys point into.
    #[serde(default = "default_reference")]
    pub reference: String,
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            reference: default_reference(),
        }
    }
}

fn default_source() -> String {
    "howtos".into()
}
fn default_reference() -> String {
    "users".into()
}

/// `[fields]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldsConfig {
    /// Record field holding the foreign key.
    #[serde(default = "default_owner_key")]
    pub owner_key: String,

    /// Record field to backfill.
    #[serde(default = "default_target")]
    pub target: String,

    /// Reference field matched against owner keys (natural identifier).
    #[serde(default = "default_reference_key")]
    pub reference_key: String,

    /// Reference field copied into the target.
    #[serde(default = "default_reference_value")]
    pub reference_value: String,

    /// Record field shown in per-update log lines. Falls back to the storage id.
    #[serde(default = "default_label")]
    pub label: String,
}

impl Default for FieldsConfig {
    fn default() -> Self {
        Self {
            owner_key: default_owner_key(),
            target: default_target(),
            reference_key: default_reference_key(),
            reference_value: default_reference_value(),
            label: default_label(),
        }
    }
}

fn default_owner_key() -> String {
    "_createdBy".into()
}
fn default_target() -> String {
    "creatorCountry".into()
}
fn default_reference_key() -> String {
    "userName".into()
}
fn default_reference_value() -> String {
    "country".into()
}
fn default_label() -> String {
    "_id".into()
}

// ---------------------------------------------------------------------------
// Backfill config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime backfill configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct BackfillConfig {
    /// Database file to open.
    pub db_path: PathBuf,
    /// Collection scanned for records.
    pub source_collection: String,
    /// Collection queried to resolve owner keys.
    pub reference_collection: String,
    /// Field mapping.
    pub fields: FieldsConfig,
    /// Plan and log updates without committing them.
    pub dry_run: bool,
}

impl From<&AppConfig> for BackfillConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            db_path: PathBuf::from(&config.store.path),
            source_collection: config.collections.source.clone(),
            reference_collection: config.collections.reference.clone(),
            fields: config.fields.clone(),
            dry_run: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.backfill/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| BackfillError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.backfill/backfill.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| BackfillError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| BackfillError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let path = config_file_path()?;
    init_config_at(&path)?;
    Ok(path)
}

/// Write a default config file at `path`, creating parent directories.
pub fn init_config_at(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| BackfillError::io(dir, e))?;
    }

    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| BackfillError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| BackfillError::io(path, e))?;
    tracing::info!(?path, "created default config file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("[collections]"));
        assert!(toml_str.contains("creatorCountry"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let toml_str = r#"
[collections]
source = "projects"

[fields]
target = "ownerRegion"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.collections.source, "projects");
        assert_eq!(config.collections.reference, "users");
        assert_eq!(config.fields.target, "ownerRegion");
        assert_eq!(config.fields.owner_key, "_createdBy");
        assert_eq!(config.store.path, "backfill.db");
    }

    #[test]
    fn backfill_config_from_app_config() {
        let app = AppConfig::default();
        let run = BackfillConfig::from(&app);
        assert_eq!(run.db_path, PathBuf::from("backfill.db"));
        assert_eq!(run.source_collection, "howtos");
        assert_eq!(run.reference_collection, "users");
        assert_eq!(run.fields.reference_key, "userName");
        assert!(!run.dry_run);
    }

    #[test]
    fn init_then_load_roundtrip() {
        let dir = std::env::temp_dir().join(format!(
            "backfill_cfg_{}_{}",
            std::process::id(),
            line!()
        ));
        let path = dir.join(CONFIG_FILE_NAME);
        init_config_at(&path).expect("init");

        let loaded = load_config_from(&path).expect("load");
        assert_eq!(loaded.fields, FieldsConfig::default());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = std::env::temp_dir().join(format!(
            "backfill_cfg_{}_{}",
            std::process::id(),
            line!()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[collections\nsource = ").unwrap();

        let err = load_config_from(&path).unwrap_err();
        assert!(matches!(err, BackfillError::Config { .. }));
        let _ = std::fs::remove_dir_all(&dir);
    }
}

//! Shared types, error model, and configuration for the backfill tool.
//!
//! This crate is the foundation depended on by all other backfill crates.
//! It provides:
//! - [`BackfillError`], the unified error type
//! - Domain types ([`Document`], [`FieldUpdate`], [`WriteBatch`])
//! - Configuration ([`AppConfig`], [`BackfillConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BackfillConfig, CollectionsConfig, FieldsConfig, StoreConfig, config_dir,
    config_file_path, init_config, init_config_at, load_config, load_config_from,
};
pub use error::{BackfillError, Result};
pub use types::{Document, FieldUpdate, WriteBatch};

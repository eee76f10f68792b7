//! Configuration loading, validation, and env substitution.
//!
//! Config files: `jobkeeper.toml`, `jobkeeper.yaml`, or `jobkeeper.json`
//! Searched in `./` then `~/.config/jobkeeper/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config},
    schema::{
        DatabaseConfig, DatabaseProvider, FileStorageConfig, JobkeeperConfig, LogsConfig,
        SchedulerConfig, StorageConfig, StorageKind,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate},
};

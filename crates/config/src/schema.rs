/// Config schema types (storage, scheduler, log retention).
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobkeeperConfig {
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
    pub logs: LogsConfig,
}

/// Which persistence backend holds job definitions and execution logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    File,
    Database,
}

impl std::str::FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "database" | "db" => Ok(Self::Database),
            other => Err(format!("unknown storage kind: {other} (expected file|database)")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub kind: StorageKind,
    pub file: FileStorageConfig,
    pub database: DatabaseConfig,
}

/// JSON document storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStorageConfig {
    /// Directory holding `jobs.json` and `logs.json`.
    pub path: PathBuf,
    /// Copy `jobs.json` into `backup_path` before every overwrite.
    pub backup_enabled: bool,
    pub backup_path: PathBuf,
    /// Oldest backups beyond this count are deleted.
    pub max_backups: usize,
}

impl Default for FileStorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("jobkeeper_data"),
            backup_enabled: true,
            backup_path: PathBuf::from("jobkeeper_data").join("backups"),
            max_backups: 10,
        }
    }
}

/// Relational database provider. SQLite is the only one compiled in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseProvider {
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub provider: DatabaseProvider,
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            provider: DatabaseProvider::Sqlite,
            url: "sqlite://jobkeeper.db?mode=rwc".into(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of job bodies executing at once. `0` means the default.
    pub thread_pool_size: usize,
    /// Seconds between reconciliation sweeps of a running daemon, so changes
    /// made by admin commands in other processes reach its triggers. `0`
    /// sweeps only at startup.
    pub reconcile_interval_secs: u64,
}

impl SchedulerConfig {
    pub const DEFAULT_POOL_SIZE: usize = 10;

    #[must_use]
    pub fn effective_pool_size(&self) -> usize {
        if self.thread_pool_size == 0 {
            Self::DEFAULT_POOL_SIZE
        } else {
            self.thread_pool_size
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_pool_size: Self::DEFAULT_POOL_SIZE,
            reconcile_interval_secs: 30,
        }
    }
}

/// Execution log retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    pub retention_days: u32,
    pub purge_interval_secs: u64,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            purge_interval_secs: 86_400,
        }
    }
}

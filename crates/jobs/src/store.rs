//! Persistence contract for job definitions and execution logs.

use std::sync::Arc;

use {async_trait::async_trait, jobkeeper_common::time::{MS_PER_DAY, now_ms}, tracing::info};

use jobkeeper_config::{StorageConfig, StorageKind};

use crate::{
    Result,
    query::{JobQuery, LogFilter, LogQuery, Page},
    store_file::FileStore,
    store_sqlite::SqliteStore,
    types::{ExecutionLog, JobDefinition, JobKey, JobStatus},
};

/// Persistence backend for job definitions and execution history.
///
/// Every keyed operation matches the name case-insensitively and the group
/// exactly. Missing or duplicate records are reported as `Ok(false)` /
/// `Ok(None)`; only I/O and decoding problems are errors.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create files or tables. Safe to call more than once.
    async fn initialize(&self) -> Result<()>;
    fn is_initialized(&self) -> bool;

    /// Insert a new definition. `false` if the identity already exists.
    async fn add_job(&self, job: &JobDefinition) -> Result<bool>;
    /// Overwrite every mutable field of the stored definition with the same identity.
    async fn update_job(&self, job: &JobDefinition) -> Result<bool>;
    async fn delete_job(&self, key: &JobKey) -> Result<bool>;
    async fn get_job(&self, key: &JobKey) -> Result<Option<JobDefinition>>;
    async fn list_jobs(&self, query: &JobQuery) -> Result<Page<JobDefinition>>;
    async fn all_jobs(&self) -> Result<Vec<JobDefinition>>;
    async fn update_job_status(&self, key: &JobKey, status: JobStatus) -> Result<bool>;
    /// Touches only the fire timestamps.
    async fn update_fire_times(
        &self,
        key: &JobKey,
        last_fire_at_ms: Option<u64>,
        next_fire_at_ms: Option<u64>,
    ) -> Result<bool>;

    async fn add_log(&self, log: &ExecutionLog) -> Result<()>;
    async fn list_logs(&self, query: &LogQuery) -> Result<Page<ExecutionLog>>;
    /// Delete logs created strictly before `cutoff_ms`. Returns the number removed.
    async fn purge_logs_before(&self, cutoff_ms: u64) -> Result<u64>;
    /// Delete every log matching `filter`. Returns the number removed.
    async fn clear_logs(&self, filter: &LogFilter) -> Result<u64>;

    /// Delete logs older than `retention_days` days.
    async fn purge_expired_logs(&self, retention_days: u32) -> Result<u64> {
        let cutoff = now_ms().saturating_sub(u64::from(retention_days) * MS_PER_DAY);
        self.purge_logs_before(cutoff).await
    }
}

/// Open and initialize the backend selected by `cfg.kind`.
pub async fn open_store(cfg: &StorageConfig) -> Result<Arc<dyn JobStore>> {
    let store: Arc<dyn JobStore> = match cfg.kind {
        StorageKind::File => Arc::new(FileStore::new(cfg.file.clone())),
        StorageKind::Database => Arc::new(SqliteStore::connect(&cfg.database).await?),
    };
    store.initialize().await?;
    info!(kind = ?cfg.kind, "job store ready");
    Ok(store)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::types::JobCreate, tempfile::TempDir};

    #[tokio::test]
    async fn test_open_file_store() {
        let tmp = TempDir::new().unwrap();
        let mut cfg = StorageConfig::default();
        cfg.file.path = tmp.path().join("data");
        cfg.file.backup_path = tmp.path().join("backups");

        let store = open_store(&cfg).await.unwrap();
        assert!(store.is_initialized());
        assert!(tmp.path().join("data").join("jobs.json").exists());
    }

    #[tokio::test]
    async fn test_open_database_store() {
        let mut cfg = StorageConfig {
            kind: StorageKind::Database,
            ..Default::default()
        };
        cfg.database.url = "sqlite::memory:".into();
        cfg.database.max_connections = 1;

        let store = open_store(&cfg).await.unwrap();
        assert!(store.is_initialized());
        let job = JobCreate::new("a", "g", "0 * * * * ?", "demo").into_definition(1);
        assert!(store.add_job(&job).await.unwrap());
    }
}

//! In-memory store for testing.

use std::sync::atomic::{AtomicBool, Ordering};

use {async_trait::async_trait, jobkeeper_common::time::now_ms, tokio::sync::RwLock};

use crate::{
    Result,
    query::{JobQuery, LogFilter, LogQuery, Page, query_jobs, query_logs},
    store::JobStore,
    types::{ExecutionLog, JobDefinition, JobKey, JobStatus},
};

/// Non-persistent store honoring the same identity and paging rules as the
/// durable backends.
#[derive(Default)]
pub struct InMemoryStore {
    jobs: RwLock<Vec<JobDefinition>>,
    logs: RwLock<Vec<ExecutionLog>>,
    initialized: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn initialize(&self) -> Result<()> {
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    async fn add_job(&self, job: &JobDefinition) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        if jobs.iter().any(|j| j.is_keyed(&job.key())) {
            return Ok(false);
        }
        jobs.push(job.clone());
        Ok(true)
    }

    async fn update_job(&self, job: &JobDefinition) -> Result<bool> {
        let key = job.key();
        let mut jobs = self.jobs.write().await;
        Ok(match jobs.iter_mut().find(|j| j.is_keyed(&key)) {
            Some(stored) => {
                stored.apply_update(job);
                true
            },
            None => false,
        })
    }

    async fn delete_job(&self, key: &JobKey) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|j| !j.is_keyed(key));
        Ok(jobs.len() != before)
    }

    async fn get_job(&self, key: &JobKey) -> Result<Option<JobDefinition>> {
        let jobs = self.jobs.read().await;
        Ok(jobs.iter().find(|j| j.is_keyed(key)).cloned())
    }

    async fn list_jobs(&self, query: &JobQuery) -> Result<Page<JobDefinition>> {
        Ok(query_jobs(self.jobs.read().await.clone(), query))
    }

    async fn all_jobs(&self) -> Result<Vec<JobDefinition>> {
        Ok(self.jobs.read().await.clone())
    }

    async fn update_job_status(&self, key: &JobKey, status: JobStatus) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        Ok(match jobs.iter_mut().find(|j| j.is_keyed(key)) {
            Some(stored) => {
                stored.status = status;
                stored.updated_at_ms = now_ms();
                true
            },
            None => false,
        })
    }

    async fn update_fire_times(
        &self,
        key: &JobKey,
        last_fire_at_ms: Option<u64>,
        next_fire_at_ms: Option<u64>,
    ) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        Ok(match jobs.iter_mut().find(|j| j.is_keyed(key)) {
            Some(stored) => {
                stored.last_fire_at_ms = last_fire_at_ms;
                stored.next_fire_at_ms = next_fire_at_ms;
                true
            },
            None => false,
        })
    }

    async fn add_log(&self, log: &ExecutionLog) -> Result<()> {
        self.logs.write().await.push(log.clone());
        Ok(())
    }

    async fn list_logs(&self, query: &LogQuery) -> Result<Page<ExecutionLog>> {
        Ok(query_logs(self.logs.read().await.clone(), query))
    }

    async fn purge_logs_before(&self, cutoff_ms: u64) -> Result<u64> {
        let mut logs = self.logs.write().await;
        let before = logs.len();
        logs.retain(|l| l.created_at_ms >= cutoff_ms);
        Ok((before - logs.len()) as u64)
    }

    async fn clear_logs(&self, filter: &LogFilter) -> Result<u64> {
        let mut logs = self.logs.write().await;
        let before = logs.len();
        logs.retain(|l| !filter.matches(l));
        Ok((before - logs.len()) as u64)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::types::JobCreate, jobkeeper_common::time::MS_PER_DAY};

    fn make_job(name: &str) -> JobDefinition {
        JobCreate::new(name, "g", "0 * * * * ?", "demo").into_definition(now_ms())
    }

    #[tokio::test]
    async fn test_identity_rules_match_durable_backends() {
        let store = InMemoryStore::new();
        assert!(store.add_job(&make_job("Sync")).await.unwrap());
        assert!(!store.add_job(&make_job("SYNC")).await.unwrap());
        assert!(store.get_job(&JobKey::new("sync", "g")).await.unwrap().is_some());
        assert!(store.get_job(&JobKey::new("sync", "G")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_and_clear() {
        let store = InMemoryStore::new();
        let key = JobKey::new("a", "g");
        let now = now_ms();
        store
            .add_log(&ExecutionLog::begin(&key, &key, now, now - 40 * MS_PER_DAY))
            .await
            .unwrap();
        store
            .add_log(&ExecutionLog::begin(&key, &key, now, now - 5 * MS_PER_DAY))
            .await
            .unwrap();
        assert_eq!(store.purge_expired_logs(30).await.unwrap(), 1);
        assert_eq!(store.clear_logs(&LogFilter::default()).await.unwrap(), 1);
        assert_eq!(store.list_logs(&LogQuery::default()).await.unwrap().total, 0);
    }
}

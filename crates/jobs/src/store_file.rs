//! JSON document store: `jobs.json` and `logs.json` with atomic writes and
//! timestamped backups of the definitions document.

use std::{
    fs::{self, File, OpenOptions},
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use {
    async_trait::async_trait,
    fd_lock::RwLock,
    jobkeeper_common::time::now_ms,
    jobkeeper_config::FileStorageConfig,
    serde::{Serialize, de::DeserializeOwned},
    tokio::sync::Mutex,
    tracing::{debug, warn},
};

use crate::{
    Error, Result,
    query::{JobQuery, LogFilter, LogQuery, Page, query_jobs, query_logs},
    store::JobStore,
    types::{ExecutionLog, JobDefinition, JobKey, JobStatus},
};

const JOBS_FILE: &str = "jobs.json";
const LOGS_FILE: &str = "logs.json";

#[derive(Debug, Clone)]
struct BackupPolicy {
    dir: PathBuf,
    max_files: usize,
}

/// One JSON array on disk.
///
/// Readers take a shared `fd-lock`; writers hold `gate` for the whole
/// read-modify-write so concurrent updates in this process never lose each
/// other's changes, and take the exclusive `fd-lock` while swapping the file.
struct JsonDocument {
    path: PathBuf,
    gate: Mutex<()>,
    backup: Option<BackupPolicy>,
}

impl JsonDocument {
    fn new(path: PathBuf, backup: Option<BackupPolicy>) -> Self {
        Self {
            path,
            gate: Mutex::new(()),
            backup,
        }
    }

    async fn load<T: DeserializeOwned + Send + 'static>(&self) -> Result<Vec<T>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_array(&path))
            .await
            .map_err(|e| Error::external("file store read task", e))?
    }

    /// Read, apply `f`, and write back when `f` reports a change.
    async fn update<T, R, F>(&self, f: F) -> Result<R>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(&mut Vec<T>) -> (R, bool),
    {
        let _guard = self.gate.lock().await;
        let mut items = self.load::<T>().await?;
        let (result, changed) = f(&mut items);
        if changed {
            let path = self.path.clone();
            let backup = self.backup.clone();
            tokio::task::spawn_blocking(move || write_array(&path, &items, backup.as_ref()))
                .await
                .map_err(|e| Error::external("file store write task", e))??;
        }
        Ok(result)
    }
}

fn read_array<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let lock = RwLock::new(File::open(path)?);
    let mut raw = String::new();
    {
        let guard = lock.read()?;
        (&*guard).read_to_string(&mut raw)?;
    }
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&raw)?)
}

fn write_array<T: Serialize>(path: &Path, items: &[T], backup: Option<&BackupPolicy>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if let Some(policy) = backup
        && path.exists()
        && let Err(e) = write_backup(path, policy)
    {
        warn!(path = %path.display(), error = %e, "backup failed, continuing with write");
    }

    let json = serde_json::to_string_pretty(items)?;
    let tmp = path.with_extension("json.tmp");

    let target = OpenOptions::new().create(true).append(true).open(path)?;
    let mut lock = RwLock::new(target);
    let _guard = lock.write()?;
    {
        let mut file = File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Copy the current document to `<stem>_<yyyyMMdd_HHmmss_SSS>.json` and
/// prune the oldest copies beyond the limit. Writes within the same
/// millisecond get a `_NNN` sequence suffix.
fn write_backup(path: &Path, policy: &BackupPolicy) -> Result<()> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("jobs");
    fs::create_dir_all(&policy.dir)?;
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f").to_string();
    let mut dest = policy.dir.join(format!("{stem}_{stamp}.json"));
    let mut seq = 0u32;
    while dest.exists() {
        seq += 1;
        dest = policy.dir.join(format!("{stem}_{stamp}_{seq:03}.json"));
    }
    fs::copy(path, &dest)?;
    debug!(backup = %dest.display(), "wrote backup");
    prune_backups(&policy.dir, stem, policy.max_files)
}

fn prune_backups(dir: &Path, stem: &str, max_files: usize) -> Result<()> {
    let prefix = format!("{stem}_");
    let mut backups: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".json"))
        })
        .collect();
    if backups.len() <= max_files {
        return Ok(());
    }
    // Timestamped names sort chronologically.
    backups.sort();
    let excess = backups.len() - max_files;
    for old in backups.into_iter().take(excess) {
        fs::remove_file(&old)?;
        debug!(backup = %old.display(), "pruned backup");
    }
    Ok(())
}

/// File-backed store rooted at `FileStorageConfig::path`.
pub struct FileStore {
    dir: PathBuf,
    backup_dir: Option<PathBuf>,
    jobs: JsonDocument,
    logs: JsonDocument,
    initialized: AtomicBool,
}

impl FileStore {
    pub fn new(cfg: FileStorageConfig) -> Self {
        let backup = cfg.backup_enabled.then(|| BackupPolicy {
            dir: cfg.backup_path.clone(),
            max_files: cfg.max_backups,
        });
        Self {
            jobs: JsonDocument::new(cfg.path.join(JOBS_FILE), backup.clone()),
            logs: JsonDocument::new(cfg.path.join(LOGS_FILE), None),
            backup_dir: backup.map(|b| b.dir),
            dir: cfg.path,
            initialized: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl JobStore for FileStore {
    async fn initialize(&self) -> Result<()> {
        let dir = self.dir.clone();
        let backup_dir = self.backup_dir.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            fs::create_dir_all(&dir)?;
            if let Some(backup_dir) = backup_dir {
                fs::create_dir_all(backup_dir)?;
            }
            for name in [JOBS_FILE, LOGS_FILE] {
                let path = dir.join(name);
                if !path.exists() {
                    fs::write(&path, "[]")?;
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| Error::external("file store init task", e))??;
        self.initialized.store(true, Ordering::Release);
        debug!(dir = %self.dir.display(), "file store initialized");
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    async fn add_job(&self, job: &JobDefinition) -> Result<bool> {
        let job = job.clone();
        self.jobs
            .update(move |jobs: &mut Vec<JobDefinition>| {
                if jobs.iter().any(|j| job.key().matches(&j.name, &j.group)) {
                    return (false, false);
                }
                jobs.push(job);
                (true, true)
            })
            .await
    }

    async fn update_job(&self, job: &JobDefinition) -> Result<bool> {
        let key = job.key();
        self.jobs
            .update(|jobs: &mut Vec<JobDefinition>| {
                match jobs.iter_mut().find(|j| j.is_keyed(&key)) {
                    Some(stored) => {
                        stored.apply_update(job);
                        (true, true)
                    },
                    None => (false, false),
                }
            })
            .await
    }

    async fn delete_job(&self, key: &JobKey) -> Result<bool> {
        self.jobs
            .update(|jobs: &mut Vec<JobDefinition>| {
                let before = jobs.len();
                jobs.retain(|j| !j.is_keyed(key));
                let removed = jobs.len() != before;
                (removed, removed)
            })
            .await
    }

    async fn get_job(&self, key: &JobKey) -> Result<Option<JobDefinition>> {
        let jobs = self.jobs.load::<JobDefinition>().await?;
        Ok(jobs.into_iter().find(|j| j.is_keyed(key)))
    }

    async fn list_jobs(&self, query: &JobQuery) -> Result<Page<JobDefinition>> {
        Ok(query_jobs(self.jobs.load().await?, query))
    }

    async fn all_jobs(&self) -> Result<Vec<JobDefinition>> {
        self.jobs.load().await
    }

    async fn update_job_status(&self, key: &JobKey, status: JobStatus) -> Result<bool> {
        let now = now_ms();
        self.jobs
            .update(|jobs: &mut Vec<JobDefinition>| {
                match jobs.iter_mut().find(|j| j.is_keyed(key)) {
                    Some(stored) => {
                        stored.status = status;
                        stored.updated_at_ms = now;
                        (true, true)
                    },
                    None => (false, false),
                }
            })
            .await
    }

    async fn update_fire_times(
        &self,
        key: &JobKey,
        last_fire_at_ms: Option<u64>,
        next_fire_at_ms: Option<u64>,
    ) -> Result<bool> {
        self.jobs
            .update(|jobs: &mut Vec<JobDefinition>| {
                match jobs.iter_mut().find(|j| j.is_keyed(key)) {
                    Some(stored) => {
                        stored.last_fire_at_ms = last_fire_at_ms;
                        stored.next_fire_at_ms = next_fire_at_ms;
                        (true, true)
                    },
                    None => (false, false),
                }
            })
            .await
    }

    async fn add_log(&self, log: &ExecutionLog) -> Result<()> {
        let log = log.clone();
        self.logs
            .update(move |logs: &mut Vec<ExecutionLog>| {
                logs.push(log);
                ((), true)
            })
            .await
    }

    async fn list_logs(&self, query: &LogQuery) -> Result<Page<ExecutionLog>> {
        Ok(query_logs(self.logs.load().await?, query))
    }

    async fn purge_logs_before(&self, cutoff_ms: u64) -> Result<u64> {
        self.logs
            .update(|logs: &mut Vec<ExecutionLog>| {
                let before = logs.len();
                logs.retain(|l| l.created_at_ms >= cutoff_ms);
                let removed = (before - logs.len()) as u64;
                (removed, removed > 0)
            })
            .await
    }

    async fn clear_logs(&self, filter: &LogFilter) -> Result<u64> {
        self.logs
            .update(|logs: &mut Vec<ExecutionLog>| {
                let before = logs.len();
                logs.retain(|l| !filter.matches(l));
                let removed = (before - logs.len()) as u64;
                (removed, removed > 0)
            })
            .await
    }
}

//! Scheduled-job lifecycle: durable job definitions and execution history,
//! reconciliation of stored jobs against a live scheduler, and analytics
//! over the recorded runs.
//!
//! Definitions and logs live behind [`store::JobStore`] (JSON files or
//! SQLite). [`service::JobService`] keeps a [`scheduler::Scheduler`] in line
//! with storage, and [`listener::ExecutionListener`] writes one log record per
//! firing.

pub mod analytics;
pub mod codec;
pub mod error;
pub mod http_job;
pub mod listener;
pub mod query;
pub mod registry;
pub mod schedule;
pub mod scheduler;
pub mod scheduler_local;
pub mod service;
pub mod store;
pub mod store_file;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;

pub use {
    error::{Context, Error, Result},
    registry::{Job, JobContext, JobMetadata, JobRegistry},
    service::JobService,
    store::{JobStore, open_store},
    types::{ExecutionLog, JobCreate, JobDefinition, JobKey, JobKind, JobStatus, LogStatus},
};

/// Run database migrations for the jobs crate.
///
/// Creates the `job_definitions` and `job_logs` tables. Called by
/// [`store_sqlite::SqliteStore`] during initialization.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}

//! SQLite-backed job store using sqlx.

use std::sync::atomic::{AtomicBool, Ordering};

use {
    async_trait::async_trait,
    jobkeeper_common::time::now_ms,
    jobkeeper_config::DatabaseConfig,
    sqlx::{
        QueryBuilder, Row, Sqlite, SqlitePool,
        sqlite::{SqlitePoolOptions, SqliteRow},
    },
    tracing::debug,
};

use crate::{
    Context, Error, Result,
    query::{JobFilter, JobQuery, LogFilter, LogQuery, Page, PageRequest, SortField},
    store::JobStore,
    types::{ExecutionLog, JobDefinition, JobKey, JobKind, JobStatus, LogStatus},
};

const JOB_COLUMNS: &str = "name, job_group, trigger_name, trigger_group, cron_expression, \
     description, kind, target, job_data, start_at_ms, end_at_ms, enabled, status, \
     last_fire_at_ms, next_fire_at_ms, created_at_ms, created_by, updated_at_ms, updated_by";

const LOG_COLUMNS: &str = "id, job_name, job_group, trigger_name, trigger_group, started_at_ms, \
     finished_at_ms, duration_ms, status, message, error_message, exception, job_data, \
     created_at_ms";

/// SQLite-backed persistence for job definitions and execution logs.
pub struct SqliteStore {
    pool: SqlitePool,
    initialized: AtomicBool,
}

impl SqliteStore {
    /// Open a pool for `cfg.url`. Call [`JobStore::initialize`] before use.
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self> {
        let in_memory = cfg.url.contains(":memory:");
        let mut options = SqlitePoolOptions::new().max_connections(if in_memory {
            1
        } else {
            cfg.max_connections.max(1)
        });
        if in_memory {
            // Every connection to `:memory:` is its own database.
            options = options.idle_timeout(None).max_lifetime(None);
        }
        let pool = options
            .connect(&cfg.url)
            .await
            .with_context(|| format!("failed to connect to {}", cfg.url))?;
        Ok(Self::with_pool(pool))
    }

    /// Wrap an existing pool. Migrations run on [`JobStore::initialize`].
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            initialized: AtomicBool::new(false),
        }
    }
}

fn to_db(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

fn opt_to_db(ms: Option<u64>) -> Option<i64> {
    ms.map(to_db)
}

fn from_db(v: i64) -> u64 {
    v.max(0) as u64
}

fn opt_from_db(v: Option<i64>) -> Option<u64> {
    v.map(from_db)
}

/// `%needle%` with LIKE wildcards in the needle escaped by `\`.
fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.to_ascii_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn push_like(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, needle: &str) {
    qb.push(" AND lower(")
        .push(column)
        .push(") LIKE ")
        .push_bind(like_pattern(needle))
        .push(" ESCAPE '\\'");
}

fn push_job_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &JobFilter) {
    if let Some(name) = filter.name_pattern() {
        push_like(qb, "name", name);
    }
    if let Some(group) = filter.group_pattern() {
        push_like(qb, "job_group", group);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.code());
    }
    if let Some(enabled) = filter.enabled {
        qb.push(" AND enabled = ").push_bind(enabled);
    }
}

fn push_log_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &LogFilter) {
    if let Some(name) = filter.name_pattern() {
        push_like(qb, "job_name", name);
    }
    if let Some(group) = filter.group_pattern() {
        push_like(qb, "job_group", group);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.code());
    }
    if let Some(from) = filter.started_from_ms {
        qb.push(" AND started_at_ms >= ").push_bind(to_db(from));
    }
    if let Some(to) = filter.started_to_ms {
        qb.push(" AND started_at_ms <= ").push_bind(to_db(to));
    }
}

fn push_page(qb: &mut QueryBuilder<'_, Sqlite>, page: PageRequest) {
    qb.push(" LIMIT ")
        .push_bind(i64::from(page.page_size))
        .push(" OFFSET ")
        .push_bind(to_db(page.offset()));
}

fn row_to_job(row: &SqliteRow) -> Result<JobDefinition> {
    let status: i64 = row.try_get("status")?;
    let kind: i64 = row.try_get("kind")?;
    Ok(JobDefinition {
        name: row.try_get("name")?,
        group: row.try_get("job_group")?,
        trigger_name: row.try_get("trigger_name")?,
        trigger_group: row.try_get("trigger_group")?,
        cron_expression: row.try_get("cron_expression")?,
        description: row.try_get("description")?,
        kind: JobKind::from_code(kind).ok_or(Error::Corrupt {
            field: "kind",
            value: kind,
        })?,
        target: row.try_get("target")?,
        job_data: row.try_get("job_data")?,
        start_at_ms: opt_from_db(row.try_get("start_at_ms")?),
        end_at_ms: opt_from_db(row.try_get("end_at_ms")?),
        enabled: row.try_get("enabled")?,
        status: JobStatus::from_code(status).ok_or(Error::Corrupt {
            field: "status",
            value: status,
        })?,
        last_fire_at_ms: opt_from_db(row.try_get("last_fire_at_ms")?),
        next_fire_at_ms: opt_from_db(row.try_get("next_fire_at_ms")?),
        created_at_ms: from_db(row.try_get("created_at_ms")?),
        created_by: row.try_get("created_by")?,
        updated_at_ms: from_db(row.try_get("updated_at_ms")?),
        updated_by: row.try_get("updated_by")?,
    })
}

fn row_to_log(row: &SqliteRow) -> Result<ExecutionLog> {
    let status: i64 = row.try_get("status")?;
    Ok(ExecutionLog {
        id: row.try_get("id")?,
        job_name: row.try_get("job_name")?,
        job_group: row.try_get("job_group")?,
        trigger_name: row.try_get("trigger_name")?,
        trigger_group: row.try_get("trigger_group")?,
        started_at_ms: from_db(row.try_get("started_at_ms")?),
        finished_at_ms: opt_from_db(row.try_get("finished_at_ms")?),
        duration_ms: opt_from_db(row.try_get("duration_ms")?),
        status: LogStatus::from_code(status).ok_or(Error::Corrupt {
            field: "log status",
            value: status,
        })?,
        message: row.try_get("message")?,
        error_message: row.try_get("error_message")?,
        exception: row.try_get("exception")?,
        job_data: row.try_get("job_data")?,
        created_at_ms: from_db(row.try_get("created_at_ms")?),
    })
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn initialize(&self) -> Result<()> {
        crate::run_migrations(&self.pool).await?;
        self.initialized.store(true, Ordering::Release);
        debug!("sqlite store initialized");
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    async fn add_job(&self, job: &JobDefinition) -> Result<bool> {
        let sql = format!(
            "INSERT INTO job_definitions ({JOB_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT DO NOTHING"
        );
        let result = sqlx::query(&sql)
            .bind(&job.name)
            .bind(&job.group)
            .bind(&job.trigger_name)
            .bind(&job.trigger_group)
            .bind(&job.cron_expression)
            .bind(&job.description)
            .bind(job.kind.code())
            .bind(&job.target)
            .bind(&job.job_data)
            .bind(opt_to_db(job.start_at_ms))
            .bind(opt_to_db(job.end_at_ms))
            .bind(job.enabled)
            .bind(job.status.code())
            .bind(opt_to_db(job.last_fire_at_ms))
            .bind(opt_to_db(job.next_fire_at_ms))
            .bind(to_db(job.created_at_ms))
            .bind(&job.created_by)
            .bind(to_db(job.updated_at_ms))
            .bind(&job.updated_by)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_job(&self, job: &JobDefinition) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE job_definitions SET
                trigger_name = ?, trigger_group = ?, cron_expression = ?, description = ?,
                kind = ?, target = ?, job_data = ?, start_at_ms = ?, end_at_ms = ?,
                enabled = ?, status = ?, last_fire_at_ms = ?, next_fire_at_ms = ?,
                updated_at_ms = ?, updated_by = ?
             WHERE name = ? COLLATE NOCASE AND job_group = ?",
        )
        .bind(&job.trigger_name)
        .bind(&job.trigger_group)
        .bind(&job.cron_expression)
        .bind(&job.description)
        .bind(job.kind.code())
        .bind(&job.target)
        .bind(&job.job_data)
        .bind(opt_to_db(job.start_at_ms))
        .bind(opt_to_db(job.end_at_ms))
        .bind(job.enabled)
        .bind(job.status.code())
        .bind(opt_to_db(job.last_fire_at_ms))
        .bind(opt_to_db(job.next_fire_at_ms))
        .bind(to_db(job.updated_at_ms))
        .bind(&job.updated_by)
        .bind(&job.name)
        .bind(&job.group)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_job(&self, key: &JobKey) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM job_definitions WHERE name = ? COLLATE NOCASE AND job_group = ?")
                .bind(&key.name)
                .bind(&key.group)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_job(&self, key: &JobKey) -> Result<Option<JobDefinition>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM job_definitions
             WHERE name = ? COLLATE NOCASE AND job_group = ?"
        );
        let row = sqlx::query(&sql)
            .bind(&key.name)
            .bind(&key.group)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn list_jobs(&self, query: &JobQuery) -> Result<Page<JobDefinition>> {
        let mut tx = self.pool.begin().await?;

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM job_definitions WHERE 1=1");
        push_job_filter(&mut count, &query.filter);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&mut *tx).await?;

        let mut select = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {JOB_COLUMNS} FROM job_definitions WHERE 1=1"
        ));
        push_job_filter(&mut select, &query.filter);
        select
            .push(" ORDER BY ")
            .push(query.sort.field.column())
            .push(" ")
            .push(query.sort.order.sql())
            .push(", rowid ASC");
        push_page(&mut select, query.page);
        let rows = select.build().fetch_all(&mut *tx).await?;

        tx.commit().await?;

        Ok(Page {
            items: rows.iter().map(row_to_job).collect::<Result<_>>()?,
            total: from_db(total),
            page: query.page.page,
            page_size: query.page.page_size,
        })
    }

    async fn all_jobs(&self) -> Result<Vec<JobDefinition>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM job_definitions ORDER BY rowid ASC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_job).collect()
    }

    async fn update_job_status(&self, key: &JobKey, status: JobStatus) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE job_definitions SET status = ?, updated_at_ms = ?
             WHERE name = ? COLLATE NOCASE AND job_group = ?",
        )
        .bind(status.code())
        .bind(to_db(now_ms()))
        .bind(&key.name)
        .bind(&key.group)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_fire_times(
        &self,
        key: &JobKey,
        last_fire_at_ms: Option<u64>,
        next_fire_at_ms: Option<u64>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE job_definitions SET last_fire_at_ms = ?, next_fire_at_ms = ?
             WHERE name = ? COLLATE NOCASE AND job_group = ?",
        )
        .bind(opt_to_db(last_fire_at_ms))
        .bind(opt_to_db(next_fire_at_ms))
        .bind(&key.name)
        .bind(&key.group)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_log(&self, log: &ExecutionLog) -> Result<()> {
        let sql = format!(
            "INSERT INTO job_logs ({LOG_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(&log.id)
            .bind(&log.job_name)
            .bind(&log.job_group)
            .bind(&log.trigger_name)
            .bind(&log.trigger_group)
            .bind(to_db(log.started_at_ms))
            .bind(opt_to_db(log.finished_at_ms))
            .bind(opt_to_db(log.duration_ms))
            .bind(log.status.code())
            .bind(&log.message)
            .bind(&log.error_message)
            .bind(&log.exception)
            .bind(&log.job_data)
            .bind(to_db(log.created_at_ms))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_logs(&self, query: &LogQuery) -> Result<Page<ExecutionLog>> {
        let mut tx = self.pool.begin().await?;

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM job_logs WHERE 1=1");
        push_log_filter(&mut count, &query.filter);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&mut *tx).await?;

        let mut select =
            QueryBuilder::<Sqlite>::new(format!("SELECT {LOG_COLUMNS} FROM job_logs WHERE 1=1"));
        push_log_filter(&mut select, &query.filter);
        select
            .push(" ORDER BY ")
            .push(query.sort.field.column())
            .push(" ")
            .push(query.sort.order.sql())
            .push(", rowid ASC");
        push_page(&mut select, query.page);
        let rows = select.build().fetch_all(&mut *tx).await?;

        tx.commit().await?;

        Ok(Page {
            items: rows.iter().map(row_to_log).collect::<Result<_>>()?,
            total: from_db(total),
            page: query.page.page,
            page_size: query.page.page_size,
        })
    }

    async fn purge_logs_before(&self, cutoff_ms: u64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM job_logs WHERE created_at_ms < ?")
            .bind(to_db(cutoff_ms))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn clear_logs(&self, filter: &LogFilter) -> Result<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM job_logs WHERE 1=1");
        push_log_filter(&mut qb, filter);
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

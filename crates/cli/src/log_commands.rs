use {
    clap::{Args, Subcommand},
    jobkeeper_jobs::{
        LogStatus,
        query::{LogFilter, LogQuery, PageRequest, Sort},
    },
    serde_json::json,
};

use crate::{print_json, runtime::Runtime};

#[derive(Args)]
pub struct LogFilterArgs {
    /// Case-insensitive substring of the job name.
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    group: Option<String>,
    /// running, success or failed.
    #[arg(long)]
    status: Option<String>,
    /// Earliest start time, epoch milliseconds.
    #[arg(long)]
    from_ms: Option<u64>,
    /// Latest start time, epoch milliseconds.
    #[arg(long)]
    to_ms: Option<u64>,
}

impl LogFilterArgs {
    fn into_filter(self) -> anyhow::Result<LogFilter> {
        Ok(LogFilter {
            name: self.name,
            group: self.group,
            status: self.status.map(|s| s.parse::<LogStatus>()).transpose()?,
            started_from_ms: self.from_ms,
            started_to_ms: self.to_ms,
        })
    }
}

#[derive(Subcommand)]
pub enum LogAction {
    /// List execution logs.
    List {
        #[command(flatten)]
        filter: LogFilterArgs,
        #[arg(long)]
        sort_by: Option<String>,
        /// asc or desc.
        #[arg(long)]
        order: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        page_size: u32,
    },
    /// Delete logs older than the retention period.
    Purge {
        /// Overrides `logs.retention_days`.
        #[arg(long)]
        days: Option<u32>,
    },
    /// Delete every log matching the filter.
    Clear {
        #[command(flatten)]
        filter: LogFilterArgs,
    },
}

pub async fn handle_logs(rt: &Runtime, action: LogAction) -> anyhow::Result<()> {
    match action {
        LogAction::List {
            filter,
            sort_by,
            order,
            page,
            page_size,
        } => {
            let query = LogQuery {
                filter: filter.into_filter()?,
                sort: Sort::parse(sort_by.as_deref(), order.as_deref()),
                page: PageRequest::new(page, page_size),
            };
            print_json(&rt.store.list_logs(&query).await?)
        },
        LogAction::Purge { days } => {
            let days = days.unwrap_or(rt.config.logs.retention_days);
            let removed = rt.store.purge_expired_logs(days).await?;
            print_json(&json!({ "retentionDays": days, "removed": removed }))
        },
        LogAction::Clear { filter } => {
            let removed = rt.store.clear_logs(&filter.into_filter()?).await?;
            print_json(&json!({ "removed": removed }))
        },
    }
}

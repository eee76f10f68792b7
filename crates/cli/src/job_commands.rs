use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::Context,
    clap::Subcommand,
    jobkeeper_jobs::{
        JobCreate, JobKey, JobStatus,
        query::{JobFilter, JobQuery, PageRequest, Sort},
    },
    serde_json::json,
};

use crate::{
    print_json,
    runtime::{CompletionSignal, Runtime},
};

#[derive(Subcommand)]
pub enum JobAction {
    /// List stored job definitions.
    List {
        /// Case-insensitive substring of the job name.
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        group: Option<String>,
        /// normal, paused, complete, error or blocked.
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        enabled: Option<bool>,
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
    /// Show one definition and its scheduling state.
    Show { group: String, name: String },
    /// Add a job from a JSON definition file.
    Add { file: PathBuf },
    Pause { group: String, name: String },
    Resume { group: String, name: String },
    Delete { group: String, name: String },
    /// Run a job once now and wait for it to finish.
    Trigger {
        group: String,
        name: String,
        #[arg(long, default_value_t = 300)]
        wait_secs: u64,
    },
    /// Set a job's status.
    Status {
        group: String,
        name: String,
        status: String,
    },
    /// Run one reconciliation sweep.
    Reconcile,
    /// List jobs whose triggers disagree with storage.
    Drift,
}

pub async fn handle_jobs(rt: &Runtime, action: JobAction) -> anyhow::Result<()> {
    let svc = &rt.service;
    match action {
        JobAction::List {
            name,
            group,
            status,
            enabled,
            sort_by,
            order,
            page,
            page_size,
        } => {
            let status = status.map(|s| s.parse::<JobStatus>()).transpose()?;
            let query = JobQuery {
                filter: JobFilter {
                    name,
                    group,
                    status,
                    enabled,
                },
                sort: Sort::parse(sort_by.as_deref(), order.as_deref()),
                page: PageRequest::new(page, page_size),
            };
            print_json(&rt.store.list_jobs(&query).await?)
        },
        JobAction::Show { group, name } => {
            let key = JobKey::new(name, group);
            let job = rt.store.get_job(&key).await?;
            let state = svc.state_of(&key).await?;
            print_json(&json!({ "job": job, "state": state }))
        },
        JobAction::Add { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let create: JobCreate = serde_json::from_str(&raw)
                .with_context(|| format!("invalid job definition in {}", file.display()))?;
            let key = JobKey::new(create.name.clone(), create.group.clone());
            let added = svc.add(create).await?;
            print_json(&json!({ "job": key.to_string(), "added": added }))
        },
        JobAction::Pause { group, name } => {
            let key = JobKey::new(name, group);
            let paused = svc.pause(&key).await?;
            print_json(&json!({ "job": key.to_string(), "paused": paused }))
        },
        JobAction::Resume { group, name } => {
            let key = JobKey::new(name, group);
            let resumed = svc.resume(&key).await?;
            print_json(&json!({ "job": key.to_string(), "resumed": resumed }))
        },
        JobAction::Delete { group, name } => {
            let key = JobKey::new(name, group);
            let deleted = svc.delete(&key).await?;
            print_json(&json!({ "job": key.to_string(), "deleted": deleted }))
        },
        JobAction::Trigger {
            group,
            name,
            wait_secs,
        } => {
            let key = JobKey::new(name, group);
            // Triggers only live in this process, so install them first.
            svc.reconcile().await?;
            let signal = Arc::new(CompletionSignal::default());
            rt.scheduler.add_listener(signal.clone()).await;

            let fired = svc.trigger_now(&key).await?;
            let finished = fired && signal.wait(Duration::from_secs(wait_secs)).await;
            print_json(&json!({
                "job": key.to_string(),
                "fired": fired,
                "finished": finished,
            }))
        },
        JobAction::Status {
            group,
            name,
            status,
        } => {
            let key = JobKey::new(name, group);
            let status = status.parse::<JobStatus>()?;
            let changed = svc.change_status(&key, status).await?;
            print_json(&json!({
                "job": key.to_string(),
                "status": status,
                "changed": changed,
            }))
        },
        JobAction::Reconcile => print_json(&svc.reconcile().await?),
        JobAction::Drift => print_json(&svc.drift().await?),
    }
}

//! Wiring of store, scheduler, listener and service, plus the long-running
//! `run` loop.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use {
    async_trait::async_trait,
    jobkeeper_config::{JobkeeperConfig, LogsConfig},
    jobkeeper_jobs::{
        JobService, JobStore,
        listener::ExecutionListener,
        open_store,
        scheduler::{FiringContext, JobFailure, JobListener, Scheduler},
        scheduler_local::LocalScheduler,
    },
    tokio::{sync::Notify, task::JoinHandle},
    tracing::{debug, error, info},
};

use crate::sample_jobs;

pub struct Runtime {
    pub config: JobkeeperConfig,
    pub store: Arc<dyn JobStore>,
    pub scheduler: Arc<LocalScheduler>,
    pub service: Arc<JobService>,
}

impl Runtime {
    pub async fn open(config: JobkeeperConfig) -> anyhow::Result<Self> {
        let store = open_store(&config.storage).await?;
        let registry = Arc::new(sample_jobs::registry());
        let scheduler = LocalScheduler::new(
            Arc::clone(&registry),
            config.scheduler.effective_pool_size(),
        );
        let handle: Weak<dyn Scheduler> = Arc::<LocalScheduler>::downgrade(&scheduler);
        scheduler
            .add_listener(Arc::new(ExecutionListener::new(Arc::clone(&store), handle)))
            .await;
        let service = Arc::new(JobService::new(
            Arc::clone(&store),
            scheduler.clone(),
            registry,
        ));
        Ok(Self {
            config,
            store,
            scheduler,
            service,
        })
    }
}

/// Reconcile, start the timer loop plus the retention and reconciliation
/// loops, then wait for Ctrl-C.
pub async fn run(rt: Runtime) -> anyhow::Result<()> {
    let report = rt.service.start().await?;
    info!(?report, "startup reconciliation finished");
    rt.scheduler.start().await;
    let purge = spawn_retention_loop(Arc::clone(&rt.store), rt.config.logs.clone());
    let sweep = match rt.config.scheduler.reconcile_interval_secs {
        0 => None,
        secs => Some(spawn_reconcile_loop(
            Arc::clone(&rt.service),
            Duration::from_secs(secs),
        )),
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    purge.abort();
    if let Some(sweep) = sweep {
        sweep.abort();
    }
    rt.scheduler.stop().await;
    Ok(())
}

/// Sweep storage against the scheduler every `interval`. Admin commands run
/// in their own process and only touch storage, so this is how their
/// changes reach the daemon's triggers.
fn spawn_reconcile_loop(service: Arc<JobService>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            match service.reconcile().await {
                Ok(report) => debug!(?report, "periodic reconciliation finished"),
                Err(e) => error!(error = %e, "periodic reconciliation failed"),
            }
        }
    })
}

/// Purge expired logs now, then every `purge_interval_secs` (never again if 0).
fn spawn_retention_loop(store: Arc<dyn JobStore>, cfg: LogsConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match store.purge_expired_logs(cfg.retention_days).await {
                Ok(removed) => info!(
                    removed,
                    retention_days = cfg.retention_days,
                    "purged expired execution logs"
                ),
                Err(e) => error!(error = %e, "failed to purge execution logs"),
            }
            if cfg.purge_interval_secs == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_secs(cfg.purge_interval_secs)).await;
        }
    })
}

/// Wakes a waiter once any firing finishes or is vetoed.
#[derive(Default)]
pub struct CompletionSignal {
    notify: Notify,
}

impl CompletionSignal {
    pub async fn wait(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.notify.notified())
            .await
            .is_ok()
    }
}

#[async_trait]
impl JobListener for CompletionSignal {
    async fn on_fired(&self, _ctx: &FiringContext) {}

    async fn on_completed(&self, _ctx: &FiringContext, _failure: Option<&JobFailure>) {
        self.notify.notify_one();
    }

    async fn on_vetoed(&self, _ctx: &FiringContext) {
        self.notify.notify_one();
    }
}

//! Turns engine callbacks into execution log records.

use std::sync::{Arc, Weak};

use {
    async_trait::async_trait,
    jobkeeper_common::time::now_ms,
    tracing::{debug, error, warn},
};

use crate::{
    scheduler::{FiringContext, JobFailure, JobListener, Scheduler},
    store::JobStore,
    types::{ExecutionLog, LogStatus},
};

/// Writes one log record per completed or vetoed firing and keeps the
/// definition's fire times current. Storage errors are logged and swallowed.
///
/// The scheduler handle is weak because the scheduler owns its listeners.
pub struct ExecutionListener {
    store: Arc<dyn JobStore>,
    scheduler: Weak<dyn Scheduler>,
}

impl ExecutionListener {
    pub fn new(store: Arc<dyn JobStore>, scheduler: Weak<dyn Scheduler>) -> Self {
        Self { store, scheduler }
    }

    /// The trigger's next fire time as the scheduler sees it now. Falls back
    /// to the dispatch-time value once the scheduler is gone.
    async fn current_next_fire(&self, ctx: &FiringContext) -> Option<u64> {
        let Some(scheduler) = self.scheduler.upgrade() else {
            return ctx.next_fire_at_ms;
        };
        match scheduler.next_fire_time(&ctx.trigger).await {
            Ok(next) => next,
            Err(e) => {
                warn!(job = %ctx.job, error = %e, "failed to read next fire time");
                ctx.next_fire_at_ms
            },
        }
    }

    fn record(ctx: &FiringContext, now: u64) -> ExecutionLog {
        let mut log = ExecutionLog::begin(&ctx.job, &ctx.trigger, ctx.fire_time_ms, now);
        if !ctx.data.is_empty() {
            match serde_json::to_string(&ctx.data) {
                Ok(snapshot) => log.job_data = Some(snapshot),
                Err(e) => warn!(job = %ctx.job, error = %e, "failed to snapshot job data"),
            }
        }
        log
    }

    async fn persist(&self, ctx: &FiringContext, log: &ExecutionLog) {
        if let Err(e) = self.store.add_log(log).await {
            error!(job = %ctx.job, log_id = %log.id, error = %e, "failed to write execution log");
        }
    }
}

#[async_trait]
impl JobListener for ExecutionListener {
    async fn on_fired(&self, ctx: &FiringContext) {
        debug!(job = %ctx.job, fire_time = ctx.fire_time_ms, "job fired");
    }

    async fn on_completed(&self, ctx: &FiringContext, failure: Option<&JobFailure>) {
        let now = now_ms();
        let mut log = Self::record(ctx, now).completed(now);
        match failure {
            None => {
                log.status = LogStatus::Success;
                log.message = Some("job executed successfully".into());
            },
            Some(failure) => {
                log.status = LogStatus::Failed;
                log.message = Some("job execution failed".into());
                log.error_message = Some(failure.message.clone());
                log.exception = Some(failure.detail.clone());
            },
        }
        self.persist(ctx, &log).await;

        let next = self.current_next_fire(ctx).await;
        match self
            .store
            .update_fire_times(&ctx.job, Some(ctx.fire_time_ms), next)
            .await
        {
            Ok(true) => {},
            Ok(false) => debug!(job = %ctx.job, "no stored definition for fired job"),
            Err(e) => error!(job = %ctx.job, error = %e, "failed to update fire times"),
        }
    }

    async fn on_vetoed(&self, ctx: &FiringContext) {
        let mut log = Self::record(ctx, now_ms());
        log.status = LogStatus::Failed;
        log.message = Some("execution vetoed".into());
        self.persist(ctx, &log).await;
    }
}

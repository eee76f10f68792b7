//! In-process scheduling engine: timer loop, bounded execution pool, and a
//! per-job non-concurrency guard.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Weak},
    time::Duration,
};

use {
    async_trait::async_trait,
    cron::Schedule,
    jobkeeper_common::time::now_ms,
    tokio::{
        sync::{Mutex, Notify, RwLock, Semaphore},
        task::JoinHandle,
    },
    tracing::{debug, error, info, warn},
};

use crate::{
    Error, Result,
    registry::{JobContext, JobRegistry},
    schedule::{next_fire_after, parse_cron},
    scheduler::{
        FiringContext, JobFailure, JobListener, Scheduler, TriggerInfo, TriggerSpec, TriggerState,
    },
    types::{JobKey, JobKind, TriggerKey},
};

/// Poll interval when no trigger is due.
const IDLE_WAKE_MS: u64 = 60_000;

struct TriggerEntry {
    spec: TriggerSpec,
    schedule: Schedule,
    state: TriggerState,
    next_fire_at_ms: Option<u64>,
}

impl TriggerEntry {
    fn new(spec: TriggerSpec, now: u64) -> Result<Self> {
        let schedule = parse_cron(&spec.cron_expression)?;
        let next_fire_at_ms = next_fire_after(&schedule, now, spec.start_at_ms, spec.end_at_ms);
        Ok(Self {
            spec,
            schedule,
            state: TriggerState::Normal,
            next_fire_at_ms,
        })
    }

    fn advance(&mut self, now: u64) {
        self.next_fire_at_ms =
            next_fire_after(&self.schedule, now, self.spec.start_at_ms, self.spec.end_at_ms);
    }

    fn info(&self) -> TriggerInfo {
        TriggerInfo {
            key: self.spec.trigger.clone(),
            state: self.state,
            next_fire_at_ms: self.next_fire_at_ms,
        }
    }
}

/// Default [`Scheduler`] engine. One cron trigger per job.
pub struct LocalScheduler {
    me: Weak<Self>,
    registry: Arc<JobRegistry>,
    triggers: RwLock<HashMap<JobKey, TriggerEntry>>,
    executing: Mutex<HashSet<JobKey>>,
    listeners: RwLock<Vec<Arc<dyn JobListener>>>,
    permits: Arc<Semaphore>,
    timer_handle: Mutex<Option<JoinHandle<()>>>,
    wake_notify: Arc<Notify>,
    running: RwLock<bool>,
}

impl LocalScheduler {
    /// `pool_size` bounds how many job bodies run at once. It is clamped to
    /// `1..=Semaphore::MAX_PERMITS`.
    pub fn new(registry: Arc<JobRegistry>, pool_size: usize) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            registry,
            triggers: RwLock::new(HashMap::new()),
            executing: Mutex::new(HashSet::new()),
            listeners: RwLock::new(Vec::new()),
            permits: Arc::new(Semaphore::new(pool_size.clamp(1, Semaphore::MAX_PERMITS))),
            timer_handle: Mutex::new(None),
            wake_notify: Arc::new(Notify::new()),
            running: RwLock::new(false),
        })
    }

    pub async fn add_listener(&self, listener: Arc<dyn JobListener>) {
        self.listeners.write().await.push(listener);
    }

    /// Start the timer loop.
    pub async fn start(self: &Arc<Self>) {
        *self.running.write().await = true;
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            scheduler.timer_loop().await;
        });
        *self.timer_handle.lock().await = Some(handle);
        info!("local scheduler started");
    }

    /// Stop the timer loop. Running job bodies finish on their own.
    pub async fn stop(&self) {
        *self.running.write().await = false;
        self.wake_notify.notify_one();
        if let Some(handle) = self.timer_handle.lock().await.take() {
            handle.abort();
        }
        info!("local scheduler stopped");
    }

    // ── Internal ────────────────────────────────────────────────────────

    async fn timer_loop(self: &Arc<Self>) {
        loop {
            if !*self.running.read().await {
                break;
            }

            let sleep_ms = self.ms_until_next_wake().await;
            if sleep_ms > 0 {
                let notify = Arc::clone(&self.wake_notify);
                tokio::select! {
                    () = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {},
                    () = notify.notified() => {
                        debug!("timer loop woken by notify");
                        continue;
                    },
                }
            }

            if !*self.running.read().await {
                break;
            }

            self.dispatch_due().await;
        }
    }

    async fn ms_until_next_wake(&self) -> u64 {
        let triggers = self.triggers.read().await;
        let now = now_ms();
        triggers
            .values()
            .filter(|t| t.state == TriggerState::Normal)
            .filter_map(|t| t.next_fire_at_ms)
            .map(|t| t.saturating_sub(now))
            .min()
            .unwrap_or(IDLE_WAKE_MS)
    }

    async fn dispatch_due(self: &Arc<Self>) {
        let now = now_ms();
        let due: Vec<FiringContext> = {
            let mut triggers = self.triggers.write().await;
            let mut due = Vec::new();
            for entry in triggers.values_mut() {
                if entry.state != TriggerState::Normal {
                    continue;
                }
                let Some(fire_time) = entry.next_fire_at_ms.filter(|t| *t <= now) else {
                    continue;
                };
                // Advance under the write lock so the next tick can't pick it up again.
                entry.advance(now);
                due.push(firing_context(&entry.spec, fire_time, entry.next_fire_at_ms));
            }
            due
        };

        for ctx in due {
            let scheduler = Arc::clone(self);
            tokio::spawn(async move {
                scheduler.run_firing(ctx).await;
            });
        }
    }

    async fn run_firing(self: &Arc<Self>, ctx: FiringContext) {
        let spec = {
            let triggers = self.triggers.read().await;
            triggers.get(&ctx.job).map(|e| (e.spec.kind, e.spec.target.clone()))
        };
        let Some((kind, target)) = spec else {
            debug!(job = %ctx.job, "job unscheduled before it ran");
            return;
        };

        if !self.executing.lock().await.insert(ctx.job.clone()) {
            warn!(job = %ctx.job, "previous run still executing, vetoing firing");
            for listener in self.listeners.read().await.iter() {
                listener.on_vetoed(&ctx).await;
            }
            return;
        }

        let failure = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => {
                for listener in self.listeners.read().await.iter() {
                    listener.on_fired(&ctx).await;
                }
                let failure = self.execute(&ctx, kind, &target).await;
                drop(permit);
                failure
            },
            Err(e) => Some(JobFailure::message(format!("execution pool closed: {e}"))),
        };

        for listener in self.listeners.read().await.iter() {
            listener.on_completed(&ctx, failure.as_ref()).await;
        }
        self.executing.lock().await.remove(&ctx.job);
    }

    /// Run the job body on its own task so a panic is reported as a failure.
    async fn execute(
        &self,
        ctx: &FiringContext,
        kind: JobKind,
        target: &str,
    ) -> Option<JobFailure> {
        let Some(job) = self.registry.resolve(kind, target) else {
            error!(job = %ctx.job, kind = kind.as_str(), target, "no job implementation registered");
            return Some(JobFailure::message(format!(
                "no job implementation registered for {target}"
            )));
        };
        let job_ctx = JobContext {
            job: ctx.job.clone(),
            trigger: ctx.trigger.clone(),
            fire_time_ms: ctx.fire_time_ms,
            data: ctx.data.clone(),
        };
        info!(job = %ctx.job, "executing job");
        match tokio::spawn(async move { job.execute(&job_ctx).await }).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                warn!(job = %ctx.job, error = %e, "job failed");
                Some(JobFailure::from_error(&e))
            },
            Err(e) => {
                error!(job = %ctx.job, error = %e, "job panicked");
                Some(JobFailure::message(format!("job panicked: {e}")))
            },
        }
    }

    async fn find_by_trigger<F, R>(&self, trigger: &TriggerKey, f: F) -> Option<R>
    where
        F: FnOnce(&mut TriggerEntry) -> R,
    {
        let mut triggers = self.triggers.write().await;
        triggers
            .values_mut()
            .find(|e| &e.spec.trigger == trigger)
            .map(f)
    }
}

fn firing_context(spec: &TriggerSpec, fire_time_ms: u64, next: Option<u64>) -> FiringContext {
    FiringContext {
        job: spec.job.clone(),
        trigger: spec.trigger.clone(),
        fire_time_ms,
        next_fire_at_ms: next,
        data: spec.data.clone(),
    }
}

#[async_trait]
impl Scheduler for LocalScheduler {
    async fn schedule(&self, spec: TriggerSpec) -> Result<()> {
        let key = spec.job.clone();
        let entry = TriggerEntry::new(spec, now_ms())?;
        {
            let mut triggers = self.triggers.write().await;
            if triggers.contains_key(&key) {
                return Err(Error::scheduler(format!("job {key} is already scheduled")));
            }
            debug!(job = %key, next = ?entry.next_fire_at_ms, "trigger scheduled");
            triggers.insert(key, entry);
        }
        self.wake_notify.notify_one();
        Ok(())
    }

    async fn reschedule(&self, spec: TriggerSpec) -> Result<()> {
        let key = spec.job.clone();
        let entry = TriggerEntry::new(spec, now_ms())?;
        debug!(job = %key, next = ?entry.next_fire_at_ms, "trigger rescheduled");
        self.triggers.write().await.insert(key, entry);
        self.wake_notify.notify_one();
        Ok(())
    }

    async fn unschedule(&self, job: &JobKey) -> Result<bool> {
        let removed = self.triggers.write().await.remove(job).is_some();
        if removed {
            debug!(job = %job, "trigger removed");
            self.wake_notify.notify_one();
        }
        Ok(removed)
    }

    async fn pause_trigger(&self, trigger: &TriggerKey) -> Result<bool> {
        Ok(self
            .find_by_trigger(trigger, |e| e.state = TriggerState::Paused)
            .await
            .is_some())
    }

    async fn resume_trigger(&self, trigger: &TriggerKey) -> Result<bool> {
        let now = now_ms();
        let resumed = self
            .find_by_trigger(trigger, |e| {
                e.state = TriggerState::Normal;
                e.advance(now);
            })
            .await
            .is_some();
        if resumed {
            self.wake_notify.notify_one();
        }
        Ok(resumed)
    }

    async fn fire_now(&self, job: &JobKey) -> Result<bool> {
        let ctx = {
            let triggers = self.triggers.read().await;
            match triggers.get(job) {
                Some(entry) => firing_context(&entry.spec, now_ms(), entry.next_fire_at_ms),
                None => return Ok(false),
            }
        };
        let Some(scheduler) = self.me.upgrade() else {
            return Err(Error::scheduler("scheduler is shutting down"));
        };
        tokio::spawn(async move {
            scheduler.run_firing(ctx).await;
        });
        Ok(true)
    }

    async fn triggers_of(&self, job: &JobKey) -> Result<Vec<TriggerInfo>> {
        let triggers = self.triggers.read().await;
        Ok(triggers.get(job).map(TriggerEntry::info).into_iter().collect())
    }

    async fn scheduled_jobs(&self) -> Result<Vec<JobKey>> {
        Ok(self.triggers.read().await.keys().cloned().collect())
    }

    async fn next_fire_time(&self, trigger: &TriggerKey) -> Result<Option<u64>> {
        let triggers = self.triggers.read().await;
        Ok(triggers
            .values()
            .find(|e| &e.spec.trigger == trigger)
            .and_then(|e| match e.state {
                TriggerState::Normal => e.next_fire_at_ms,
                TriggerState::Paused => None,
            }))
    }
}

//! Reconciliation service: keeps the scheduler's triggers in line with the
//! stored job definitions.
//!
//! Storage is the source of truth. Every mutation is written to storage
//! first and then projected onto the scheduler. A scheduler failure is
//! logged and leaves the job for the next [`JobService::reconcile`] sweep
//! instead of failing the call.

use std::sync::Arc;

use {
    jobkeeper_common::time::now_ms,
    serde::Serialize,
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    registry::JobRegistry,
    schedule::parse_cron,
    scheduler::{Scheduler, TriggerInfo, TriggerSpec},
    store::JobStore,
    types::{JobCreate, JobDefinition, JobKey, JobKind, JobStatus},
};

/// Where one identity stands, derived from storage and the scheduler on
/// every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum JobState {
    /// Neither stored nor scheduled.
    Unregistered,
    /// Stored, no trigger.
    StoredOnly,
    Scheduled,
    Paused,
    /// Deleted from storage while a trigger is still installed.
    Deleted,
}

/// Outcome counts of one reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub scheduled: usize,
    pub already_scheduled: usize,
    pub resumed: usize,
    pub unscheduled: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DriftKind {
    /// The definition wants a trigger and has none.
    MissingTrigger,
    /// The definition wants a trigger but its trigger is paused.
    InactiveTrigger,
    /// The definition is disabled, paused or blocked but holds an active trigger.
    UnexpectedTrigger,
    /// The scheduler holds a trigger for a job that is no longer stored.
    OrphanTrigger,
}

/// One identity that needs reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Drift {
    pub key: JobKey,
    pub kind: DriftKind,
}

pub struct JobService {
    store: Arc<dyn JobStore>,
    scheduler: Arc<dyn Scheduler>,
    registry: Arc<JobRegistry>,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        scheduler: Arc<dyn Scheduler>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        Self {
            store,
            scheduler,
            registry,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Initialize storage, seed discovered jobs, then run one sweep.
    pub async fn start(&self) -> Result<ReconcileReport> {
        if !self.store.is_initialized() {
            self.store.initialize().await?;
        }
        let seeded = self.register_discovered().await?;
        let report = self.reconcile().await?;
        info!(
            seeded,
            scheduled = report.scheduled,
            already_scheduled = report.already_scheduled,
            resumed = report.resumed,
            unscheduled = report.unscheduled,
            failed = report.failed,
            "job service started"
        );
        Ok(report)
    }

    /// Insert every discovered job that storage does not know yet, and
    /// schedule it when enabled. Returns how many were inserted.
    pub async fn register_discovered(&self) -> Result<usize> {
        let mut inserted = 0;
        for discovered in self.registry.discover() {
            let key = discovered.key();
            let def = discovered.into_definition(now_ms());
            if !self.store.add_job(&def).await? {
                debug!(job = %key, "discovered job already stored");
                continue;
            }
            inserted += 1;
            info!(job = %key, enabled = def.enabled, "registered discovered job");
            if def.wants_trigger() {
                self.schedule_job(&def).await?;
            }
        }
        Ok(inserted)
    }

    /// Make the scheduler match storage: install missing triggers, resume
    /// paused ones of active jobs, and remove triggers of inactive or
    /// deleted jobs.
    ///
    /// Matching triggers are left alone, so running this twice changes
    /// nothing. Failures are counted per identity and never stop the sweep.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let stored = self.store.all_jobs().await?;
        for def in &stored {
            let key = def.key();
            let triggers = match self.scheduler.triggers_of(&key).await {
                Ok(triggers) => triggers,
                Err(e) => {
                    warn!(job = %key, error = %e, "failed to query triggers");
                    report.failed += 1;
                    continue;
                },
            };

            match drift_of(def, &triggers) {
                None if def.wants_trigger() => report.already_scheduled += 1,
                None => report.skipped += 1,
                Some(DriftKind::MissingTrigger) => match self.schedule_job(def).await {
                    Ok(true) => report.scheduled += 1,
                    Ok(false) => report.failed += 1,
                    Err(e) => {
                        warn!(job = %key, error = %e, "failed to record next fire time");
                        report.failed += 1;
                    },
                },
                Some(DriftKind::InactiveTrigger) => {
                    match self.scheduler.resume_trigger(&def.trigger_key()).await {
                        Ok(_) => {
                            info!(job = %key, "resumed trigger of active job");
                            report.resumed += 1;
                        },
                        Err(e) => {
                            warn!(job = %key, error = %e, "failed to resume trigger");
                            report.failed += 1;
                        },
                    }
                },
                Some(DriftKind::UnexpectedTrigger | DriftKind::OrphanTrigger) => {
                    if self.remove_trigger(&key, def.status.as_str()).await {
                        report.unscheduled += 1;
                    } else {
                        report.failed += 1;
                    }
                },
            }
        }

        for key in self.orphans(&stored).await {
            if self.remove_trigger(&key, "deleted").await {
                report.unscheduled += 1;
            } else {
                report.failed += 1;
            }
        }
        debug!(?report, "reconciliation sweep finished");
        Ok(report)
    }

    /// Install a trigger for `def` and record its next fire time.
    ///
    /// `Ok(false)` when the scheduler rejected it; the sweep retries later.
    pub async fn schedule_job(&self, def: &JobDefinition) -> Result<bool> {
        self.install(def, false).await
    }

    /// Validate and store a new definition, then schedule it when it wants
    /// a trigger. `Ok(false)` if the identity already exists.
    pub async fn add(&self, create: JobCreate) -> Result<bool> {
        let def = create.into_definition(now_ms());
        self.validate(&def)?;
        if !self.store.add_job(&def).await? {
            info!(job = %def.key(), "job already exists");
            return Ok(false);
        }
        info!(job = %def.key(), cron = %def.cron_expression, "job added");
        if def.wants_trigger() {
            self.schedule_job(&def).await?;
        }
        Ok(true)
    }

    /// Replace the mutable fields of a stored definition and reinstall or
    /// remove its trigger accordingly. Fire timestamps are kept.
    pub async fn update(&self, def: &JobDefinition) -> Result<bool> {
        self.validate(def)?;
        let Some(mut stored) = self.store.get_job(&def.key()).await? else {
            return Ok(false);
        };
        let (last, next) = (stored.last_fire_at_ms, stored.next_fire_at_ms);
        stored.apply_update(def);
        stored.last_fire_at_ms = last;
        stored.next_fire_at_ms = next;
        stored.updated_at_ms = now_ms();
        if !self.store.update_job(&stored).await? {
            return Ok(false);
        }
        info!(job = %stored.key(), "job updated");

        if stored.wants_trigger() {
            self.install(&stored, true).await?;
        } else {
            self.unschedule_quietly(&stored.key()).await;
        }
        Ok(true)
    }

    /// Remove the definition, then its trigger. Logs are kept.
    pub async fn delete(&self, key: &JobKey) -> Result<bool> {
        let exact = self.exact_key(key).await?;
        let deleted = self.store.delete_job(key).await?;
        if deleted {
            info!(job = %exact, "job deleted");
        }
        self.unschedule_quietly(&exact).await;
        Ok(deleted)
    }

    pub async fn pause(&self, key: &JobKey) -> Result<bool> {
        let Some(def) = self.store.get_job(key).await? else {
            return Ok(false);
        };
        if !self.store.update_job_status(key, JobStatus::Paused).await? {
            return Ok(false);
        }
        match self.scheduler.pause_trigger(&def.trigger_key()).await {
            Ok(true) => info!(job = %def.key(), "job paused"),
            Ok(false) => debug!(job = %def.key(), "paused job had no trigger"),
            Err(e) => warn!(job = %def.key(), error = %e, "failed to pause trigger"),
        }
        Ok(true)
    }

    /// Set status back to normal and reactivate the trigger, installing one
    /// if the job has none. Disabled jobs only get the status change.
    pub async fn resume(&self, key: &JobKey) -> Result<bool> {
        let Some(mut def) = self.store.get_job(key).await? else {
            return Ok(false);
        };
        if !self.store.update_job_status(key, JobStatus::Normal).await? {
            return Ok(false);
        }
        def.status = JobStatus::Normal;
        if def.enabled {
            self.activate(&def).await?;
        }
        info!(job = %def.key(), "job resumed");
        Ok(true)
    }

    /// Ask the scheduler to run the job once right away. `Ok(false)` if the
    /// job is unknown to storage or the scheduler could not fire it.
    pub async fn trigger_now(&self, key: &JobKey) -> Result<bool> {
        let Some(def) = self.store.get_job(key).await? else {
            return Ok(false);
        };
        match self.scheduler.fire_now(&def.key()).await {
            Ok(fired) => {
                if !fired {
                    warn!(job = %def.key(), "job has no trigger to fire");
                }
                Ok(fired)
            },
            Err(e) => {
                warn!(job = %def.key(), error = %e, "failed to fire job");
                Ok(false)
            },
        }
    }

    /// Set a status and apply its scheduler side effect: paused pauses the
    /// trigger, blocked removes it, normal resumes, complete and error leave
    /// the scheduler alone.
    pub async fn change_status(&self, key: &JobKey, status: JobStatus) -> Result<bool> {
        match status {
            JobStatus::Paused => self.pause(key).await,
            JobStatus::Normal => self.resume(key).await,
            JobStatus::Blocked => {
                let Some(def) = self.store.get_job(key).await? else {
                    return Ok(false);
                };
                if !self.store.update_job_status(key, status).await? {
                    return Ok(false);
                }
                self.unschedule_quietly(&def.key()).await;
                Ok(true)
            },
            JobStatus::Complete | JobStatus::Error => {
                self.store.update_job_status(key, status).await
            },
        }
    }

    pub async fn state_of(&self, key: &JobKey) -> Result<JobState> {
        let stored = self.store.get_job(key).await?;
        let exact = stored.as_ref().map_or_else(|| key.clone(), JobDefinition::key);
        let triggers = self.scheduler.triggers_of(&exact).await?;
        Ok(derive_state(stored.as_ref(), &triggers))
    }

    /// Identities whose scheduler state disagrees with storage, by the same
    /// rule [`JobService::reconcile`] corrects.
    pub async fn drift(&self) -> Result<Vec<Drift>> {
        let mut drift = Vec::new();
        let stored = self.store.all_jobs().await?;
        for def in &stored {
            let key = def.key();
            let triggers = match self.scheduler.triggers_of(&key).await {
                Ok(triggers) => triggers,
                Err(e) => {
                    warn!(job = %key, error = %e, "failed to query triggers");
                    continue;
                },
            };
            if let Some(kind) = drift_of(def, &triggers) {
                drift.push(Drift { key, kind });
            }
        }
        drift.extend(self.orphans(&stored).await.into_iter().map(|key| Drift {
            key,
            kind: DriftKind::OrphanTrigger,
        }));
        Ok(drift)
    }

    // ── Internal ────────────────────────────────────────────────────────

    fn validate(&self, def: &JobDefinition) -> Result<()> {
        let key = def.key();
        if def.name.trim().is_empty() || def.group.trim().is_empty() {
            return Err(Error::invalid_job(&key, "name and group are required"));
        }
        if let Err(e) = parse_cron(&def.cron_expression) {
            return Err(Error::invalid_job(&key, e.to_string()));
        }
        match def.kind {
            JobKind::Native if !self.registry.contains(&def.target) => Err(Error::invalid_job(
                &key,
                format!("no job implementation registered for '{}'", def.target),
            )),
            JobKind::Api
                if !(def.target.starts_with("http://") || def.target.starts_with("https://")) =>
            {
                Err(Error::invalid_job(&key, "api target must be an http(s) URL"))
            },
            _ => Ok(()),
        }
    }

    /// Stored identity with its original casing, or `key` itself if absent.
    async fn exact_key(&self, key: &JobKey) -> Result<JobKey> {
        Ok(self
            .store
            .get_job(key)
            .await?
            .map_or_else(|| key.clone(), |def| def.key()))
    }

    async fn install(&self, def: &JobDefinition, replace: bool) -> Result<bool> {
        let key = def.key();
        let spec = TriggerSpec::from_definition(def);
        let outcome = if replace {
            self.scheduler.reschedule(spec).await
        } else {
            self.scheduler.schedule(spec).await
        };
        if let Err(e) = outcome {
            warn!(job = %key, error = %e, "failed to schedule job, left for reconciliation");
            return Ok(false);
        }

        let next = match self.scheduler.next_fire_time(&def.trigger_key()).await {
            Ok(next) => next,
            Err(e) => {
                warn!(job = %key, error = %e, "failed to read next fire time");
                None
            },
        };
        self.store
            .update_fire_times(&key, def.last_fire_at_ms, next)
            .await?;
        debug!(job = %key, next_fire = ?next, "job scheduled");
        Ok(true)
    }

    async fn activate(&self, def: &JobDefinition) -> Result<()> {
        let key = def.key();
        match self.scheduler.triggers_of(&key).await {
            Ok(triggers) if triggers.is_empty() => {
                self.schedule_job(def).await?;
            },
            Ok(_) => {
                if let Err(e) = self.scheduler.resume_trigger(&def.trigger_key()).await {
                    warn!(job = %key, error = %e, "failed to resume trigger");
                }
            },
            Err(e) => warn!(job = %key, error = %e, "failed to query triggers"),
        }
        Ok(())
    }

    /// Jobs the scheduler holds a trigger for that storage no longer has.
    async fn orphans(&self, stored: &[JobDefinition]) -> Vec<JobKey> {
        match self.scheduler.scheduled_jobs().await {
            Ok(keys) => keys
                .into_iter()
                .filter(|key| !stored.iter().any(|def| def.is_keyed(key)))
                .collect(),
            Err(e) => {
                warn!(error = %e, "failed to list scheduled jobs");
                Vec::new()
            },
        }
    }

    async fn remove_trigger(&self, key: &JobKey, reason: &str) -> bool {
        match self.scheduler.unschedule(key).await {
            Ok(_) => {
                info!(job = %key, reason, "removed trigger");
                true
            },
            Err(e) => {
                warn!(job = %key, error = %e, "failed to remove trigger");
                false
            },
        }
    }

    async fn unschedule_quietly(&self, key: &JobKey) {
        match self.scheduler.unschedule(key).await {
            Ok(true) => debug!(job = %key, "trigger removed"),
            Ok(false) => {},
            Err(e) => warn!(job = %key, error = %e, "failed to unschedule job, left for reconciliation"),
        }
    }
}

/// How the triggers of a stored definition disagree with it, if they do.
fn drift_of(def: &JobDefinition, triggers: &[TriggerInfo]) -> Option<DriftKind> {
    let active = triggers.iter().any(TriggerInfo::is_active);
    match (def.wants_trigger(), triggers.is_empty(), active) {
        (true, true, _) => Some(DriftKind::MissingTrigger),
        (true, false, false) => Some(DriftKind::InactiveTrigger),
        (false, _, true) => Some(DriftKind::UnexpectedTrigger),
        _ => None,
    }
}

fn derive_state(stored: Option<&JobDefinition>, triggers: &[TriggerInfo]) -> JobState {
    match stored {
        None if triggers.is_empty() => JobState::Unregistered,
        None => JobState::Deleted,
        Some(def) if def.status == JobStatus::Paused => JobState::Paused,
        Some(_) if triggers.iter().any(TriggerInfo::is_active) => JobState::Scheduled,
        Some(_) if !triggers.is_empty() => JobState::Paused,
        Some(_) => JobState::StoredOnly,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            listener::ExecutionListener,
            query::{LogFilter, LogQuery},
            registry::{Job, JobContext, JobMetadata},
            scheduler::fake::RecordingScheduler,
            scheduler_local::LocalScheduler,
            store_memory::InMemoryStore,
            types::LogStatus,
        },
        async_trait::async_trait,
        std::{sync::Weak, time::Duration},
        tokio::sync::Notify,
    };

    struct Noop;

    #[async_trait]
    impl Job for Noop {
        async fn execute(&self, _ctx: &JobContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn registry() -> Arc<JobRegistry> {
        let mut registry = JobRegistry::new();
        registry.register("demo", || Noop);
        registry.register_scheduled(
            "cleanup",
            JobMetadata::new("Cleanup", "MAINT", "0 0 3 * * ?"),
            || Noop,
        );
        registry.register_scheduled(
            "archive",
            JobMetadata::new("Archive", "MAINT", "0 0 4 * * ?").disabled(),
            || Noop,
        );
        Arc::new(registry)
    }

    fn make_svc() -> (JobService, Arc<InMemoryStore>, Arc<RecordingScheduler>) {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = Arc::new(RecordingScheduler::default());
        let svc = JobService::new(store.clone(), scheduler.clone(), registry());
        (svc, store, scheduler)
    }

    fn create(name: &str) -> JobCreate {
        JobCreate::new(name, "G", "0 0/5 * * * ?", "demo")
    }

    /// Signals when it starts, then blocks until released.
    struct Gated {
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl Job for Gated {
        async fn execute(&self, _ctx: &JobContext) -> anyhow::Result<()> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    /// Wire a [`LocalScheduler`] and an [`ExecutionListener`] the way the
    /// binary does.
    async fn make_live_svc(
        registry: Arc<JobRegistry>,
    ) -> (JobService, Arc<InMemoryStore>, Arc<LocalScheduler>) {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = LocalScheduler::new(Arc::clone(&registry), 2);
        let handle: Weak<dyn Scheduler> = Arc::<LocalScheduler>::downgrade(&scheduler);
        scheduler
            .add_listener(Arc::new(ExecutionListener::new(store.clone(), handle)))
            .await;
        let svc = JobService::new(store.clone(), scheduler.clone(), registry);
        (svc, store, scheduler)
    }

    async fn wait_for_last_fire(store: &InMemoryStore, key: &JobKey) -> JobDefinition {
        for _ in 0..100 {
            let stored = store.get_job(key).await.unwrap().unwrap();
            if stored.last_fire_at_ms.is_some() {
                return stored;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("{key} never recorded a firing");
    }

    #[tokio::test]
    async fn test_add_then_get_and_duplicate() {
        let (svc, store, scheduler) = make_svc();
        assert!(svc.add(create("A")).await.unwrap());
        assert!(!svc.add(create("a")).await.unwrap());

        let stored = store.get_job(&JobKey::new("A", "G")).await.unwrap().unwrap();
        assert_eq!(stored.cron_expression, "0 0/5 * * * ?");
        assert_eq!(store.all_jobs().await.unwrap().len(), 1);
        assert_eq!(scheduler.trigger_count(), 1);
    }

    #[tokio::test]
    async fn test_add_rejects_invalid_definitions() {
        let (svc, store, _) = make_svc();
        let bad_cron = JobCreate::new("a", "G", "whenever", "demo");
        assert!(matches!(svc.add(bad_cron).await, Err(Error::InvalidJob { .. })));
        let unknown = JobCreate::new("b", "G", "0 * * * * ?", "nope");
        assert!(matches!(svc.add(unknown).await, Err(Error::InvalidJob { .. })));
        let mut api = JobCreate::new("c", "G", "0 * * * * ?", "ftp://host");
        api.kind = JobKind::Api;
        assert!(matches!(svc.add(api).await, Err(Error::InvalidJob { .. })));
        assert!(store.all_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_job_gets_no_trigger() {
        let (svc, _, scheduler) = make_svc();
        let mut create = create("A");
        create.enabled = false;
        svc.add(create).await.unwrap();
        let report = svc.reconcile().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert!(scheduler.triggers_of(&JobKey::new("A", "G")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_seeds_discovered_jobs_once() {
        let (svc, store, scheduler) = make_svc();
        let first = svc.start().await.unwrap();
        assert_eq!(store.all_jobs().await.unwrap().len(), 2);
        assert_eq!(first.already_scheduled, 1);
        assert_eq!(first.skipped, 1);
        assert_eq!(scheduler.trigger_count(), 1);

        let second = svc.start().await.unwrap();
        assert_eq!(second, first);
        assert_eq!(store.all_jobs().await.unwrap().len(), 2);
        assert_eq!(scheduler.trigger_count(), 1);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let (svc, store, scheduler) = make_svc();
        store
            .add_job(&create("A").into_definition(now_ms()))
            .await
            .unwrap();
        let first = svc.reconcile().await.unwrap();
        assert_eq!(first.scheduled, 1);
        let second = svc.reconcile().await.unwrap();
        assert_eq!(second.scheduled, 0);
        assert_eq!(second.already_scheduled, 1);
        assert_eq!(scheduler.trigger_count(), 1);
    }

    #[tokio::test]
    async fn test_scheduler_failure_keeps_stored_job() {
        let (svc, store, scheduler) = make_svc();
        scheduler.fail_calls(true);
        assert!(svc.add(create("A")).await.unwrap());
        assert!(store.get_job(&JobKey::new("A", "G")).await.unwrap().is_some());
        assert_eq!(scheduler.trigger_count(), 0);

        scheduler.fail_calls(false);
        let drift = svc.drift().await.unwrap();
        assert_eq!(drift, vec![Drift {
            key: JobKey::new("A", "G"),
            kind: DriftKind::MissingTrigger,
        }]);
        assert_eq!(svc.reconcile().await.unwrap().scheduled, 1);
        assert!(svc.drift().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_identity_does_not_stop_sweep() {
        let (svc, store, scheduler) = make_svc();
        for name in ["A", "B"] {
            store
                .add_job(&create(name).into_definition(now_ms()))
                .await
                .unwrap();
        }
        scheduler.fail_calls(true);
        let report = svc.reconcile().await.unwrap();
        assert_eq!(report.failed, 2);
        // one trigger query per identity, then the scheduled-job listing
        assert_eq!(scheduler.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let (svc, _, scheduler) = make_svc();
        let key = JobKey::new("A", "G");
        assert_eq!(svc.state_of(&key).await.unwrap(), JobState::Unregistered);

        svc.add(create("A")).await.unwrap();
        assert_eq!(svc.state_of(&key).await.unwrap(), JobState::Scheduled);

        assert!(svc.pause(&key).await.unwrap());
        assert_eq!(svc.state_of(&key).await.unwrap(), JobState::Paused);
        assert!(scheduler.calls().contains(&"pause G.A_Trigger".to_string()));

        assert!(svc.resume(&key).await.unwrap());
        assert_eq!(svc.state_of(&key).await.unwrap(), JobState::Scheduled);

        scheduler.fail_calls(true);
        assert!(svc.delete(&key).await.unwrap());
        scheduler.fail_calls(false);
        assert_eq!(svc.state_of(&key).await.unwrap(), JobState::Deleted);

        scheduler.unschedule(&key).await.unwrap();
        assert_eq!(svc.state_of(&key).await.unwrap(), JobState::Unregistered);
    }

    #[tokio::test]
    async fn test_delete_uses_stored_casing() {
        let (svc, _, scheduler) = make_svc();
        svc.add(create("Report")).await.unwrap();
        assert!(svc.delete(&JobKey::new("report", "G")).await.unwrap());
        assert_eq!(scheduler.trigger_count(), 0);
        assert!(!svc.delete(&JobKey::new("report", "G")).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_missing_returns_false() {
        let (svc, store, _) = make_svc();
        let def = create("A").into_definition(now_ms());
        assert!(!svc.update(&def).await.unwrap());
        assert!(store.all_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_disabling_removes_trigger() {
        let (svc, store, scheduler) = make_svc();
        svc.add(create("A")).await.unwrap();
        let mut def = store.get_job(&JobKey::new("A", "G")).await.unwrap().unwrap();
        def.enabled = false;
        def.description = Some("off for now".into());
        assert!(svc.update(&def).await.unwrap());

        let stored = store.get_job(&def.key()).await.unwrap().unwrap();
        assert!(!stored.enabled);
        assert_eq!(stored.description.as_deref(), Some("off for now"));
        assert_eq!(scheduler.trigger_count(), 0);
    }

    #[tokio::test]
    async fn test_change_status_side_effects() {
        let (svc, store, scheduler) = make_svc();
        let key = JobKey::new("A", "G");
        svc.add(create("A")).await.unwrap();

        assert!(svc.change_status(&key, JobStatus::Complete).await.unwrap());
        assert_eq!(scheduler.trigger_count(), 1);

        assert!(svc.change_status(&key, JobStatus::Blocked).await.unwrap());
        assert_eq!(scheduler.trigger_count(), 0);
        let stored = store.get_job(&key).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Blocked);

        assert!(svc.change_status(&key, JobStatus::Normal).await.unwrap());
        assert_eq!(scheduler.trigger_count(), 1);
        assert!(!svc.change_status(&JobKey::new("B", "G"), JobStatus::Error).await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_unschedules_paused_job() {
        let (svc, store, scheduler) = make_svc();
        let key = JobKey::new("A", "G");
        svc.add(create("A")).await.unwrap();
        store.update_job_status(&key, JobStatus::Paused).await.unwrap();
        assert_eq!(svc.drift().await.unwrap()[0].kind, DriftKind::UnexpectedTrigger);

        let report = svc.reconcile().await.unwrap();
        assert_eq!(report.unscheduled, 1);
        assert_eq!(scheduler.trigger_count(), 0);
    }

    #[tokio::test]
    async fn test_sweep_removes_orphaned_trigger() {
        let (svc, _, scheduler) = make_svc();
        let key = JobKey::new("A", "G");
        svc.add(create("A")).await.unwrap();
        scheduler.fail_calls(true);
        assert!(svc.delete(&key).await.unwrap());
        scheduler.fail_calls(false);
        assert_eq!(svc.state_of(&key).await.unwrap(), JobState::Deleted);
        assert_eq!(svc.drift().await.unwrap(), vec![Drift {
            key: key.clone(),
            kind: DriftKind::OrphanTrigger,
        }]);

        let report = svc.reconcile().await.unwrap();
        assert_eq!(report.unscheduled, 1);
        assert_eq!(scheduler.trigger_count(), 0);
        assert_eq!(svc.state_of(&key).await.unwrap(), JobState::Unregistered);
        assert!(svc.drift().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_resumes_paused_trigger_of_active_job() {
        let (svc, store, _) = make_svc();
        let key = JobKey::new("A", "G");
        svc.add(create("A")).await.unwrap();
        svc.pause(&key).await.unwrap();
        // Status reset in storage only, as another process would do it.
        store.update_job_status(&key, JobStatus::Normal).await.unwrap();
        assert_eq!(svc.drift().await.unwrap()[0].kind, DriftKind::InactiveTrigger);

        let report = svc.reconcile().await.unwrap();
        assert_eq!(report.resumed, 1);
        assert_eq!(svc.state_of(&key).await.unwrap(), JobState::Scheduled);
        assert!(svc.drift().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_drift_and_sweep_agree_on_paused_job() {
        let (svc, _, scheduler) = make_svc();
        let key = JobKey::new("A", "G");
        svc.add(create("A")).await.unwrap();
        svc.pause(&key).await.unwrap();

        assert!(svc.drift().await.unwrap().is_empty());
        let report = svc.reconcile().await.unwrap();
        assert_eq!(report, ReconcileReport {
            skipped: 1,
            ..Default::default()
        });
        assert_eq!(scheduler.trigger_count(), 1);
        assert_eq!(svc.state_of(&key).await.unwrap(), JobState::Paused);
    }

    #[tokio::test]
    async fn test_trigger_now_unknown_job() {
        let (svc, _, _) = make_svc();
        assert!(!svc.trigger_now(&JobKey::new("A", "G")).await.unwrap());
    }

    #[tokio::test]
    async fn test_completion_writes_one_success_log() {
        let (svc, store, _) = make_live_svc(registry()).await;

        svc.add(create("A")).await.unwrap();
        assert_eq!(svc.reconcile().await.unwrap().already_scheduled, 1);
        assert!(svc.trigger_now(&JobKey::new("A", "G")).await.unwrap());

        let query = LogQuery {
            filter: LogFilter {
                name: Some("A".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut logs = Vec::new();
        for _ in 0..50 {
            logs = store.list_logs(&query).await.unwrap().items;
            if !logs.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Success);
        assert!(logs[0].duration_ms.is_some());

        let stored = wait_for_last_fire(&store, &JobKey::new("A", "G")).await;
        assert!(stored.next_fire_at_ms.is_some());
    }

    #[tokio::test]
    async fn test_pause_during_run_clears_next_fire_time() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let mut registry = JobRegistry::new();
        let (s, r) = (Arc::clone(&started), Arc::clone(&release));
        registry.register("gated", move || Gated {
            started: Arc::clone(&s),
            release: Arc::clone(&r),
        });
        let (svc, store, scheduler) = make_live_svc(Arc::new(registry)).await;

        let key = JobKey::new("Slow", "G");
        svc.add(JobCreate::new("Slow", "G", "0 0/5 * * * ?", "gated"))
            .await
            .unwrap();
        assert!(store.get_job(&key).await.unwrap().unwrap().next_fire_at_ms.is_some());

        assert!(svc.trigger_now(&key).await.unwrap());
        tokio::time::timeout(Duration::from_secs(5), started.notified())
            .await
            .unwrap();
        assert!(svc.pause(&key).await.unwrap());
        release.notify_one();

        let stored = wait_for_last_fire(&store, &key).await;
        assert_eq!(stored.status, JobStatus::Paused);
        assert_eq!(stored.next_fire_at_ms, None);
        assert_eq!(
            scheduler.next_fire_time(&stored.trigger_key()).await.unwrap(),
            stored.next_fire_at_ms
        );
    }
}

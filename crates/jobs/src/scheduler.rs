//! Scheduler capability contract and execution callbacks.
//!
//! The reconciliation service only talks to an engine through [`Scheduler`];
//! engines report firings back through [`JobListener`].

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use crate::{
    Result,
    codec::{JOB_DATA_KEY, JobDataMap},
    types::{JobDefinition, JobKey, JobKind, TriggerKey},
};

/// Everything an engine needs to install one cron trigger for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSpec {
    pub job: JobKey,
    pub trigger: TriggerKey,
    pub cron_expression: String,
    pub kind: JobKind,
    pub target: String,
    pub data: JobDataMap,
    pub start_at_ms: Option<u64>,
    pub end_at_ms: Option<u64>,
}

impl TriggerSpec {
    #[must_use]
    pub fn from_definition(def: &JobDefinition) -> Self {
        let mut data = JobDataMap::new();
        if let Some(raw) = def.job_data.as_ref().filter(|raw| !raw.trim().is_empty()) {
            data.insert(JOB_DATA_KEY.to_string(), raw.clone());
        }
        Self {
            job: def.key(),
            trigger: def.trigger_key(),
            cron_expression: def.cron_expression.clone(),
            kind: def.kind,
            target: def.target.clone(),
            data,
            start_at_ms: def.start_at_ms,
            end_at_ms: def.end_at_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerState {
    Normal,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerInfo {
    pub key: TriggerKey,
    pub state: TriggerState,
    pub next_fire_at_ms: Option<u64>,
}

impl TriggerInfo {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TriggerState::Normal
    }
}

/// Operations the reconciliation service needs from a scheduling engine.
///
/// Jobs are addressed by their exact stored identity.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Install a trigger. Fails if the job already has one.
    async fn schedule(&self, spec: TriggerSpec) -> Result<()>;
    /// Replace the job's trigger (or install one if missing).
    async fn reschedule(&self, spec: TriggerSpec) -> Result<()>;
    /// Remove the job and its triggers. `false` if nothing was scheduled.
    async fn unschedule(&self, job: &JobKey) -> Result<bool>;
    async fn pause_trigger(&self, trigger: &TriggerKey) -> Result<bool>;
    async fn resume_trigger(&self, trigger: &TriggerKey) -> Result<bool>;
    /// Fire once right away. `false` if the job is unknown to the engine.
    async fn fire_now(&self, job: &JobKey) -> Result<bool>;
    async fn triggers_of(&self, job: &JobKey) -> Result<Vec<TriggerInfo>>;
    /// Every job the engine currently holds a trigger for.
    async fn scheduled_jobs(&self) -> Result<Vec<JobKey>>;
    async fn next_fire_time(&self, trigger: &TriggerKey) -> Result<Option<u64>>;
}

/// Snapshot handed to listeners for one firing.
#[derive(Debug, Clone)]
pub struct FiringContext {
    pub job: JobKey,
    pub trigger: TriggerKey,
    pub fire_time_ms: u64,
    /// The trigger's next fire time as of dispatch. Listeners prefer asking
    /// the engine at completion, since the trigger may have changed meanwhile.
    pub next_fire_at_ms: Option<u64>,
    /// Merged parameter map passed to the job body.
    pub data: JobDataMap,
}

/// Why a job body failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub message: String,
    /// Full rendering including the cause chain.
    pub detail: String,
}

impl JobFailure {
    #[must_use]
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self {
            message: err.to_string(),
            detail: format!("{err:?}"),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            detail: message.clone(),
            message,
        }
    }
}

/// Engine callbacks. Implementations must not panic; any error they hit
/// stays inside the listener.
#[async_trait]
pub trait JobListener: Send + Sync {
    async fn on_fired(&self, ctx: &FiringContext);
    async fn on_completed(&self, ctx: &FiringContext, failure: Option<&JobFailure>);
    async fn on_vetoed(&self, ctx: &FiringContext);
}

/// In-memory scheduler double that records calls and can be told to fail.
#[cfg(test)]
pub(crate) mod fake {
    use std::{
        collections::BTreeMap,
        sync::{
            Mutex,
            atomic::{AtomicBool, Ordering},
        },
    };

    use super::*;
    use crate::Error;

    #[derive(Default)]
    pub struct RecordingScheduler {
        triggers: Mutex<BTreeMap<JobKey, (TriggerKey, TriggerState)>>,
        pub calls: Mutex<Vec<String>>,
        fail: AtomicBool,
    }

    #[allow(clippy::unwrap_used)]
    impl RecordingScheduler {
        pub fn fail_calls(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn trigger_count(&self) -> usize {
            self.triggers.lock().unwrap().len()
        }

        fn record(&self, call: String) -> Result<()> {
            self.calls.lock().unwrap().push(call);
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::scheduler("injected failure"));
            }
            Ok(())
        }
    }

    #[allow(clippy::unwrap_used)]
    #[async_trait]
    impl Scheduler for RecordingScheduler {
        async fn schedule(&self, spec: TriggerSpec) -> Result<()> {
            self.record(format!("schedule {}", spec.job))?;
            let mut triggers = self.triggers.lock().unwrap();
            if triggers.contains_key(&spec.job) {
                return Err(Error::scheduler(format!("{} already scheduled", spec.job)));
            }
            triggers.insert(spec.job, (spec.trigger, TriggerState::Normal));
            Ok(())
        }

        async fn reschedule(&self, spec: TriggerSpec) -> Result<()> {
            self.record(format!("reschedule {}", spec.job))?;
            self.triggers
                .lock()
                .unwrap()
                .insert(spec.job, (spec.trigger, TriggerState::Normal));
            Ok(())
        }

        async fn unschedule(&self, job: &JobKey) -> Result<bool> {
            self.record(format!("unschedule {job}"))?;
            Ok(self.triggers.lock().unwrap().remove(job).is_some())
        }

        async fn pause_trigger(&self, trigger: &TriggerKey) -> Result<bool> {
            self.record(format!("pause {trigger}"))?;
            let mut triggers = self.triggers.lock().unwrap();
            Ok(match triggers.values_mut().find(|(t, _)| t == trigger) {
                Some(entry) => {
                    entry.1 = TriggerState::Paused;
                    true
                },
                None => false,
            })
        }

        async fn resume_trigger(&self, trigger: &TriggerKey) -> Result<bool> {
            self.record(format!("resume {trigger}"))?;
            let mut triggers = self.triggers.lock().unwrap();
            Ok(match triggers.values_mut().find(|(t, _)| t == trigger) {
                Some(entry) => {
                    entry.1 = TriggerState::Normal;
                    true
                },
                None => false,
            })
        }

        async fn fire_now(&self, job: &JobKey) -> Result<bool> {
            self.record(format!("fire {job}"))?;
            Ok(self.triggers.lock().unwrap().contains_key(job))
        }

        async fn triggers_of(&self, job: &JobKey) -> Result<Vec<TriggerInfo>> {
            self.record(format!("triggers {job}"))?;
            Ok(self
                .triggers
                .lock()
                .unwrap()
                .get(job)
                .map(|(key, state)| TriggerInfo {
                    key: key.clone(),
                    state: *state,
                    next_fire_at_ms: None,
                })
                .into_iter()
                .collect())
        }

        async fn scheduled_jobs(&self) -> Result<Vec<JobKey>> {
            self.record("jobs".into())?;
            Ok(self.triggers.lock().unwrap().keys().cloned().collect())
        }

        async fn next_fire_time(&self, _trigger: &TriggerKey) -> Result<Option<u64>> {
            Ok(None)
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::types::JobCreate};

    #[test]
    fn test_spec_carries_payload_under_data_key() {
        let mut create = JobCreate::new("a", "g", "0 * * * * ?", "demo");
        create.job_data = Some(r#"{"x":1}"#.into());
        let spec = TriggerSpec::from_definition(&create.into_definition(1));
        assert_eq!(spec.data.get(JOB_DATA_KEY).map(String::as_str), Some(r#"{"x":1}"#));
        assert_eq!(spec.trigger.name, "a_Trigger");
    }

    #[test]
    fn test_spec_without_payload_has_empty_map() {
        let def = JobCreate::new("a", "g", "0 * * * * ?", "demo").into_definition(1);
        assert!(TriggerSpec::from_definition(&def).data.is_empty());
    }

    #[test]
    fn test_failure_keeps_cause_chain() {
        let err = anyhow::anyhow!("disk full").context("writing report");
        let failure = JobFailure::from_error(&err);
        assert_eq!(failure.message, "writing report");
        assert!(failure.detail.contains("disk full"));
    }
}

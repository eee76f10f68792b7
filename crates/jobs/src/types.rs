//! Core data types: job definitions, execution log records, and their enums.

use serde::{Deserialize, Serialize};

/// Compound identity of a job (and, reused, of a trigger).
///
/// Stored identities compare the name case-insensitively and the group exactly,
/// see [`JobKey::matches`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub name: String,
    pub group: String,
}

/// Triggers are keyed the same way jobs are.
pub type TriggerKey = JobKey;

impl JobKey {
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }

    /// Identity rule used by every store: name ignores ASCII case, group is exact.
    #[must_use]
    pub fn matches(&self, name: &str, group: &str) -> bool {
        self.name.eq_ignore_ascii_case(name) && self.group == group
    }

    /// Default trigger identity for a job: `<name>_Trigger` in the job's group.
    #[must_use]
    pub fn default_trigger(&self) -> TriggerKey {
        Self::new(format!("{}_Trigger", self.name), self.group.clone())
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// Lifecycle status of a job definition.
///
/// Declaration order is the persisted integer code and the sort order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    #[default]
    Normal,
    Paused,
    Complete,
    Error,
    Blocked,
}

impl JobStatus {
    pub const ALL: [Self; 5] = [
        Self::Normal,
        Self::Paused,
        Self::Complete,
        Self::Error,
        Self::Blocked,
    ];

    #[must_use]
    pub fn code(self) -> i64 {
        self as i64
    }

    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// Paused and blocked definitions must never hold an active trigger.
    #[must_use]
    pub fn forbids_trigger(self) -> bool {
        matches!(self, Self::Paused | Self::Blocked)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Paused => "paused",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Blocked => "blocked",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| crate::Error::message(format!("unknown job status: {s}")))
    }
}

/// Outcome status of one execution.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum LogStatus {
    #[default]
    Running,
    Success,
    Failed,
}

impl LogStatus {
    pub const ALL: [Self; 3] = [Self::Running, Self::Success, Self::Failed];

    #[must_use]
    pub fn code(self) -> i64 {
        self as i64
    }

    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for LogStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| crate::Error::message(format!("unknown log status: {s}")))
    }
}

/// How a job body is resolved when it fires.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum JobKind {
    /// A registered in-process implementation, looked up by `target`.
    #[default]
    Native,
    /// An HTTP call to the URL in `target`.
    Api,
}

impl JobKind {
    #[must_use]
    pub fn code(self) -> i64 {
        self as i64
    }

    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        [Self::Native, Self::Api]
            .into_iter()
            .find(|k| k.code() == code)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Api => "api",
        }
    }
}

/// Durable description of what to run and on what schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDefinition {
    pub name: String,
    pub group: String,
    pub trigger_name: String,
    pub trigger_group: String,
    pub cron_expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub kind: JobKind,
    /// Registered kind id for native jobs, URL for API jobs.
    pub target: String,
    /// Opaque payload, see [`crate::codec`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at_ms: Option<u64>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fire_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_fire_at_ms: Option<u64>,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub updated_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

impl JobDefinition {
    #[must_use]
    pub fn key(&self) -> JobKey {
        JobKey::new(self.name.clone(), self.group.clone())
    }

    #[must_use]
    pub fn trigger_key(&self) -> TriggerKey {
        JobKey::new(self.trigger_name.clone(), self.trigger_group.clone())
    }

    #[must_use]
    pub fn is_keyed(&self, key: &JobKey) -> bool {
        key.matches(&self.name, &self.group)
    }

    /// Whether this definition should hold an active trigger.
    #[must_use]
    pub fn wants_trigger(&self) -> bool {
        self.enabled && !self.status.forbids_trigger()
    }

    /// Overwrite every mutable field from `other`, keeping identity and
    /// creation audit fields.
    pub fn apply_update(&mut self, other: &Self) {
        self.trigger_name = other.trigger_name.clone();
        self.trigger_group = other.trigger_group.clone();
        self.cron_expression = other.cron_expression.clone();
        self.description = other.description.clone();
        self.kind = other.kind;
        self.target = other.target.clone();
        self.job_data = other.job_data.clone();
        self.start_at_ms = other.start_at_ms;
        self.end_at_ms = other.end_at_ms;
        self.enabled = other.enabled;
        self.status = other.status;
        self.last_fire_at_ms = other.last_fire_at_ms;
        self.next_fire_at_ms = other.next_fire_at_ms;
        self.updated_at_ms = other.updated_at_ms;
        self.updated_by = other.updated_by.clone();
    }
}

/// Durable record of one firing's outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLog {
    pub id: String,
    pub job_name: String,
    pub job_group: String,
    pub trigger_name: String,
    pub trigger_group: String,
    pub started_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub status: LogStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Full error rendering including the cause chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    /// JSON snapshot of the merged parameter map at fire time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_data: Option<String>,
    pub created_at_ms: u64,
}

impl ExecutionLog {
    /// A fresh record with a generated id and no end time.
    pub fn begin(job: &JobKey, trigger: &TriggerKey, started_at_ms: u64, created_at_ms: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_name: job.name.clone(),
            job_group: job.group.clone(),
            trigger_name: trigger.name.clone(),
            trigger_group: trigger.group.clone(),
            started_at_ms,
            finished_at_ms: None,
            duration_ms: None,
            status: LogStatus::Running,
            message: None,
            error_message: None,
            exception: None,
            job_data: None,
            created_at_ms,
        }
    }

    /// Set the end time; duration is always derived from it.
    #[must_use]
    pub fn completed(mut self, finished_at_ms: u64) -> Self {
        self.finished_at_ms = Some(finished_at_ms);
        self.duration_ms = Some(finished_at_ms.saturating_sub(self.started_at_ms));
        self
    }

    #[must_use]
    pub fn job_key(&self) -> JobKey {
        JobKey::new(self.job_name.clone(), self.job_group.clone())
    }
}

/// Input for creating a new job through the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCreate {
    pub name: String,
    pub group: String,
    pub cron_expression: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub kind: JobKind,
    pub target: String,
    #[serde(default)]
    pub job_data: Option<String>,
    #[serde(default)]
    pub start_at_ms: Option<u64>,
    #[serde(default)]
    pub end_at_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub trigger_name: Option<String>,
    #[serde(default)]
    pub trigger_group: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

fn default_true() -> bool {
    true
}

impl JobCreate {
    pub fn new(
        name: impl Into<String>,
        group: impl Into<String>,
        cron_expression: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            cron_expression: cron_expression.into(),
            description: None,
            kind: JobKind::Native,
            target: target.into(),
            job_data: None,
            start_at_ms: None,
            end_at_ms: None,
            enabled: true,
            trigger_name: None,
            trigger_group: None,
            created_by: None,
        }
    }

    /// Materialize a definition stamped with `now_ms` as both created and updated time.
    #[must_use]
    pub fn into_definition(self, now_ms: u64) -> JobDefinition {
        let key = JobKey::new(self.name.clone(), self.group.clone());
        let default_trigger = key.default_trigger();
        JobDefinition {
            trigger_name: self.trigger_name.unwrap_or(default_trigger.name),
            trigger_group: self.trigger_group.unwrap_or(default_trigger.group),
            name: self.name,
            group: self.group,
            cron_expression: self.cron_expression,
            description: self.description,
            kind: self.kind,
            target: self.target,
            job_data: self.job_data,
            start_at_ms: self.start_at_ms,
            end_at_ms: self.end_at_ms,
            enabled: self.enabled,
            status: JobStatus::Normal,
            last_fire_at_ms: None,
            next_fire_at_ms: None,
            created_at_ms: now_ms,
            updated_by: self.created_by.clone(),
            created_by: self.created_by,
            updated_at_ms: now_ms,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_matching_ignores_name_case_only() {
        let key = JobKey::new("Cleanup", "DEFAULT");
        assert!(key.matches("cleanup", "DEFAULT"));
        assert!(!key.matches("cleanup", "default"));
    }

    #[test]
    fn test_key_display() {
        assert_eq!(JobKey::new("a", "g").to_string(), "g.a");
    }

    #[test]
    fn test_status_codes_are_stable() {
        assert_eq!(JobStatus::Normal.code(), 0);
        assert_eq!(JobStatus::Blocked.code(), 4);
        assert_eq!(JobStatus::from_code(1), Some(JobStatus::Paused));
        assert_eq!(JobStatus::from_code(9), None);
        assert_eq!(LogStatus::from_code(2), Some(LogStatus::Failed));
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("Paused".parse::<JobStatus>().unwrap(), JobStatus::Paused);
        assert!("sleeping".parse::<JobStatus>().is_err());
        assert_eq!("SUCCESS".parse::<LogStatus>().unwrap(), LogStatus::Success);
    }

    #[test]
    fn test_wants_trigger() {
        let mut def = JobCreate::new("a", "g", "0 0/5 * * * ?", "demo").into_definition(1000);
        assert!(def.wants_trigger());
        def.status = JobStatus::Blocked;
        assert!(!def.wants_trigger());
        def.status = JobStatus::Complete;
        assert!(def.wants_trigger());
        def.enabled = false;
        assert!(!def.wants_trigger());
    }

    #[test]
    fn test_create_defaults_trigger_identity() {
        let def = JobCreate::new("Report", "NIGHTLY", "0 0 2 * * ?", "demo").into_definition(5);
        assert_eq!(def.trigger_name, "Report_Trigger");
        assert_eq!(def.trigger_group, "NIGHTLY");
        assert_eq!(def.created_at_ms, 5);
        assert_eq!(def.updated_at_ms, 5);
        assert_eq!(def.status, JobStatus::Normal);
    }

    #[test]
    fn test_apply_update_preserves_identity_and_creation() {
        let mut stored = JobCreate::new("a", "g", "0 * * * * ?", "demo").into_definition(1000);
        stored.created_by = Some("alice".into());

        let mut incoming = JobCreate::new("A", "other", "0 0 * * * ?", "demo2").into_definition(9000);
        incoming.created_by = Some("mallory".into());
        incoming.enabled = false;

        stored.apply_update(&incoming);
        assert_eq!(stored.name, "a");
        assert_eq!(stored.group, "g");
        assert_eq!(stored.created_at_ms, 1000);
        assert_eq!(stored.created_by.as_deref(), Some("alice"));
        assert_eq!(stored.cron_expression, "0 0 * * * ?");
        assert_eq!(stored.target, "demo2");
        assert!(!stored.enabled);
        assert_eq!(stored.updated_at_ms, 9000);
    }

    #[test]
    fn test_completed_derives_duration() {
        let key = JobKey::new("a", "g");
        let log = ExecutionLog::begin(&key, &key.default_trigger(), 1_000, 1_000).completed(3_500);
        assert_eq!(log.duration_ms, Some(2_500));
        assert_eq!(log.finished_at_ms, Some(3_500));
    }

    #[test]
    fn test_completed_before_start_saturates() {
        let key = JobKey::new("a", "g");
        let log = ExecutionLog::begin(&key, &key, 5_000, 5_000).completed(4_000);
        assert_eq!(log.duration_ms, Some(0));
    }

    #[test]
    fn test_definition_json_is_camel_case() {
        let def = JobCreate::new("a", "g", "0 * * * * ?", "demo").into_definition(1);
        let v = serde_json::to_value(&def).unwrap();
        assert_eq!(v["cronExpression"], "0 * * * * ?");
        assert_eq!(v["createdAtMs"], 1);
        assert!(v.get("jobData").is_none());
    }

    #[test]
    fn test_job_create_defaults() {
        let json = r#"{
            "name": "a",
            "group": "g",
            "cronExpression": "0 * * * * ?",
            "target": "demo"
        }"#;
        let create: JobCreate = serde_json::from_str(json).unwrap();
        assert!(create.enabled);
        assert_eq!(create.kind, JobKind::Native);
    }
}

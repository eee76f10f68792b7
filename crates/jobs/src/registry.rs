//! Job implementations and their scheduling metadata.
//!
//! Native job bodies are registered under a kind id. Registering with
//! [`JobMetadata`] also makes the job discoverable, so startup can seed its
//! definition into storage.

use std::{collections::BTreeMap, sync::Arc};

use {
    async_trait::async_trait,
    serde::{Serialize, de::DeserializeOwned},
    tracing::{debug, warn},
};

use crate::{
    Result, codec,
    codec::JobDataMap,
    http_job::HttpJob,
    schedule::parse_cron,
    types::{JobCreate, JobDefinition, JobKey, JobKind, TriggerKey},
};

/// Everything a job body sees when it runs.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job: JobKey,
    pub trigger: TriggerKey,
    pub fire_time_ms: u64,
    pub data: JobDataMap,
}

impl JobContext {
    /// Decode the structured payload, see [`codec::decode`].
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        codec::decode(&self.data)
    }
}

/// A unit of work the scheduler can fire.
#[async_trait]
pub trait Job: Send + Sync {
    async fn execute(&self, ctx: &JobContext) -> anyhow::Result<()>;
}

/// Scheduling metadata a job implementation declares about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetadata {
    pub name: String,
    pub group: String,
    pub cron_expression: String,
    pub description: Option<String>,
    pub enabled: bool,
}

impl JobMetadata {
    pub fn new(
        name: impl Into<String>,
        group: impl Into<String>,
        cron_expression: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
            cron_expression: cron_expression.into(),
            description: None,
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// One discoverable job: the kind id plus its declared metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredJob {
    pub kind_id: String,
    pub metadata: JobMetadata,
}

impl DiscoveredJob {
    #[must_use]
    pub fn key(&self) -> JobKey {
        JobKey::new(self.metadata.name.clone(), self.metadata.group.clone())
    }

    /// Native definition with default trigger identity.
    #[must_use]
    pub fn into_definition(self, now_ms: u64) -> JobDefinition {
        let mut create = JobCreate::new(
            self.metadata.name,
            self.metadata.group,
            self.metadata.cron_expression,
            self.kind_id,
        );
        create.description = self.metadata.description;
        create.enabled = self.metadata.enabled;
        create.kind = JobKind::Native;
        create.into_definition(now_ms)
    }
}

type JobFactory = Arc<dyn Fn() -> Arc<dyn Job> + Send + Sync>;

struct Entry {
    factory: JobFactory,
    metadata: Option<JobMetadata>,
}

/// Kind id → job factory table.
pub struct JobRegistry {
    entries: BTreeMap<String, Entry>,
    http: reqwest::Client,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            http: reqwest::Client::new(),
        }
    }

    /// Register a job body that is only ever created by explicit definitions.
    pub fn register<J, F>(&mut self, kind_id: impl Into<String>, factory: F)
    where
        J: Job + 'static,
        F: Fn() -> J + Send + Sync + 'static,
    {
        self.insert(kind_id.into(), factory, None);
    }

    /// Register a job body together with the schedule it should be seeded with.
    pub fn register_scheduled<J, F>(
        &mut self,
        kind_id: impl Into<String>,
        metadata: JobMetadata,
        factory: F,
    ) where
        J: Job + 'static,
        F: Fn() -> J + Send + Sync + 'static,
    {
        self.insert(kind_id.into(), factory, Some(metadata));
    }

    fn insert<J, F>(&mut self, kind_id: String, factory: F, metadata: Option<JobMetadata>)
    where
        J: Job + 'static,
        F: Fn() -> J + Send + Sync + 'static,
    {
        let factory: JobFactory = Arc::new(move || Arc::new(factory()) as Arc<dyn Job>);
        if self
            .entries
            .insert(kind_id.clone(), Entry { factory, metadata })
            .is_some()
        {
            warn!(kind = %kind_id, "job kind registered twice, keeping the last registration");
        }
    }

    #[must_use]
    pub fn contains(&self, kind_id: &str) -> bool {
        self.entries.contains_key(kind_id)
    }

    /// New instance of a native job body.
    #[must_use]
    pub fn create(&self, kind_id: &str) -> Option<Arc<dyn Job>> {
        self.entries.get(kind_id).map(|entry| (entry.factory)())
    }

    /// Body for a stored definition's kind and target.
    #[must_use]
    pub fn resolve(&self, kind: JobKind, target: &str) -> Option<Arc<dyn Job>> {
        match kind {
            JobKind::Native => self.create(target),
            JobKind::Api => Some(Arc::new(HttpJob::new(self.http.clone(), target))),
        }
    }

    /// Every registered job that declared metadata, in kind-id order.
    ///
    /// Entries with an empty name or group, or an unparseable cron
    /// expression, are skipped with a warning.
    #[must_use]
    pub fn discover(&self) -> Vec<DiscoveredJob> {
        let mut found = Vec::new();
        for (kind_id, entry) in &self.entries {
            let Some(metadata) = &entry.metadata else {
                continue;
            };
            if metadata.name.trim().is_empty() || metadata.group.trim().is_empty() {
                warn!(kind = %kind_id, "skipping discovered job with empty name or group");
                continue;
            }
            if let Err(e) = parse_cron(&metadata.cron_expression) {
                warn!(kind = %kind_id, error = %e, "skipping discovered job");
                continue;
            }
            found.push(DiscoveredJob {
                kind_id: kind_id.clone(),
                metadata: metadata.clone(),
            });
        }
        debug!(count = found.len(), "discovered jobs");
        found
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl Job for Noop {
        async fn execute(&self, _ctx: &JobContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn registry() -> JobRegistry {
        let mut registry = JobRegistry::new();
        registry.register_scheduled(
            "cleanup",
            JobMetadata::new("Cleanup", "MAINT", "0 0 3 * * ?").with_description("nightly"),
            || Noop,
        );
        registry.register_scheduled(
            "paused",
            JobMetadata::new("Paused", "MAINT", "0 0 4 * * ?").disabled(),
            || Noop,
        );
        registry.register_scheduled("broken", JobMetadata::new("Broken", "MAINT", "nope"), || Noop);
        registry.register_scheduled("anon", JobMetadata::new("", "MAINT", "0 * * * * ?"), || Noop);
        registry.register("adhoc", || Noop);
        registry
    }

    #[test]
    fn test_discover_skips_invalid_and_unscheduled() {
        let found = registry().discover();
        let kinds: Vec<_> = found.iter().map(|d| d.kind_id.as_str()).collect();
        assert_eq!(kinds, ["cleanup", "paused"]);
    }

    #[test]
    fn test_discover_is_restartable() {
        let registry = registry();
        assert_eq!(registry.discover(), registry.discover());
    }

    #[test]
    fn test_discovered_definition_defaults() {
        let found = registry().discover().remove(0);
        let def = found.into_definition(42);
        assert_eq!(def.name, "Cleanup");
        assert_eq!(def.trigger_name, "Cleanup_Trigger");
        assert_eq!(def.trigger_group, "MAINT");
        assert_eq!(def.kind, JobKind::Native);
        assert_eq!(def.target, "cleanup");
        assert_eq!(def.description.as_deref(), Some("nightly"));
        assert!(def.enabled);
    }

    #[test]
    fn test_create_and_resolve() {
        let registry = registry();
        assert!(registry.create("adhoc").is_some());
        assert!(registry.create("missing").is_none());
        assert!(registry.resolve(JobKind::Native, "cleanup").is_some());
        assert!(registry.resolve(JobKind::Api, "http://localhost/ping").is_some());
    }
}

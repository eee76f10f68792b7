//! Job bodies shipped with the binary.

use {
    async_trait::async_trait,
    jobkeeper_jobs::{Job, JobContext, JobMetadata, JobRegistry},
    serde::{Deserialize, Serialize},
    tracing::info,
};

/// Emits one log line per firing.
struct Heartbeat;

#[async_trait]
impl Job for Heartbeat {
    async fn execute(&self, ctx: &JobContext) -> anyhow::Result<()> {
        info!(job = %ctx.job, fire_time = ctx.fire_time_ms, "heartbeat");
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct EchoPayload {
    #[serde(default)]
    message: String,
}

/// Logs the `message` of its job-data payload.
struct Echo;

#[async_trait]
impl Job for Echo {
    async fn execute(&self, ctx: &JobContext) -> anyhow::Result<()> {
        let payload: EchoPayload = ctx.decode()?.unwrap_or_default();
        info!(job = %ctx.job, message = %payload.message, "echo");
        Ok(())
    }
}

pub fn registry() -> JobRegistry {
    let mut registry = JobRegistry::new();
    registry.register_scheduled(
        "heartbeat",
        JobMetadata::new("Heartbeat", "SYSTEM", "0 0/5 * * * ?")
            .with_description("Liveness line every five minutes"),
        || Heartbeat,
    );
    registry.register("echo", || Echo);
    registry
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        jobkeeper_jobs::{JobKey, codec},
    };

    #[test]
    fn test_registry_discovers_heartbeat_only() {
        let found = registry().discover();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key(), JobKey::new("Heartbeat", "SYSTEM"));
        assert!(registry().contains("echo"));
    }

    #[tokio::test]
    async fn test_echo_reads_payload() {
        let mut data = codec::JobDataMap::new();
        codec::insert(&mut data, &EchoPayload {
            message: "hi".into(),
        })
        .unwrap();
        let key = JobKey::new("e", "g");
        let ctx = JobContext {
            trigger: key.default_trigger(),
            job: key,
            fire_time_ms: 0,
            data,
        };
        Echo.execute(&ctx).await.unwrap();
    }
}

//! Job body for API-kind definitions: one HTTP request per firing.

use std::{collections::BTreeMap, time::Duration};

use {
    anyhow::{Context, bail},
    async_trait::async_trait,
    reqwest::Method,
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use crate::registry::{Job, JobContext};

/// Request shape read from the job-data payload. Everything is optional;
/// the default is a bodyless `GET`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRequest {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

pub struct HttpJob {
    client: reqwest::Client,
    url: String,
}

impl HttpJob {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Job for HttpJob {
    async fn execute(&self, ctx: &JobContext) -> anyhow::Result<()> {
        let request: ApiRequest = ctx.decode()?.unwrap_or_default();
        let method = match request.method.as_deref() {
            Some(m) => Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
                .with_context(|| format!("invalid HTTP method {m:?}"))?,
            None => Method::GET,
        };

        let mut builder = self.client.request(method.clone(), &self.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(secs) = request.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("{method} {} failed", self.url))?;
        let status = response.status();
        debug!(job = %ctx.job, %status, url = %self.url, "api job response");
        if !status.is_success() {
            bail!("{method} {} returned {status}", self.url);
        }
        Ok(())
    }
}

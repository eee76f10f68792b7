use {
    jobkeeper_jobs::analytics::{Analytics, TimeRange},
    serde_json::json,
};

use crate::{print_json, runtime::Runtime};

/// Summary, distributions, duration histogram and hourly trend in one document.
pub async fn handle_stats(rt: &Runtime, range: &str) -> anyhow::Result<()> {
    let range: TimeRange = range.parse()?;
    let analytics = Analytics::new(rt.store.clone());
    print_json(&json!({
        "summary": analytics.summary(range).await?,
        "statusDistribution": analytics.status_distribution().await?,
        "kindDistribution": analytics.kind_distribution().await?,
        "executionTime": analytics.execution_time_histogram(range).await?,
        "trend": analytics.trend(range).await?,
    }))
}

//! Read-side statistics over stored definitions and execution logs.

use std::{collections::BTreeMap, sync::Arc};

use {
    chrono::{DateTime, Datelike, Days, Local, NaiveDate, NaiveTime, Timelike},
    serde::{Deserialize, Serialize},
};

use {
    crate::{
        Error, Result,
        query::{LogFilter, LogQuery, LogSortField, PageRequest, Sort, SortOrder},
        store::JobStore,
        types::{ExecutionLog, JobDefinition, JobStatus, LogStatus},
    },
    jobkeeper_common::time::{MS_PER_DAY, MS_PER_SECOND, local_datetime, local_to_ms},
};

/// Window of log start times a statistic covers. Bounds are inclusive and
/// computed in local time; every range except `Yesterday` and `Custom` ends now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "range")]
pub enum TimeRange {
    Today,
    Yesterday,
    /// Since Sunday 00:00.
    ThisWeek,
    ThisMonth,
    Custom {
        from_ms: u64,
        to_ms: u64,
    },
    #[default]
    Last7Days,
}

impl TimeRange {
    /// `(from_ms, to_ms)` relative to the current time.
    #[must_use]
    pub fn bounds(self) -> (u64, u64) {
        self.bounds_at(Local::now())
    }

    #[must_use]
    pub fn bounds_at(self, now: DateTime<Local>) -> (u64, u64) {
        let now_ms = local_to_ms(&now);
        let today = now.date_naive();
        match self {
            Self::Today => (midnight_ms(today), now_ms),
            Self::Yesterday => {
                let start = today.checked_sub_days(Days::new(1)).unwrap_or(today);
                (midnight_ms(start), midnight_ms(today).saturating_sub(1))
            },
            Self::ThisWeek => {
                let back = Days::new(u64::from(today.weekday().num_days_from_sunday()));
                (midnight_ms(today.checked_sub_days(back).unwrap_or(today)), now_ms)
            },
            Self::ThisMonth => (midnight_ms(today.with_day(1).unwrap_or(today)), now_ms),
            Self::Custom { from_ms, to_ms } => (from_ms, to_ms),
            Self::Last7Days => (now_ms.saturating_sub(7 * MS_PER_DAY), now_ms),
        }
    }
}

impl std::str::FromStr for TimeRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "today" => Ok(Self::Today),
            "yesterday" => Ok(Self::Yesterday),
            "thisweek" | "week" => Ok(Self::ThisWeek),
            "thismonth" | "month" => Ok(Self::ThisMonth),
            "last7days" | "default" | "" => Ok(Self::Last7Days),
            _ => Err(Error::message(format!("unknown time range: {s}"))),
        }
    }
}

fn midnight_ms(date: NaiveDate) -> u64 {
    let naive = date.and_time(NaiveTime::MIN);
    match naive.and_local_timezone(Local).earliest() {
        Some(dt) => local_to_ms(&dt),
        // Midnight skipped by a DST change.
        None => naive.and_utc().timestamp_millis().max(0) as u64,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub from_ms: u64,
    pub to_ms: u64,
    pub total_jobs: u64,
    pub enabled_jobs: u64,
    pub disabled_jobs: u64,
    pub paused_jobs: u64,
    pub blocked_jobs: u64,
    pub running: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// One group of a distribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Share {
    pub label: String,
    pub count: u64,
    /// Rounded to two decimals.
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DurationBucket {
    pub label: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    /// Local start of the hour, `yyyy-MM-dd HH:00`.
    pub bucket: String,
    pub bucket_start_ms: u64,
    pub success: u64,
    pub failed: u64,
    pub total: u64,
}

/// Upper bounds in seconds, exclusive. Anything longer lands in the last bucket.
const DURATION_BUCKETS: [(f64, &str); 6] = [
    (1.0, "< 1s"),
    (5.0, "1-5s"),
    (10.0, "5-10s"),
    (30.0, "10-30s"),
    (60.0, "30s-1m"),
    (300.0, "1-5m"),
];
const OVERFLOW_BUCKET: &str = ">= 5m";

pub struct Analytics {
    store: Arc<dyn JobStore>,
}

impl Analytics {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Definition counts over all jobs, log outcome counts within `range`.
    pub async fn summary(&self, range: TimeRange) -> Result<Summary> {
        let (from_ms, to_ms) = range.bounds();
        let jobs = self.store.all_jobs().await?;
        let logs = self.logs_between(from_ms, to_ms).await?;

        let count_jobs =
            |pred: fn(&JobDefinition) -> bool| jobs.iter().filter(|&j| pred(j)).count() as u64;
        let count_logs =
            |status: LogStatus| logs.iter().filter(|l| l.status == status).count() as u64;

        Ok(Summary {
            from_ms,
            to_ms,
            total_jobs: jobs.len() as u64,
            enabled_jobs: count_jobs(|j| j.enabled),
            disabled_jobs: count_jobs(|j| !j.enabled),
            paused_jobs: count_jobs(|j| j.status == JobStatus::Paused),
            blocked_jobs: count_jobs(|j| j.status == JobStatus::Blocked),
            running: count_logs(LogStatus::Running),
            succeeded: count_logs(LogStatus::Success),
            failed: count_logs(LogStatus::Failed),
        })
    }

    /// Jobs grouped by status. Only statuses that occur are listed.
    pub async fn status_distribution(&self) -> Result<Vec<Share>> {
        let jobs = self.store.all_jobs().await?;
        Ok(distribution(jobs.iter().map(|j| j.status), |s| s.as_str()))
    }

    /// Jobs grouped by kind. Only kinds that occur are listed.
    pub async fn kind_distribution(&self) -> Result<Vec<Share>> {
        let jobs = self.store.all_jobs().await?;
        Ok(distribution(jobs.iter().map(|j| j.kind), |k| k.as_str()))
    }

    /// Finished executions in `range` by duration. Every bucket is listed.
    pub async fn execution_time_histogram(&self, range: TimeRange) -> Result<Vec<DurationBucket>> {
        let (from, to) = range.bounds();
        Ok(histogram(&self.logs_between(from, to).await?))
    }

    /// Outcome counts per local hour of start time, oldest first.
    pub async fn trend(&self, range: TimeRange) -> Result<Vec<TrendPoint>> {
        let (from, to) = range.bounds();
        Ok(trend(&self.logs_between(from, to).await?))
    }

    // ── Internal ────────────────────────────────────────────────────────

    async fn logs_between(&self, from_ms: u64, to_ms: u64) -> Result<Vec<ExecutionLog>> {
        let query = LogQuery {
            filter: LogFilter {
                started_from_ms: Some(from_ms),
                started_to_ms: Some(to_ms),
                ..Default::default()
            },
            sort: Sort::new(LogSortField::StartedAt, SortOrder::Asc),
            page: PageRequest::all(),
        };
        Ok(self.store.list_logs(&query).await?.items)
    }
}

/// `count / total * 100` rounded to two decimals, 0 when `total` is 0.
#[must_use]
pub fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 / total as f64 * 10_000.0).round() / 100.0
}

fn distribution<K: Ord + Copy>(
    keys: impl Iterator<Item = K>,
    label: impl Fn(K) -> &'static str,
) -> Vec<Share> {
    let mut counts: BTreeMap<K, u64> = BTreeMap::new();
    for key in keys {
        *counts.entry(key).or_default() += 1;
    }
    let total: u64 = counts.values().sum();
    counts
        .into_iter()
        .map(|(key, count)| Share {
            label: label(key).to_string(),
            count,
            percentage: percentage(count, total),
        })
        .collect()
}

fn histogram(logs: &[ExecutionLog]) -> Vec<DurationBucket> {
    let mut counts = [0u64; DURATION_BUCKETS.len() + 1];
    for log in logs.iter().filter(|l| l.status != LogStatus::Running) {
        let Some(duration_ms) = log.duration_ms else {
            continue;
        };
        let secs = duration_ms as f64 / MS_PER_SECOND as f64;
        let idx = DURATION_BUCKETS
            .iter()
            .position(|(upper, _)| secs < *upper)
            .unwrap_or(DURATION_BUCKETS.len());
        counts[idx] += 1;
    }
    DURATION_BUCKETS
        .iter()
        .map(|(_, label)| *label)
        .chain(std::iter::once(OVERFLOW_BUCKET))
        .zip(counts)
        .map(|(label, count)| DurationBucket {
            label: label.to_string(),
            count,
        })
        .collect()
}

fn trend(logs: &[ExecutionLog]) -> Vec<TrendPoint> {
    let mut points: BTreeMap<u64, TrendPoint> = BTreeMap::new();
    for log in logs {
        let started = local_datetime(log.started_at_ms);
        let into_hour = u64::from(started.minute()) * 60_000
            + u64::from(started.second()) * MS_PER_SECOND
            + u64::from(started.timestamp_subsec_millis());
        let bucket_start_ms = log.started_at_ms.saturating_sub(into_hour);
        let point = points.entry(bucket_start_ms).or_insert_with(|| TrendPoint {
            bucket: started.format("%Y-%m-%d %H:00").to_string(),
            bucket_start_ms,
            success: 0,
            failed: 0,
            total: 0,
        });
        point.total += 1;
        match log.status {
            LogStatus::Success => point.success += 1,
            LogStatus::Failed => point.failed += 1,
            LogStatus::Running => {},
        }
    }
    points.into_values().collect()
}

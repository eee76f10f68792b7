//! Filtering, sorting and paging shared by every store backend.
//!
//! The in-process backends apply these directly through [`JobFilter::matches`],
//! [`sort_jobs`] and [`Page::slice`]; the SQL backend renders the same
//! semantics into a query.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::types::{ExecutionLog, JobDefinition, JobStatus, LogStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    /// Only an explicit `asc` (any case) sorts ascending.
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some(s) if s.trim().eq_ignore_ascii_case("asc") => Self::Asc,
            _ => Self::Desc,
        }
    }

    #[must_use]
    pub fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    fn apply(self, ord: Ordering) -> Ordering {
        match self {
            Self::Asc => ord,
            Self::Desc => ord.reverse(),
        }
    }
}

/// A sortable column of some record type.
pub trait SortField: Copy {
    /// Field used when the requested key is missing or unknown.
    const FALLBACK: Self;

    fn parse(raw: &str) -> Option<Self>;

    /// Column name in the relational schema.
    fn column(self) -> &'static str;
}

fn normalize_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != '_' && *c != '-' && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSortField {
    Name,
    Group,
    Status,
    Enabled,
    CreatedAt,
    UpdatedAt,
}

impl SortField for JobSortField {
    const FALLBACK: Self = Self::CreatedAt;

    fn parse(raw: &str) -> Option<Self> {
        match normalize_key(raw).as_str() {
            "name" | "jobname" => Some(Self::Name),
            "group" | "jobgroup" => Some(Self::Group),
            "status" => Some(Self::Status),
            "enabled" | "isenabled" => Some(Self::Enabled),
            "createtime" | "createdtime" | "createdat" | "createdatms" => Some(Self::CreatedAt),
            "updatetime" | "updatedtime" | "updatedat" | "updatedatms" => Some(Self::UpdatedAt),
            _ => None,
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Group => "job_group",
            Self::Status => "status",
            Self::Enabled => "enabled",
            Self::CreatedAt => "created_at_ms",
            Self::UpdatedAt => "updated_at_ms",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSortField {
    Name,
    Group,
    Status,
    CreatedAt,
    StartedAt,
    FinishedAt,
    Duration,
}

impl SortField for LogSortField {
    const FALLBACK: Self = Self::CreatedAt;

    fn parse(raw: &str) -> Option<Self> {
        match normalize_key(raw).as_str() {
            "name" | "jobname" => Some(Self::Name),
            "group" | "jobgroup" => Some(Self::Group),
            "status" => Some(Self::Status),
            "createtime" | "createdtime" | "createdat" | "createdatms" => Some(Self::CreatedAt),
            "starttime" | "startedat" | "startedatms" => Some(Self::StartedAt),
            "endtime" | "finishedat" | "finishedatms" => Some(Self::FinishedAt),
            "duration" | "durationms" => Some(Self::Duration),
            _ => None,
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::Name => "job_name",
            Self::Group => "job_group",
            Self::Status => "status",
            Self::CreatedAt => "created_at_ms",
            Self::StartedAt => "started_at_ms",
            Self::FinishedAt => "finished_at_ms",
            Self::Duration => "duration_ms",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort<F> {
    pub field: F,
    pub order: SortOrder,
}

impl<F: SortField> Default for Sort<F> {
    fn default() -> Self {
        Self {
            field: F::FALLBACK,
            order: SortOrder::Desc,
        }
    }
}

impl<F: SortField> Sort<F> {
    #[must_use]
    pub fn new(field: F, order: SortOrder) -> Self {
        Self { field, order }
    }

    /// Resolve a textual sort request. An absent or unknown key falls back to
    /// creation time descending regardless of the requested direction.
    #[must_use]
    pub fn parse(by: Option<&str>, order: Option<&str>) -> Self {
        match by.filter(|s| !s.trim().is_empty()).and_then(F::parse) {
            Some(field) => Self {
                field,
                order: SortOrder::parse(order),
            },
            None => Self::default(),
        }
    }
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
        }
    }
}

impl PageRequest {
    #[must_use]
    pub fn new(page: u32, page_size: u32) -> Self {
        Self { page, page_size }
    }

    /// A single page holding everything.
    #[must_use]
    pub fn all() -> Self {
        Self {
            page: 1,
            page_size: u32::MAX,
        }
    }

    /// Number of records skipped. Page 0 is treated as page 1.
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.page_size)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Number of records matching the filter before paging.
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl<T> Page<T> {
    /// Cut one page out of an already filtered and sorted list.
    #[must_use]
    pub fn slice(all: Vec<T>, req: PageRequest) -> Self {
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(usize::try_from(req.offset()).unwrap_or(usize::MAX))
            .take(req.page_size as usize)
            .collect();
        Self {
            items,
            total,
            page: req.page,
            page_size: req.page_size,
        }
    }

    #[must_use]
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(self.page_size))
    }
}

/// ASCII-only case folding, the same rule SQLite's `lower()` applies.
fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack
        .to_ascii_lowercase()
        .contains(needle.to_ascii_lowercase().as_str())
}

/// Empty strings behave like an absent filter.
fn text_filter(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

/// Conjunctive filter over job definitions. Text fields are case-insensitive
/// substring matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFilter {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl JobFilter {
    #[must_use]
    pub fn matches(&self, job: &JobDefinition) -> bool {
        text_filter(&self.name).is_none_or(|n| contains_ci(&job.name, n))
            && text_filter(&self.group).is_none_or(|g| contains_ci(&job.group, g))
            && self.status.is_none_or(|s| job.status == s)
            && self.enabled.is_none_or(|e| job.enabled == e)
    }

    #[must_use]
    pub fn name_pattern(&self) -> Option<&str> {
        text_filter(&self.name)
    }

    #[must_use]
    pub fn group_pattern(&self) -> Option<&str> {
        text_filter(&self.group)
    }
}

/// Conjunctive filter over execution logs. The time bounds apply to the start
/// time and are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub status: Option<LogStatus>,
    #[serde(default)]
    pub started_from_ms: Option<u64>,
    #[serde(default)]
    pub started_to_ms: Option<u64>,
}

impl LogFilter {
    #[must_use]
    pub fn matches(&self, log: &ExecutionLog) -> bool {
        text_filter(&self.name).is_none_or(|n| contains_ci(&log.job_name, n))
            && text_filter(&self.group).is_none_or(|g| contains_ci(&log.job_group, g))
            && self.status.is_none_or(|s| log.status == s)
            && self.started_from_ms.is_none_or(|from| log.started_at_ms >= from)
            && self.started_to_ms.is_none_or(|to| log.started_at_ms <= to)
    }

    #[must_use]
    pub fn name_pattern(&self) -> Option<&str> {
        text_filter(&self.name)
    }

    #[must_use]
    pub fn group_pattern(&self) -> Option<&str> {
        text_filter(&self.group)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobQuery {
    pub filter: JobFilter,
    pub sort: Sort<JobSortField>,
    pub page: PageRequest,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogQuery {
    pub filter: LogFilter,
    pub sort: Sort<LogSortField>,
    pub page: PageRequest,
}

/// Stable sort, so equal keys keep insertion order.
pub fn sort_jobs(jobs: &mut [JobDefinition], sort: Sort<JobSortField>) {
    jobs.sort_by(|a, b| {
        let ord = match sort.field {
            JobSortField::Name => a.name.cmp(&b.name),
            JobSortField::Group => a.group.cmp(&b.group),
            JobSortField::Status => a.status.cmp(&b.status),
            JobSortField::Enabled => a.enabled.cmp(&b.enabled),
            JobSortField::CreatedAt => a.created_at_ms.cmp(&b.created_at_ms),
            JobSortField::UpdatedAt => a.updated_at_ms.cmp(&b.updated_at_ms),
        };
        sort.order.apply(ord)
    });
}

pub fn sort_logs(logs: &mut [ExecutionLog], sort: Sort<LogSortField>) {
    logs.sort_by(|a, b| {
        let ord = match sort.field {
            LogSortField::Name => a.job_name.cmp(&b.job_name),
            LogSortField::Group => a.job_group.cmp(&b.job_group),
            LogSortField::Status => a.status.cmp(&b.status),
            LogSortField::CreatedAt => a.created_at_ms.cmp(&b.created_at_ms),
            LogSortField::StartedAt => a.started_at_ms.cmp(&b.started_at_ms),
            LogSortField::FinishedAt => a.finished_at_ms.cmp(&b.finished_at_ms),
            LogSortField::Duration => a.duration_ms.cmp(&b.duration_ms),
        };
        sort.order.apply(ord)
    });
}

/// Filter, sort and page an in-memory list of definitions.
#[must_use]
pub fn query_jobs(jobs: Vec<JobDefinition>, query: &JobQuery) -> Page<JobDefinition> {
    let mut matched: Vec<_> = jobs.into_iter().filter(|j| query.filter.matches(j)).collect();
    sort_jobs(&mut matched, query.sort);
    Page::slice(matched, query.page)
}

/// Filter, sort and page an in-memory list of logs.
#[must_use]
pub fn query_logs(logs: Vec<ExecutionLog>, query: &LogQuery) -> Page<ExecutionLog> {
    let mut matched: Vec<_> = logs.into_iter().filter(|l| query.filter.matches(l)).collect();
    sort_logs(&mut matched, query.sort);
    Page::slice(matched, query.page)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::types::{JobCreate, JobKey},
        rstest::rstest,
    };

    fn job(name: &str, group: &str, created: u64) -> JobDefinition {
        JobCreate::new(name, group, "0 * * * * ?", "demo").into_definition(created)
    }

    #[rstest]
    #[case(Some("jobName"), Some("asc"), JobSortField::Name, SortOrder::Asc)]
    #[case(Some("JOB_GROUP"), Some("ASC"), JobSortField::Group, SortOrder::Asc)]
    #[case(Some("isEnabled"), None, JobSortField::Enabled, SortOrder::Desc)]
    #[case(Some("updateTime"), Some("sideways"), JobSortField::UpdatedAt, SortOrder::Desc)]
    #[case(Some("bogus"), Some("asc"), JobSortField::CreatedAt, SortOrder::Desc)]
    #[case(None, Some("asc"), JobSortField::CreatedAt, SortOrder::Desc)]
    #[case(Some(""), None, JobSortField::CreatedAt, SortOrder::Desc)]
    fn test_job_sort_parse(
        #[case] by: Option<&str>,
        #[case] order: Option<&str>,
        #[case] field: JobSortField,
        #[case] expected: SortOrder,
    ) {
        let sort = Sort::<JobSortField>::parse(by, order);
        assert_eq!(sort.field, field);
        assert_eq!(sort.order, expected);
    }

    #[rstest]
    #[case("startTime", LogSortField::StartedAt)]
    #[case("endTime", LogSortField::FinishedAt)]
    #[case("duration", LogSortField::Duration)]
    #[case("createTime", LogSortField::CreatedAt)]
    fn test_log_sort_parse(#[case] by: &str, #[case] field: LogSortField) {
        assert_eq!(Sort::<LogSortField>::parse(Some(by), None).field, field);
    }

    #[test]
    fn test_job_filter_is_conjunctive_and_case_insensitive() {
        let a = job("NightlyReport", "REPORTS", 1);
        let filter = JobFilter {
            name: Some("report".into()),
            group: Some("rep".into()),
            ..Default::default()
        };
        assert!(filter.matches(&a));

        let filter = JobFilter {
            name: Some("report".into()),
            status: Some(JobStatus::Paused),
            ..Default::default()
        };
        assert!(!filter.matches(&a));
    }

    #[test]
    fn test_text_filter_folds_ascii_only() {
        let filter = JobFilter {
            name: Some("REPORT".into()),
            ..Default::default()
        };
        assert!(filter.matches(&job("dailyreport", "g", 1)));

        let filter = JobFilter {
            name: Some("ÉTÉ".into()),
            ..Default::default()
        };
        assert!(!filter.matches(&job("été", "g", 1)));
        assert!(filter.matches(&job("ÉTÉ-sync", "g", 1)));
    }

    #[test]
    fn test_empty_text_filter_is_ignored() {
        let filter = JobFilter {
            name: Some(String::new()),
            ..Default::default()
        };
        assert!(filter.matches(&job("x", "g", 1)));
    }

    #[test]
    fn test_log_filter_time_bounds_are_inclusive() {
        let key = JobKey::new("a", "g");
        let log = ExecutionLog::begin(&key, &key, 1_000, 1_000);
        let filter = LogFilter {
            started_from_ms: Some(1_000),
            started_to_ms: Some(1_000),
            ..Default::default()
        };
        assert!(filter.matches(&log));
        let filter = LogFilter {
            started_from_ms: Some(1_001),
            ..Default::default()
        };
        assert!(!filter.matches(&log));
    }

    #[test]
    fn test_paging_reports_total_before_slicing() {
        let jobs: Vec<_> = (0..25).map(|i| job(&format!("j{i}"), "g", i)).collect();
        let query = JobQuery {
            page: PageRequest::new(3, 10),
            ..Default::default()
        };
        let page = query_jobs(jobs, &query);
        assert_eq!(page.total, 25);
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.total_pages(), 3);
        // default sort is created desc, so the last page holds the oldest
        assert_eq!(page.items[4].name, "j0");
    }

    #[test]
    fn test_page_past_end_is_empty() {
        let jobs: Vec<_> = (0..3).map(|i| job(&format!("j{i}"), "g", i)).collect();
        let page = Page::slice(jobs, PageRequest::new(5, 10));
        assert!(page.items.is_empty());
        assert_eq!(page.total, 3);
    }

    #[test]
    fn test_page_zero_behaves_like_first() {
        assert_eq!(PageRequest::new(0, 10).offset(), 0);
        assert_eq!(PageRequest::new(2, 10).offset(), 10);
    }

    #[test]
    fn test_sort_by_name_ascending() {
        let mut jobs = vec![job("b", "g", 1), job("c", "g", 2), job("a", "g", 3)];
        sort_jobs(&mut jobs, Sort::new(JobSortField::Name, SortOrder::Asc));
        let names: Vec<_> = jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }
}

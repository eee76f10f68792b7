//! Configuration validation.
//!
//! Reports values that load fine but would make the store or the retention
//! loop misbehave.

use crate::schema::{JobkeeperConfig, StorageKind};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "storage.file.max_backups"
    pub path: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, path: &'static str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path,
            message: message.into(),
        });
    }
}

#[must_use]
pub fn validate(cfg: &JobkeeperConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    match cfg.storage.kind {
        StorageKind::File => {
            let file = &cfg.storage.file;
            if file.path.as_os_str().is_empty() {
                result.push(Severity::Error, "storage.file.path", "file storage path is empty");
            }
            if file.backup_enabled && file.max_backups == 0 {
                result.push(
                    Severity::Warning,
                    "storage.file.max_backups",
                    "backups are enabled but max_backups is 0; every backup is deleted right after it is written",
                );
            }
            if file.backup_enabled && file.backup_path == file.path {
                result.push(
                    Severity::Warning,
                    "storage.file.backup_path",
                    "backup_path equals the storage path; pruning would consider jobs.json and logs.json",
                );
            }
        },
        StorageKind::Database => {
            if cfg.storage.database.url.trim().is_empty() {
                result.push(Severity::Error, "storage.database.url", "database url is empty");
            }
            if cfg.storage.database.max_connections == 0 {
                result.push(
                    Severity::Error,
                    "storage.database.max_connections",
                    "max_connections must be at least 1",
                );
            }
        },
    }

    if cfg.scheduler.reconcile_interval_secs == 0 {
        result.push(
            Severity::Warning,
            "scheduler.reconcile_interval_secs",
            "reconcile interval is 0; changes made by admin commands reach a running daemon only after restart",
        );
    }

    if cfg.logs.retention_days == 0 {
        result.push(
            Severity::Warning,
            "logs.retention_days",
            "retention_days is 0; every purge removes all execution logs",
        );
    }
    if cfg.logs.purge_interval_secs == 0 {
        result.push(
            Severity::Info,
            "logs.purge_interval_secs",
            "purge interval is 0; logs are only purged at startup",
        );
    }

    result
}

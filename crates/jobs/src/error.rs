use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("invalid cron expression '{expr}': {source}")]
    CronParse {
        expr: String,
        #[source]
        source: cron::error::Error,
    },

    #[error("failed to decode job data: {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid job {key}: {reason}")]
    InvalidJob { key: String, reason: String },

    #[error("corrupt {field} value in storage: {value}")]
    Corrupt { field: &'static str, value: i64 },

    #[error("scheduler error: {message}")]
    Scheduler { message: String },

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn cron(expr: impl Into<String>, source: cron::error::Error) -> Self {
        Self::CronParse {
            expr: expr.into(),
            source,
        }
    }

    #[must_use]
    pub fn invalid_job(key: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::InvalidJob {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn scheduler(message: impl Into<String>) -> Self {
        Self::Scheduler {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

impl jobkeeper_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

jobkeeper_common::impl_context!();

use std::time::Duration;
use thiserror::Error;

/// Underlying cause carried by a failed task.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Rejected pool construction or reconfiguration. Raised before anything is spawned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("degree of parallelism must be at least 1, got {0}")]
    InvalidDop(usize),

    #[error("max degree of parallelism {max} is below the initial degree {dop}")]
    InvalidMaxDop { dop: usize, max: usize },

    #[error("queue capacity must be at least 1")]
    ZeroQueueCapacity,

    #[error("{0} timeout must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("quota must be at least 1")]
    ZeroQuota,

    #[error("quota {quota} exceeds the {total} tasks the source will produce")]
    QuotaExceedsTasks { quota: usize, total: usize },

    #[error("cannot resize to {requested}: degree of parallelism must be within 1..={max}")]
    InvalidResize { requested: usize, max: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("pool has been shut down")]
    ShutDown,
}

/// Why a single task did not produce a value.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failure(#[source] BoxError),

    #[error("task panicked: {0}")]
    Panic(String),

    #[error("task timed out after {0:?}")]
    Timeout(Duration),

    #[error("task cancelled")]
    Cancelled,
}

/// Coarse classification of a [`TaskError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TaskFailure,
    Timeout,
    Cancelled,
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::Failure(_) | TaskError::Panic(_) => ErrorKind::TaskFailure,
            TaskError::Timeout(_) => ErrorKind::Timeout,
            TaskError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum XenonError {
    #[error("No such queue: {0}")]
    NoSuchQueue(String),

    #[error("No such job: {0}")]
    NoSuchJob(String),

    #[error("Invalid job description: {0}")]
    InvalidJobDescription(String),

    #[error("Job {job} belongs to a different scheduler than {scheduler}")]
    WrongScheduler { job: String, scheduler: String },

    #[error("Invalid parallel environment: {0}")]
    InvalidParallelEnvironment(String),

    #[error("Unsupported scheduler: {0}")]
    UnsupportedScheduler(String),

    #[error("Command `{command}` failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Failed to parse scheduler output: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, XenonError>;

/// Error attached to a [`JobStatus`](crate::job::JobStatus).
///
/// Unlike [`XenonError`] this never crosses an API boundary as an `Err`; it
/// describes why a job ended up where it is.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum JobError {
    #[error("Job cancelled by user")]
    Cancelled,

    #[error("Job timed out")]
    TimedOut,

    #[error("Job was cancelled before it started")]
    DeletedBeforeStart,

    #[error("Failed to launch job: {0}")]
    Launch(String),

    #[error("Scheduler reported: {0}")]
    SchedulerReported(String),

    #[error("{0}")]
    Failed(String),
}

impl From<&XenonError> for JobError {
    fn from(err: &XenonError) -> Self {
        JobError::Failed(err.to_string())
    }
}

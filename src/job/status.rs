use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;
use crate::job::JobDescription;

/// Lifecycle of a job supervised by an execution unit.
///
/// Transitions only move forward: `Initial -> Running -> {Done | Error | Killed}`,
/// or `Initial -> Killed` when cancelled before launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Initial,
    Running,
    Done,
    Error,
    Killed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Error | JobState::Killed)
    }

    /// Position in the lifecycle; terminal states share the last rank.
    pub fn rank(&self) -> u8 {
        match self {
            JobState::Initial => 0,
            JobState::Running => 1,
            JobState::Done | JobState::Error | JobState::Killed => 2,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Initial => write!(f, "INITIAL"),
            JobState::Running => write!(f, "RUNNING"),
            JobState::Done => write!(f, "DONE"),
            JobState::Error => write!(f, "ERROR"),
            JobState::Killed => write!(f, "KILLED"),
        }
    }
}

/// Handle to a submitted job.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub identifier: String,
    /// Instance id of the scheduler that owns this job.
    pub scheduler_id: Uuid,
    pub queue_name: Option<String>,
    /// `None` for jobs discovered in a remote listing rather than submitted here.
    pub description: Option<Arc<JobDescription>>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        identifier: impl Into<String>,
        scheduler_id: Uuid,
        queue_name: Option<String>,
        description: Option<Arc<JobDescription>>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            scheduler_id,
            queue_name,
            description,
            submitted_at: Some(Utc::now()),
        }
    }

    /// A job known only by its identifier.
    pub fn discovered(
        identifier: impl Into<String>,
        scheduler_id: Uuid,
        queue_name: Option<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            scheduler_id,
            queue_name,
            description: None,
            submitted_at: None,
        }
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier && self.scheduler_id == other.scheduler_id
    }
}

impl Eq for Job {}

/// Snapshot of a job at the moment it was queried.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub job: Job,
    pub state: String,
    /// Only set once the job finished normally.
    pub exit_code: Option<i32>,
    pub error: Option<JobError>,
    pub running: bool,
    pub done: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Scheduler-specific diagnostics.
    pub info: BTreeMap<String, String>,
}

impl JobStatus {
    pub fn new(job: Job, state: impl Into<String>, running: bool, done: bool) -> Self {
        Self {
            job,
            state: state.into(),
            exit_code: None,
            error: None,
            running,
            done,
            started_at: None,
            finished_at: None,
            info: BTreeMap::new(),
        }
    }

    /// Status standing in for a query that failed.
    pub fn failed(job: Job, error: JobError) -> Self {
        Self::new(job, "UNKNOWN", false, false).with_error(error)
    }

    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_error(mut self, error: JobError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_info(mut self, info: BTreeMap<String, String>) -> Self {
        self.info = info;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}

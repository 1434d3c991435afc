pub mod local;
pub mod queue;

pub use local::QueueScheduler;
pub use queue::QueueManager;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{JobError, Result};
use crate::job::{Job, JobDescription, JobStatus};

/// Uniform job interface implemented by every backend.
///
/// Anything that can be expressed as a status is returned as one. Errors are
/// reserved for usage problems: unknown queues or jobs, bad descriptions and
/// scheduler commands that fail for reasons unrelated to a specific job.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Backend name, e.g. `local` or `gridengine`.
    fn adaptor_name(&self) -> &str;

    fn scheduler_id(&self) -> Uuid;

    fn queue_names(&self) -> Vec<String>;

    fn default_queue_name(&self) -> Option<String>;

    /// Submit a job. Returns as soon as the job is accepted.
    async fn submit_job(&self, description: JobDescription) -> Result<Job>;

    /// Jobs in the named queues, or in every queue when `queue_names` is empty.
    async fn get_jobs(&self, queue_names: &[String]) -> Result<Vec<Job>>;

    async fn get_job_status(&self, job: &Job) -> Result<JobStatus>;

    /// Status of several jobs. Failures are embedded per job, never returned.
    async fn get_job_statuses(&self, jobs: &[Job]) -> Vec<JobStatus> {
        let mut statuses = Vec::with_capacity(jobs.len());
        for job in jobs {
            statuses.push(match self.get_job_status(job).await {
                Ok(status) => status,
                Err(e) => JobStatus::failed(job.clone(), JobError::from(&e)),
            });
        }
        statuses
    }

    async fn cancel_job(&self, job: &Job) -> Result<JobStatus>;

    /// Block until the job runs or finished, or `timeout_ms` elapses
    /// (`0` waits forever, negative returns at once).
    async fn wait_until_running(&self, job: &Job, timeout_ms: i64) -> Result<JobStatus>;

    /// Block until the job finished, or `timeout_ms` elapses. A timeout never
    /// cancels the job.
    async fn wait_until_done(&self, job: &Job, timeout_ms: i64) -> Result<JobStatus>;
}

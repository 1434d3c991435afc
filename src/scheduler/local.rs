use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::QueueSchedulerConfig;
use crate::deadline::Deadline;
use crate::engine::{LocalLauncher, RemoteLauncher, Streams};
use crate::error::{Result, XenonError};
use crate::job::{Job, JobDescription, JobStatus};
use crate::remote::CommandRunner;
use crate::scheduler::{QueueManager, Scheduler};

/// Scheduler whose queues live in this process. Jobs run either as local
/// child processes or as commands dispatched through a [`CommandRunner`].
pub struct QueueScheduler {
    id: Uuid,
    adaptor: &'static str,
    location: String,
    manager: QueueManager,
    /// Present for the local backend only; used to start interactive jobs.
    local: Option<LocalLauncher>,
}

impl QueueScheduler {
    /// Jobs run as children of this process.
    pub fn local(config: QueueSchedulerConfig) -> Result<Self> {
        let id = Uuid::new_v4();
        let launcher = LocalLauncher::new();
        let manager = QueueManager::new(id, Arc::new(launcher.clone()), &config)?;
        tracing::info!(scheduler_id = %id, queues = ?manager.queue_names(), "Local scheduler created");
        Ok(Self {
            id,
            adaptor: "local",
            location: "localhost".to_string(),
            manager,
            local: Some(launcher),
        })
    }

    /// Jobs run on the host behind `runner`.
    pub fn remote(runner: Arc<dyn CommandRunner>, config: QueueSchedulerConfig) -> Result<Self> {
        let id = Uuid::new_v4();
        let location = runner.location();
        let manager = QueueManager::new(id, Arc::new(RemoteLauncher::new(runner)), &config)?;
        tracing::info!(scheduler_id = %id, location = %location, "Remote scheduler created");
        Ok(Self {
            id,
            adaptor: "ssh",
            location,
            manager,
            local: None,
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Number of jobs the queue currently retains, finished ones included.
    pub async fn retained_jobs(&self, queue_name: &str) -> Result<usize> {
        self.manager.retained(queue_name).await
    }

    /// Kill every unfinished job. Returns how many were signalled.
    pub async fn cancel_all(&self) -> usize {
        self.manager.cancel_all().await
    }

    /// Start a job right away with piped stdio.
    ///
    /// Unlike [`submit_job`](Scheduler::submit_job), a launch failure is
    /// returned to the caller since there are no streams to hand out.
    pub async fn submit_interactive_job(&self, description: JobDescription) -> Result<(Job, Streams)> {
        let launcher = self.local.as_ref().ok_or_else(|| {
            XenonError::InvalidJobDescription(format!(
                "{} scheduler does not support interactive jobs",
                self.adaptor
            ))
        })?;
        description.validate()?;
        self.check_working_directory(&description)?;
        let queue = self
            .manager
            .unbounded_queue()
            .ok_or_else(|| XenonError::NoSuchQueue("<unbounded>".to_string()))?
            .to_string();
        if let Some(requested) = &description.queue_name {
            if requested != &queue {
                return Err(XenonError::InvalidJobDescription(format!(
                    "interactive jobs run in queue {queue}, not {requested}"
                )));
            }
        }

        let identifier = self.manager.next_identifier();
        let (task, streams) = launcher.launch_interactive(&description, &identifier)?;
        let job = self
            .manager
            .adopt(identifier, &queue, description, Box::new(task))
            .await?;
        Ok((job, streams))
    }

    fn check_working_directory(&self, description: &JobDescription) -> Result<()> {
        if self.local.is_none() {
            return Ok(());
        }
        if let Some(dir) = &description.working_directory {
            if !Path::new(dir).is_dir() {
                return Err(XenonError::InvalidJobDescription(format!(
                    "working directory does not exist: {dir}"
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Scheduler for QueueScheduler {
    fn adaptor_name(&self) -> &str {
        self.adaptor
    }

    fn scheduler_id(&self) -> Uuid {
        self.id
    }

    fn queue_names(&self) -> Vec<String> {
        self.manager.queue_names().to_vec()
    }

    fn default_queue_name(&self) -> Option<String> {
        Some(self.manager.default_queue().to_string())
    }

    async fn submit_job(&self, description: JobDescription) -> Result<Job> {
        description.validate()?;
        if description.interactive {
            return Err(XenonError::InvalidJobDescription(
                "use submit_interactive_job for interactive jobs".to_string(),
            ));
        }
        if description.job_script().is_some() {
            return Err(XenonError::InvalidJobDescription(format!(
                "{} scheduler does not run job scripts",
                self.adaptor
            )));
        }
        self.check_working_directory(&description)?;
        self.manager.submit(description).await
    }

    async fn get_jobs(&self, queue_names: &[String]) -> Result<Vec<Job>> {
        self.manager.get_jobs(queue_names).await
    }

    async fn get_job_status(&self, job: &Job) -> Result<JobStatus> {
        self.manager.get_status(job).await
    }

    async fn cancel_job(&self, job: &Job) -> Result<JobStatus> {
        self.manager.cancel(job).await
    }

    async fn wait_until_running(&self, job: &Job, timeout_ms: i64) -> Result<JobStatus> {
        self.manager
            .wait_until_running(job, Deadline::from_timeout_ms(timeout_ms))
            .await
    }

    async fn wait_until_done(&self, job: &Job, timeout_ms: i64) -> Result<JobStatus> {
        self.manager
            .wait_until_done(job, Deadline::from_timeout_ms(timeout_ms))
            .await
    }
}

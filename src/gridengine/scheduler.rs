use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::GridEngineConfig;
use crate::deadline::Deadline;
use crate::error::{JobError, Result, XenonError};
use crate::gridengine::reconcile::ReconciliationCache;
use crate::gridengine::setup::GridEngineSetup;
use crate::gridengine::xml::{parse_job_infos, JobInfo};
use crate::gridengine::{script, status};
use crate::job::{Job, JobDescription, JobStatus};
use crate::remote::CommandRunner;
use crate::scheduler::Scheduler;
use crate::scripting::{match_outcome, parse_job_id_after, run_checked, run_logged};

/// First line of `qstat -help` for the versions this adapter understands.
const SUPPORTED_VERSIONS: &[&str] = &["GE 6.2", "SGE 8", "OGS/GE"];

/// Drives a Grid Engine installation through `qsub`, `qstat`, `qacct` and `qdel`.
pub struct GridEngineScheduler {
    id: Uuid,
    runner: Arc<dyn CommandRunner>,
    config: GridEngineConfig,
    setup: GridEngineSetup,
    cache: ReconciliationCache,
}

impl GridEngineScheduler {
    /// Probe the installation and load its queue configuration.
    pub async fn connect(runner: Arc<dyn CommandRunner>, config: GridEngineConfig) -> Result<Self> {
        if !config.ignore_version {
            check_version(runner.as_ref()).await?;
        }
        let setup = GridEngineSetup::fetch(runner.as_ref()).await?;
        Ok(Self::with_setup(runner, config, setup))
    }

    /// Use an already known setup instead of querying `qconf`.
    pub fn with_setup(
        runner: Arc<dyn CommandRunner>,
        config: GridEngineConfig,
        setup: GridEngineSetup,
    ) -> Self {
        let id = Uuid::new_v4();
        tracing::info!(
            scheduler_id = %id,
            location = %runner.location(),
            queues = ?setup.queue_names(),
            "Grid Engine scheduler created"
        );
        Self {
            id,
            runner,
            config,
            setup,
            cache: ReconciliationCache::new(),
        }
    }

    pub fn setup(&self) -> &GridEngineSetup {
        &self.setup
    }

    fn check_owner(&self, job: &Job) -> Result<()> {
        if job.scheduler_id != self.id {
            return Err(XenonError::WrongScheduler {
                job: job.identifier.clone(),
                scheduler: self.id.to_string(),
            });
        }
        Ok(())
    }

    /// Full `qstat -xml` listing. Every listed job counts as seen.
    async fn listing(&self) -> Result<BTreeMap<String, JobInfo>> {
        let output = run_checked(self.runner.as_ref(), None, "qstat", &["-xml".to_string()]).await?;
        let jobs = parse_job_infos(&output)?;
        self.cache.mark_seen(jobs.keys().map(String::as_str));
        self.cache.purge(self.config.accounting_grace_time);
        Ok(jobs)
    }

    /// Final record from `qacct`, if it has been written yet.
    async fn accounting(&self, job: &Job) -> Result<Option<JobStatus>> {
        let output = run_logged(
            self.runner.as_ref(),
            None,
            "qacct",
            &["-j".to_string(), job.identifier.clone()],
        )
        .await?;
        if !output.success() {
            return Ok(None);
        }
        Ok(status::parse_accounting(&output.stdout)?
            .map(|record| status::from_accounting(job.clone(), record)))
    }

    /// Run `qdel`. Returns true if the job was removed before it started.
    async fn delete(&self, identifier: &str) -> Result<bool> {
        let output = run_logged(
            self.runner.as_ref(),
            None,
            "qdel",
            &[identifier.to_string()],
        )
        .await?;
        let text = format!("{}{}", output.stdout, output.stderr);
        if text.contains("does not exist") {
            return Err(XenonError::NoSuchJob(identifier.to_string()));
        }
        let outcomes = [
            format!("has registered the job {identifier} for deletion"),
            format!("has deleted job {identifier}"),
        ];
        let options: Vec<&str> = outcomes.iter().map(String::as_str).collect();
        let outcome = match_outcome(&text, &options).map_err(|_| XenonError::CommandFailed {
            command: format!("qdel {identifier}"),
            exit_code: output.exit_code,
            stderr: text.trim().to_string(),
        })?;

        let pending = outcome == 1;
        if pending {
            self.cache.mark_deleted(identifier);
        } else {
            self.cache.mark_seen([identifier]);
        }
        tracing::info!(job_id = %identifier, pending, "Grid Engine job deleted");
        Ok(pending)
    }

    /// Reconcile the live listing entry (if any) with accounting and the cache.
    async fn resolve(&self, job: &Job, info: Option<&JobInfo>) -> Result<JobStatus> {
        let mut scheduler_error = None;
        if let Some(info) = info {
            match status::listing_error(info) {
                None => return Ok(status::from_listing(job.clone(), info)),
                Some(message) => {
                    tracing::warn!(job_id = %job.identifier, %message, "Cancelling job in error state");
                    if let Err(e) = self.delete(&job.identifier).await {
                        tracing::warn!(job_id = %job.identifier, error = %e, "Failed to cancel job in error state");
                    }
                    scheduler_error = Some(message);
                }
            }
        }

        if let Some(status) = self.accounting(job).await? {
            return Ok(match scheduler_error {
                Some(message) => status.with_error(JobError::SchedulerReported(message)),
                None => status,
            });
        }

        if let Some(message) = scheduler_error {
            self.cache.take_deleted(&job.identifier);
            return Ok(JobStatus::new(job.clone(), "error", false, true)
                .with_error(JobError::SchedulerReported(message)));
        }

        if self.cache.take_deleted(&job.identifier) {
            return Ok(JobStatus::new(job.clone(), "killed", false, true)
                .with_error(JobError::DeletedBeforeStart));
        }

        if self
            .cache
            .seen_within(&job.identifier, self.config.accounting_grace_time)
        {
            tracing::debug!(job_id = %job.identifier, "Job between qstat and qacct");
            return Ok(JobStatus::new(job.clone(), "unknown", false, false));
        }

        Err(XenonError::NoSuchJob(job.identifier.clone()))
    }

    async fn wait_until(
        &self,
        job: &Job,
        deadline: Deadline,
        reached: fn(&JobStatus) -> bool,
    ) -> Result<JobStatus> {
        loop {
            let status = self.get_job_status(job).await?;
            if reached(&status) || deadline.has_passed() {
                return Ok(status);
            }
            tokio::time::sleep(deadline.clamp(self.config.polling_delay)).await;
        }
    }
}

async fn check_version(runner: &dyn CommandRunner) -> Result<()> {
    let output = run_logged(runner, None, "qstat", &["-help".to_string()]).await?;
    let first = output.stdout.lines().next().unwrap_or("").trim().to_string();
    if SUPPORTED_VERSIONS.iter().any(|v| first.starts_with(v)) {
        tracing::debug!(version = %first, "Grid Engine version accepted");
        Ok(())
    } else {
        Err(XenonError::UnsupportedScheduler(format!(
            "cannot use Grid Engine version {first:?}"
        )))
    }
}

#[async_trait]
impl Scheduler for GridEngineScheduler {
    fn adaptor_name(&self) -> &str {
        "gridengine"
    }

    fn scheduler_id(&self) -> Uuid {
        self.id
    }

    fn queue_names(&self) -> Vec<String> {
        self.setup.queue_names()
    }

    fn default_queue_name(&self) -> Option<String> {
        None
    }

    async fn submit_job(&self, description: JobDescription) -> Result<Job> {
        description.validate()?;
        if description.interactive {
            return Err(XenonError::InvalidJobDescription(
                "gridengine scheduler does not support interactive jobs".to_string(),
            ));
        }
        if let Some(queue) = &description.queue_name {
            if self.setup.queue(queue).is_none() {
                return Err(XenonError::NoSuchQueue(queue.clone()));
            }
        }

        let output = match description.job_script() {
            Some(custom) => {
                let path = script::resolve_script_path(&description, custom);
                run_checked(self.runner.as_ref(), None, "qsub", &[path]).await?
            }
            None => {
                let parallel = match description.parallel_environment() {
                    Some(pe) => {
                        let slots = match description.parallel_slots() {
                            Some(slots) => slots,
                            None => self.setup.calculate_slots(
                                pe,
                                description.queue_name.as_deref(),
                                description.node_count,
                                description.processes_per_node,
                            )?,
                        };
                        Some((pe, slots))
                    }
                    None if description.total_processes() > 1 => {
                        return Err(XenonError::InvalidParallelEnvironment(
                            "multi-process jobs need a parallel environment".to_string(),
                        ));
                    }
                    None => None,
                };
                let text = script::generate(&description, parallel)?;
                run_checked(self.runner.as_ref(), Some(&text), "qsub", &[]).await?
            }
        };

        let identifier = parse_job_id_after(&output, "Your job")?;
        self.cache.mark_seen([identifier.as_str()]);
        tracing::info!(job_id = %identifier, queue = ?description.queue_name, "Job submitted to Grid Engine");

        let queue_name = description.queue_name.clone();
        Ok(Job::new(
            identifier,
            self.id,
            queue_name,
            Some(Arc::new(description)),
        ))
    }

    async fn get_jobs(&self, queue_names: &[String]) -> Result<Vec<Job>> {
        for name in queue_names {
            if self.setup.queue(name).is_none() {
                return Err(XenonError::NoSuchQueue(name.clone()));
            }
        }
        let listing = self.listing().await?;
        let jobs = listing
            .into_iter()
            .filter_map(|(id, info)| {
                let queue = info
                    .get("queue_name")
                    .and_then(|q| q.split('@').next())
                    .filter(|q| !q.is_empty())
                    .map(str::to_string);
                let wanted = queue_names.is_empty()
                    || queue.as_ref().is_some_and(|q| queue_names.contains(q));
                wanted.then(|| Job::discovered(id, self.id, queue))
            })
            .collect();
        Ok(jobs)
    }

    async fn get_job_status(&self, job: &Job) -> Result<JobStatus> {
        self.check_owner(job)?;
        let listing = self.listing().await?;
        self.resolve(job, listing.get(&job.identifier)).await
    }

    /// One `qstat` for the whole batch.
    async fn get_job_statuses(&self, jobs: &[Job]) -> Vec<JobStatus> {
        let listing = match self.listing().await {
            Ok(listing) => listing,
            Err(e) => {
                let error = JobError::from(&e);
                return jobs
                    .iter()
                    .map(|job| JobStatus::failed(job.clone(), error.clone()))
                    .collect();
            }
        };
        let mut statuses = Vec::with_capacity(jobs.len());
        for job in jobs {
            let result = match self.check_owner(job) {
                Ok(()) => self.resolve(job, listing.get(&job.identifier)).await,
                Err(e) => Err(e),
            };
            statuses.push(match result {
                Ok(status) => status,
                Err(e) => JobStatus::failed(job.clone(), JobError::from(&e)),
            });
        }
        statuses
    }

    async fn cancel_job(&self, job: &Job) -> Result<JobStatus> {
        self.check_owner(job)?;
        self.delete(&job.identifier).await?;
        self.get_job_status(job).await
    }

    async fn wait_until_running(&self, job: &Job, timeout_ms: i64) -> Result<JobStatus> {
        self.wait_until(job, Deadline::from_timeout_ms(timeout_ms), |s| {
            s.is_running() || s.is_done()
        })
        .await
    }

    async fn wait_until_done(&self, job: &Job, timeout_ms: i64) -> Result<JobStatus> {
        self.wait_until(job, Deadline::from_timeout_ms(timeout_ms), |s| s.is_done())
            .await
    }
}

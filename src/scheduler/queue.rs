use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Semaphore};
use uuid::Uuid;

use crate::config::{Concurrency, QueueSchedulerConfig};
use crate::deadline::Deadline;
use crate::engine::{ExecutionUnit, Launcher, RunningTask};
use crate::error::{Result, XenonError};
use crate::job::{Job, JobDescription, JobStatus};

/// One named queue: its retained units, oldest first, and the slot pool that
/// bounds how many of them may have a live process.
#[derive(Debug)]
struct Queue {
    name: String,
    gate: Option<Arc<Semaphore>>,
    /// Feeds the queue's dispatcher; started on first submission.
    pending: Option<mpsc::UnboundedSender<Arc<ExecutionUnit>>>,
    units: VecDeque<Arc<ExecutionUnit>>,
}

/// Admits the units of a bounded queue one by one, in submission order. A
/// unit only reaches the slot pool once every earlier unit holds a slot or
/// was killed.
async fn dispatch(
    mut pending: mpsc::UnboundedReceiver<Arc<ExecutionUnit>>,
    gate: Arc<Semaphore>,
    launcher: Arc<dyn Launcher>,
) {
    while let Some(unit) = pending.recv().await {
        if let Some(permit) = unit.admit(gate.clone()).await {
            tokio::spawn(unit.run(launcher.clone(), Some(permit)));
        }
    }
}

impl Queue {
    fn find(&self, identifier: &str) -> Option<Arc<ExecutionUnit>> {
        self.units
            .iter()
            .find(|u| u.job().identifier == identifier)
            .cloned()
    }

    /// Forget finished units beyond `limit`, oldest first. Units that are not
    /// done are never removed, so the queue may stay above the limit.
    fn purge(&mut self, limit: Option<usize>) -> usize {
        let Some(limit) = limit else {
            return 0;
        };
        let mut excess = self.units.len().saturating_sub(limit);
        if excess == 0 {
            return 0;
        }
        let before = self.units.len();
        self.units.retain(|unit| {
            if excess > 0 && unit.is_done() {
                excess -= 1;
                false
            } else {
                true
            }
        });
        before - self.units.len()
    }
}

/// Routes jobs to named queues, enforces per-queue concurrency and bounds the
/// retained history.
pub struct QueueManager {
    scheduler_id: Uuid,
    launcher: Arc<dyn Launcher>,
    polling_delay: Duration,
    max_history: Option<usize>,
    default_queue: String,
    names: Vec<String>,
    unbounded: Option<String>,
    next_id: AtomicU64,
    queues: Mutex<Vec<Queue>>,
}

impl QueueManager {
    pub fn new(
        scheduler_id: Uuid,
        launcher: Arc<dyn Launcher>,
        config: &QueueSchedulerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let queues: Vec<Queue> = config
            .queues
            .iter()
            .map(|spec| Queue {
                name: spec.name.clone(),
                gate: match spec.concurrency {
                    Concurrency::Bounded(n) => Some(Arc::new(Semaphore::new(n))),
                    Concurrency::Unbounded => None,
                },
                pending: None,
                units: VecDeque::new(),
            })
            .collect();

        Ok(Self {
            scheduler_id,
            launcher,
            polling_delay: config.polling_delay,
            max_history: config.max_history,
            default_queue: config.default_queue.clone(),
            names: queues.iter().map(|q| q.name.clone()).collect(),
            unbounded: queues
                .iter()
                .find(|q| q.gate.is_none())
                .map(|q| q.name.clone()),
            next_id: AtomicU64::new(0),
            queues: Mutex::new(queues),
        })
    }

    pub fn queue_names(&self) -> &[String] {
        &self.names
    }

    pub fn default_queue(&self) -> &str {
        &self.default_queue
    }

    /// First queue without a concurrency bound.
    pub fn unbounded_queue(&self) -> Option<&str> {
        self.unbounded.as_deref()
    }

    /// Allocate the next job identifier for this manager.
    pub fn next_identifier(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.launcher.name(), n)
    }

    /// Queue a job for execution and return immediately.
    pub async fn submit(&self, description: JobDescription) -> Result<Job> {
        let queue_name = description
            .queue_name
            .clone()
            .unwrap_or_else(|| self.default_queue.clone());

        let mut queues = self.queues.lock().await;
        let queue = queues
            .iter_mut()
            .find(|q| q.name == queue_name)
            .ok_or_else(|| XenonError::NoSuchQueue(queue_name.clone()))?;

        let description = Arc::new(description);
        let job = Job::new(
            self.next_identifier(),
            self.scheduler_id,
            Some(queue_name.clone()),
            Some(description.clone()),
        );
        let unit = ExecutionUnit::new(job.clone(), description, self.polling_delay);
        match &queue.gate {
            Some(gate) => {
                let pending = queue.pending.get_or_insert_with(|| {
                    let (tx, rx) = mpsc::unbounded_channel();
                    tokio::spawn(dispatch(rx, gate.clone(), self.launcher.clone()));
                    tx
                });
                pending.send(unit.clone()).map_err(|_| {
                    XenonError::Internal(format!("dispatcher of queue {queue_name} is gone"))
                })?;
            }
            None => {
                tokio::spawn(unit.clone().run(self.launcher.clone(), None));
            }
        }
        queue.units.push_back(unit);

        let purged = queue.purge(self.max_history);
        tracing::info!(job_id = %job.identifier, queue = %queue_name, purged, "Job submitted");
        Ok(job)
    }

    /// Register a job whose task is already running. It bypasses the queue's
    /// slot pool, so callers should only use unbounded queues.
    pub async fn adopt(
        &self,
        identifier: String,
        queue_name: &str,
        description: JobDescription,
        task: Box<dyn RunningTask>,
    ) -> Result<Job> {
        let mut queues = self.queues.lock().await;
        let queue = queues
            .iter_mut()
            .find(|q| q.name == queue_name)
            .ok_or_else(|| XenonError::NoSuchQueue(queue_name.to_string()))?;

        let description = Arc::new(description);
        let job = Job::new(
            identifier,
            self.scheduler_id,
            Some(queue_name.to_string()),
            Some(description.clone()),
        );
        let unit = ExecutionUnit::new(job.clone(), description, self.polling_delay);
        queue.units.push_back(unit.clone());
        tokio::spawn(unit.run_started(task));

        let purged = queue.purge(self.max_history);
        tracing::info!(job_id = %job.identifier, queue = %queue_name, purged, "Interactive job started");
        Ok(job)
    }

    /// Retained jobs of the given queues, or of all queues when none are named.
    pub async fn get_jobs(&self, queue_names: &[String]) -> Result<Vec<Job>> {
        let queues = self.queues.lock().await;
        if queue_names.is_empty() {
            return Ok(queues
                .iter()
                .flat_map(|q| q.units.iter().map(|u| u.job().clone()))
                .collect());
        }
        let mut jobs = Vec::new();
        for name in queue_names {
            let queue = queues
                .iter()
                .find(|q| &q.name == name)
                .ok_or_else(|| XenonError::NoSuchQueue(name.clone()))?;
            jobs.extend(queue.units.iter().map(|u| u.job().clone()));
        }
        Ok(jobs)
    }

    /// Number of retained units in a queue.
    pub async fn retained(&self, queue_name: &str) -> Result<usize> {
        let queues = self.queues.lock().await;
        queues
            .iter()
            .find(|q| q.name == queue_name)
            .map(|q| q.units.len())
            .ok_or_else(|| XenonError::NoSuchQueue(queue_name.to_string()))
    }

    async fn unit(&self, job: &Job) -> Result<Arc<ExecutionUnit>> {
        if job.scheduler_id != self.scheduler_id {
            return Err(XenonError::WrongScheduler {
                job: job.identifier.clone(),
                scheduler: self.scheduler_id.to_string(),
            });
        }
        let queue_name = job
            .queue_name
            .as_deref()
            .ok_or_else(|| XenonError::NoSuchJob(job.identifier.clone()))?;
        // The queue lock is released before the caller touches the unit.
        let queues = self.queues.lock().await;
        let queue = queues
            .iter()
            .find(|q| q.name == queue_name)
            .ok_or_else(|| XenonError::NoSuchQueue(queue_name.to_string()))?;
        let unit = queue
            .find(&job.identifier)
            .ok_or_else(|| XenonError::NoSuchJob(job.identifier.clone()))?;
        Ok(unit)
    }

    pub async fn get_status(&self, job: &Job) -> Result<JobStatus> {
        Ok(self.unit(job).await?.status().await)
    }

    pub async fn cancel(&self, job: &Job) -> Result<JobStatus> {
        let unit = self.unit(job).await?;
        let settled = unit.kill();
        tracing::info!(job_id = %job.identifier, settled, "Job cancellation requested");
        Ok(unit.status().await)
    }

    pub async fn wait_until_running(&self, job: &Job, deadline: Deadline) -> Result<JobStatus> {
        Ok(self.unit(job).await?.wait_until_running(deadline).await)
    }

    pub async fn wait_until_done(&self, job: &Job, deadline: Deadline) -> Result<JobStatus> {
        Ok(self.unit(job).await?.wait_until_done(deadline).await)
    }

    /// Kill every retained job that has not finished yet.
    pub async fn cancel_all(&self) -> usize {
        let queues = self.queues.lock().await;
        let mut count = 0;
        for unit in queues.iter().flat_map(|q| q.units.iter()) {
            if !unit.is_done() {
                unit.kill();
                count += 1;
            }
        }
        count
    }
}

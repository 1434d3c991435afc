use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::deadline::Deadline;
use crate::engine::launcher::{Launcher, RunningTask};
use crate::error::JobError;
use crate::job::{Job, JobDescription, JobState, JobStatus};

/// Mutable runtime state of one unit. Every transition goes through the
/// unit's watch channel, which serialises writers and wakes waiters.
#[derive(Debug, Clone)]
struct UnitState {
    state: JobState,
    /// Set by the run loop right before it creates the process. From then on
    /// only the run loop may move the unit out of `Initial`.
    launching: bool,
    exit_code: Option<i32>,
    error: Option<JobError>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl UnitState {
    fn new() -> Self {
        Self {
            state: JobState::Initial,
            launching: false,
            exit_code: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Supervises a single job: launches it, polls it, kills it.
///
/// The run loop ([`run`](Self::run)) is the only place a process is created or
/// destroyed. Callers interact through [`kill`](Self::kill), [`status`](Self::status)
/// and the `wait_until_*` methods, which never block the run loop.
pub struct ExecutionUnit {
    job: Job,
    description: Arc<JobDescription>,
    polling_delay: Duration,
    state: watch::Sender<UnitState>,
    /// Bumped after every poll of the process; acknowledges refresh requests.
    polls: watch::Sender<u64>,
    refresh: Notify,
    kill: CancellationToken,
}

impl ExecutionUnit {
    pub fn new(job: Job, description: Arc<JobDescription>, polling_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            job,
            description,
            polling_delay,
            state: watch::Sender::new(UnitState::new()),
            polls: watch::Sender::new(0),
            refresh: Notify::new(),
            kill: CancellationToken::new(),
        })
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn state(&self) -> JobState {
        self.state.borrow().state
    }

    pub fn is_done(&self) -> bool {
        self.state().is_terminal()
    }

    /// Wait for a slot in `gate`. Returns `None` when the unit was killed (or
    /// the queue closed) first, in which case the unit is already terminal.
    pub async fn admit(&self, gate: Arc<Semaphore>) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = self.kill.cancelled() => {
                self.kill_before_start();
                None
            }
            permit = gate.acquire_owned() => match permit {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.finish(JobState::Error, None, Some(JobError::Failed("queue closed".to_string())));
                    None
                }
            },
        }
    }

    /// Run loop. Launches and supervises the job until it reaches a terminal
    /// state. `permit` is the queue slot from [`admit`](Self::admit), held
    /// until the loop exits.
    pub async fn run(
        self: Arc<Self>,
        launcher: Arc<dyn Launcher>,
        permit: Option<OwnedSemaphorePermit>,
    ) {
        let job_id = self.job.identifier.clone();
        let _permit = permit;

        let kill = &self.kill;
        let claimed = self.state.send_if_modified(|s| {
            if s.state == JobState::Initial && !kill.is_cancelled() {
                s.launching = true;
                true
            } else {
                false
            }
        });
        if !claimed {
            self.kill_before_start();
            return;
        }

        let task = match launcher.launch(&self.description, &job_id).await {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Job failed to launch");
                self.finish(JobState::Error, None, Some(JobError::Launch(e.to_string())));
                return;
            }
        };

        self.state.send_modify(|s| {
            s.state = JobState::Running;
            s.started_at = Some(Utc::now());
        });
        tracing::info!(job_id = %job_id, queue = ?self.job.queue_name, "Job running");

        self.supervise(task).await;
    }

    /// Supervise a task that was started outside the run loop (interactive jobs).
    pub async fn run_started(self: Arc<Self>, task: Box<dyn RunningTask>) {
        self.state.send_modify(|s| {
            s.launching = true;
            s.state = JobState::Running;
            s.started_at = Some(Utc::now());
        });
        self.supervise(task).await;
    }

    async fn supervise(&self, mut task: Box<dyn RunningTask>) {
        let job_id = &self.job.identifier;
        let deadline = match self.description.max_runtime {
            Some(limit) => Deadline::after(limit),
            None => Deadline::never(),
        };

        loop {
            match task.try_exit_code() {
                Ok(Some(code)) => {
                    tracing::info!(job_id = %job_id, exit_code = code, "Job done");
                    self.finish(JobState::Done, Some(code), None);
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Lost track of job");
                    task.destroy().await;
                    self.finish(JobState::Error, None, Some(JobError::Failed(e.to_string())));
                    break;
                }
            }

            if self.kill.is_cancelled() {
                task.destroy().await;
                tracing::info!(job_id = %job_id, "Job killed");
                self.finish(JobState::Killed, None, Some(JobError::Cancelled));
                break;
            }

            if deadline.has_passed() {
                task.destroy().await;
                tracing::warn!(job_id = %job_id, max_runtime = ?self.description.max_runtime, "Job timed out");
                self.finish(JobState::Killed, None, Some(JobError::TimedOut));
                break;
            }

            self.polls.send_modify(|n| *n += 1);

            tokio::select! {
                _ = tokio::time::sleep(deadline.clamp(self.polling_delay)) => {}
                _ = self.refresh.notified() => {}
                _ = self.kill.cancelled() => {}
            }
        }

        // Release anyone still waiting on a refresh.
        self.polls.send_modify(|n| *n += 1);
    }

    fn kill_before_start(&self) {
        self.state.send_if_modified(|s| {
            if s.state == JobState::Initial {
                s.state = JobState::Killed;
                s.error = Some(JobError::Cancelled);
                s.finished_at = Some(Utc::now());
                true
            } else {
                false
            }
        });
    }

    /// Move to a terminal state. Ignored once terminal.
    fn finish(&self, state: JobState, exit_code: Option<i32>, error: Option<JobError>) {
        self.state.send_if_modified(|s| {
            if s.state.is_terminal() {
                return false;
            }
            s.state = state;
            s.exit_code = exit_code;
            s.error = error;
            s.finished_at = Some(Utc::now());
            true
        });
    }

    /// Request cancellation.
    ///
    /// Returns `true` when the unit is terminal on return: it had not been
    /// launched yet and is now `KILLED`, or it was already finished. Returns
    /// `false` if the process is being torn down by the run loop; poll or wait
    /// for the final state.
    pub fn kill(&self) -> bool {
        self.kill.cancel();
        let mut terminal = false;
        self.state.send_if_modified(|s| {
            if s.state.is_terminal() {
                terminal = true;
                return false;
            }
            if s.state == JobState::Initial && !s.launching {
                s.state = JobState::Killed;
                s.error = Some(JobError::Cancelled);
                s.finished_at = Some(Utc::now());
                terminal = true;
                return true;
            }
            false
        });
        if terminal {
            tracing::debug!(job_id = %self.job.identifier, "Kill resolved immediately");
        }
        terminal
    }

    /// Fresh status. A running unit is asked to poll its process first, and the
    /// caller waits up to one polling delay for that to happen.
    pub async fn status(&self) -> JobStatus {
        if self.state() == JobState::Running {
            self.refresh().await;
        }
        self.snapshot()
    }

    async fn refresh(&self) {
        let mut polls = self.polls.subscribe();
        let seen = *polls.borrow_and_update();
        self.refresh.notify_one();
        let acked = tokio::time::timeout(self.polling_delay, async {
            polls.wait_for(|n| *n > seen).await.is_ok()
        })
        .await;
        if acked.is_err() {
            tracing::trace!(job_id = %self.job.identifier, "Status refresh not acknowledged in time");
        }
    }

    pub async fn wait_until_running(&self, deadline: Deadline) -> JobStatus {
        self.wait_for(deadline, |s| s.state != JobState::Initial).await
    }

    pub async fn wait_until_done(&self, deadline: Deadline) -> JobStatus {
        self.wait_for(deadline, |s| s.state.is_terminal()).await
    }

    async fn wait_for(&self, deadline: Deadline, reached: fn(&UnitState) -> bool) -> JobStatus {
        let mut rx = self.state.subscribe();
        let wait = async move { rx.wait_for(|s| reached(s)).await.is_ok() };
        match deadline.remaining() {
            None => {
                wait.await;
            }
            Some(left) => {
                let _ = tokio::time::timeout(left, wait).await;
            }
        }
        self.snapshot()
    }

    fn snapshot(&self) -> JobStatus {
        let s = self.state.borrow().clone();
        let mut status = JobStatus::new(
            self.job.clone(),
            s.state.to_string(),
            s.state == JobState::Running,
            s.state.is_terminal(),
        );
        status.exit_code = s.exit_code;
        status.error = s.error;
        status.started_at = s.started_at;
        status.finished_at = s.finished_at;
        status
    }
}

impl std::fmt::Debug for ExecutionUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionUnit")
            .field("job", &self.job.identifier)
            .field("state", &self.state())
            .finish()
    }
}

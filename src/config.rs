use std::time::Duration;

use crate::error::{Result, XenonError};

pub const DEFAULT_POLLING_DELAY: Duration = Duration::from_millis(1000);
pub const MIN_POLLING_DELAY: Duration = Duration::from_millis(10);
pub const MAX_POLLING_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_HISTORY: usize = 1000;
pub const DEFAULT_ACCOUNTING_GRACE_TIME: Duration = Duration::from_secs(60);

/// How many jobs of one queue may have a live process at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    Bounded(usize),
    Unbounded,
}

/// A named admission policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub concurrency: Concurrency,
}

impl QueueSpec {
    pub fn bounded(name: impl Into<String>, limit: usize) -> Self {
        Self {
            name: name.into(),
            concurrency: Concurrency::Bounded(limit),
        }
    }

    pub fn unbounded(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            concurrency: Concurrency::Unbounded,
        }
    }
}

/// Number of jobs the `multi` queue runs side by side when nothing else is configured.
pub fn host_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Configuration for schedulers backed by in-process queues (local and remote-shell).
#[derive(Debug, Clone)]
pub struct QueueSchedulerConfig {
    /// Interval at which each execution unit polls its process.
    pub polling_delay: Duration,
    /// Finished jobs retained per queue. `None` keeps everything.
    pub max_history: Option<usize>,
    pub queues: Vec<QueueSpec>,
    /// Queue used when a description names none.
    pub default_queue: String,
}

impl Default for QueueSchedulerConfig {
    fn default() -> Self {
        Self {
            polling_delay: DEFAULT_POLLING_DELAY,
            max_history: Some(DEFAULT_MAX_HISTORY),
            queues: vec![
                QueueSpec::bounded("single", 1),
                QueueSpec::bounded("multi", host_parallelism()),
                QueueSpec::unbounded("unlimited"),
            ],
            default_queue: "single".to_string(),
        }
    }
}

impl QueueSchedulerConfig {
    pub fn with_polling_delay(mut self, delay: Duration) -> Self {
        self.polling_delay = delay;
        self
    }

    pub fn with_max_history(mut self, max_history: Option<usize>) -> Self {
        self.max_history = max_history;
        self
    }

    /// Change the concurrency of the `multi` queue (or any other bounded queue by that name).
    pub fn with_multi_concurrency(mut self, limit: usize) -> Self {
        for queue in &mut self.queues {
            if queue.name == "multi" {
                queue.concurrency = Concurrency::Bounded(limit);
            }
        }
        self
    }

    pub fn with_queue(mut self, spec: QueueSpec) -> Self {
        self.queues.retain(|q| q.name != spec.name);
        self.queues.push(spec);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.polling_delay < MIN_POLLING_DELAY || self.polling_delay > MAX_POLLING_DELAY {
            return Err(XenonError::InvalidConfig(format!(
                "polling delay {:?} outside {:?}..={:?}",
                self.polling_delay, MIN_POLLING_DELAY, MAX_POLLING_DELAY
            )));
        }
        if self.max_history == Some(0) {
            return Err(XenonError::InvalidConfig(
                "max history must be at least 1".to_string(),
            ));
        }
        if self.queues.is_empty() {
            return Err(XenonError::InvalidConfig("no queues configured".to_string()));
        }
        for queue in &self.queues {
            if queue.concurrency == Concurrency::Bounded(0) {
                return Err(XenonError::InvalidConfig(format!(
                    "queue {} has zero concurrency",
                    queue.name
                )));
            }
        }
        if !self.queues.iter().any(|q| q.name == self.default_queue) {
            return Err(XenonError::NoSuchQueue(self.default_queue.clone()));
        }
        Ok(())
    }
}

/// Configuration for the Grid Engine adapter.
#[derive(Debug, Clone)]
pub struct GridEngineConfig {
    /// Interval between status queries while waiting on a job.
    pub polling_delay: Duration,
    /// How long a job may be missing from both qstat and qacct before it is
    /// reported as nonexistent.
    pub accounting_grace_time: Duration,
    /// Skip the `qstat -help` version probe.
    pub ignore_version: bool,
}

impl Default for GridEngineConfig {
    fn default() -> Self {
        Self {
            polling_delay: DEFAULT_POLLING_DELAY,
            accounting_grace_time: DEFAULT_ACCOUNTING_GRACE_TIME,
            ignore_version: false,
        }
    }
}

impl GridEngineConfig {
    pub fn with_polling_delay(mut self, delay: Duration) -> Self {
        self.polling_delay = delay;
        self
    }

    pub fn with_accounting_grace_time(mut self, grace: Duration) -> Self {
        self.accounting_grace_time = grace;
        self
    }

    pub fn with_ignore_version(mut self, ignore: bool) -> Self {
        self.ignore_version = ignore;
        self
    }
}

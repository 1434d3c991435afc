use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, XenonError};

/// Job option naming a ready-made batch script that replaces the generated one.
pub const JOB_SCRIPT_OPTION: &str = "job.script";
/// Job option selecting a Grid Engine parallel environment.
pub const PARALLEL_ENVIRONMENT_OPTION: &str = "parallel.environment";
/// Job option overriding the computed slot count for the parallel environment.
pub const PARALLEL_SLOTS_OPTION: &str = "parallel.slots";

const KNOWN_OPTIONS: [&str; 3] = [
    JOB_SCRIPT_OPTION,
    PARALLEL_ENVIRONMENT_OPTION,
    PARALLEL_SLOTS_OPTION,
];

/// Placeholder in stdin/stdout/stderr paths replaced by the job identifier.
pub const JOB_ID_PLACEHOLDER: &str = "%j";

/// What to run and where. Never mutated once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescription {
    pub name: Option<String>,
    pub executable: Option<String>,
    pub arguments: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub working_directory: Option<String>,
    pub stdin: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub node_count: u32,
    pub processes_per_node: u32,
    pub max_runtime: Option<Duration>,
    pub max_memory_mb: Option<u64>,
    pub temp_space_mb: Option<u64>,
    pub queue_name: Option<String>,
    pub interactive: bool,
    /// Passed verbatim to the batch scheduler, one directive each.
    pub scheduler_arguments: Vec<String>,
    pub job_options: BTreeMap<String, String>,
}

impl Default for JobDescription {
    fn default() -> Self {
        Self {
            name: None,
            executable: None,
            arguments: Vec::new(),
            environment: BTreeMap::new(),
            working_directory: None,
            stdin: None,
            stdout: None,
            stderr: None,
            node_count: 1,
            processes_per_node: 1,
            max_runtime: None,
            max_memory_mb: None,
            temp_space_mb: None,
            queue_name: None,
            interactive: false,
            scheduler_arguments: Vec::new(),
            job_options: BTreeMap::new(),
        }
    }
}

impl JobDescription {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: Some(executable.into()),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_stdin(mut self, path: impl Into<String>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    pub fn with_stdout(mut self, path: impl Into<String>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    pub fn with_stderr(mut self, path: impl Into<String>) -> Self {
        self.stderr = Some(path.into());
        self
    }

    pub fn with_nodes(mut self, node_count: u32, processes_per_node: u32) -> Self {
        self.node_count = node_count;
        self.processes_per_node = processes_per_node;
        self
    }

    pub fn with_max_runtime(mut self, max_runtime: Duration) -> Self {
        self.max_runtime = Some(max_runtime);
        self
    }

    pub fn with_max_memory_mb(mut self, mb: u64) -> Self {
        self.max_memory_mb = Some(mb);
        self
    }

    pub fn with_temp_space_mb(mut self, mb: u64) -> Self {
        self.temp_space_mb = Some(mb);
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue_name = Some(queue.into());
        self
    }

    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn with_scheduler_argument(mut self, arg: impl Into<String>) -> Self {
        self.scheduler_arguments.push(arg.into());
        self
    }

    pub fn with_job_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.job_options.insert(key.into(), value.into());
        self
    }

    pub fn job_script(&self) -> Option<&str> {
        self.job_options.get(JOB_SCRIPT_OPTION).map(String::as_str)
    }

    pub fn parallel_environment(&self) -> Option<&str> {
        self.job_options
            .get(PARALLEL_ENVIRONMENT_OPTION)
            .map(String::as_str)
    }

    /// Explicit slot count, if one was given. Call [`validate`](Self::validate) first.
    pub fn parallel_slots(&self) -> Option<u32> {
        self.job_options
            .get(PARALLEL_SLOTS_OPTION)
            .and_then(|s| s.trim().parse().ok())
    }

    /// Total number of processes requested.
    pub fn total_processes(&self) -> u32 {
        self.node_count.saturating_mul(self.processes_per_node)
    }

    /// Reject descriptions no backend could run.
    pub fn validate(&self) -> Result<()> {
        let has_script = self.job_script().is_some();
        match &self.executable {
            Some(exe) if !exe.trim().is_empty() => {}
            _ if has_script => {}
            _ => {
                return Err(XenonError::InvalidJobDescription(
                    "executable missing".to_string(),
                ))
            }
        }
        if self.node_count < 1 {
            return Err(XenonError::InvalidJobDescription(format!(
                "illegal node count: {}",
                self.node_count
            )));
        }
        if self.processes_per_node < 1 {
            return Err(XenonError::InvalidJobDescription(format!(
                "illegal processes per node count: {}",
                self.processes_per_node
            )));
        }
        if let Some(runtime) = self.max_runtime {
            if runtime.is_zero() {
                return Err(XenonError::InvalidJobDescription(
                    "illegal maximum runtime: 0".to_string(),
                ));
            }
        }
        for key in self.job_options.keys() {
            if !KNOWN_OPTIONS.contains(&key.as_str()) {
                return Err(XenonError::InvalidJobDescription(format!(
                    "unknown job option: {key}"
                )));
            }
        }
        if let Some(slots) = self.job_options.get(PARALLEL_SLOTS_OPTION) {
            if self.parallel_environment().is_none() {
                return Err(XenonError::InvalidJobDescription(format!(
                    "{PARALLEL_SLOTS_OPTION} requires {PARALLEL_ENVIRONMENT_OPTION}"
                )));
            }
            match slots.trim().parse::<u32>() {
                Ok(n) if n > 0 => {}
                _ => {
                    return Err(XenonError::InvalidJobDescription(format!(
                        "illegal slot count: {slots}"
                    )))
                }
            }
        }
        if self.interactive && (self.stdin.is_some() || self.stdout.is_some() || self.stderr.is_some())
        {
            return Err(XenonError::InvalidJobDescription(
                "interactive jobs cannot redirect stdin, stdout or stderr".to_string(),
            ));
        }
        Ok(())
    }
}

/// Replace the job-id placeholder in a path.
pub fn substitute_job_id(path: &str, job_id: &str) -> String {
    path.replace(JOB_ID_PLACEHOLDER, job_id)
}

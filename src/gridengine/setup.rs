//! Queue and parallel-environment configuration read with `qconf`, and the
//! slot arithmetic that turns a node/process request into a `-pe` slot count.

use std::collections::BTreeMap;

use crate::error::{Result, XenonError};
use crate::remote::CommandRunner;
use crate::scripting::{
    join_continuations, parse_key_value_lines, parse_leading_int, parse_list, run_checked,
    run_logged,
};

/// Queue as reported by `qconf -sq`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    /// Slots per execution host.
    pub slots: u32,
    /// Parallel environments attached to the queue; `None` if not reported.
    pub parallel_environments: Option<Vec<String>>,
}

impl QueueInfo {
    pub fn parse(name: &str, output: &str) -> Result<Self> {
        let map = parse_key_value_lines(&join_continuations(output), &[])?;
        let slots = map
            .get("slots")
            .and_then(|v| parse_leading_int(v))
            .ok_or_else(|| XenonError::Parse(format!("queue {name} has no slot count")))?;
        let parallel_environments = map.get("pe_list").map(|list| {
            list.split(|c: char| c.is_whitespace() || c == ',')
                .filter(|pe| !pe.is_empty() && *pe != "NONE")
                .map(str::to_string)
                .collect()
        });
        Ok(Self {
            name: name.to_string(),
            slots,
            parallel_environments,
        })
    }
}

/// How a parallel environment spreads slots over hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationRule {
    /// `$pe_slots`: all slots of a job on one host.
    PeSlots,
    /// `$fill_up`: fill a host before moving on to the next.
    FillUp,
    /// `$round_robin`: one slot per host in turn; no placement guarantee.
    RoundRobin,
    /// Fixed number of slots on every host.
    SlotsPerHost(u32),
    /// Anything else. Rejected when a job asks for this environment.
    Unknown(String),
}

impl AllocationRule {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "$pe_slots" => AllocationRule::PeSlots,
            "$fill_up" => AllocationRule::FillUp,
            "$round_robin" => AllocationRule::RoundRobin,
            other => match other.parse::<u32>() {
                Ok(n) if n > 0 => AllocationRule::SlotsPerHost(n),
                _ => AllocationRule::Unknown(other.to_string()),
            },
        }
    }
}

/// Parallel environment as reported by `qconf -sp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelEnvironmentInfo {
    pub name: String,
    pub slots: u32,
    pub allocation_rule: AllocationRule,
}

impl ParallelEnvironmentInfo {
    pub fn parse(output: &str) -> Result<Self> {
        let map = parse_key_value_lines(&join_continuations(output), &[])?;
        let name = map
            .get("pe_name")
            .cloned()
            .ok_or_else(|| XenonError::Parse("parallel environment without pe_name".to_string()))?;
        let allocation_rule = map
            .get("allocation_rule")
            .map(|v| AllocationRule::parse(v))
            .ok_or_else(|| XenonError::Parse(format!("{name} has no allocation_rule")))?;
        let slots = map.get("slots").and_then(|v| parse_leading_int(v)).unwrap_or(0);
        Ok(Self {
            name,
            slots,
            allocation_rule,
        })
    }
}

/// Snapshot of the scheduler's queues and parallel environments.
#[derive(Debug, Clone, Default)]
pub struct GridEngineSetup {
    queues: BTreeMap<String, QueueInfo>,
    parallel_environments: BTreeMap<String, ParallelEnvironmentInfo>,
}

impl GridEngineSetup {
    pub fn new(queues: Vec<QueueInfo>, parallel_environments: Vec<ParallelEnvironmentInfo>) -> Self {
        Self {
            queues: queues.into_iter().map(|q| (q.name.clone(), q)).collect(),
            parallel_environments: parallel_environments
                .into_iter()
                .map(|pe| (pe.name.clone(), pe))
                .collect(),
        }
    }

    /// Query queues and parallel environments with `qconf`.
    pub async fn fetch(runner: &dyn CommandRunner) -> Result<Self> {
        let mut queues = Vec::new();
        let listing = run_checked(runner, None, "qconf", &["-sql".to_string()]).await?;
        for name in parse_list(&listing) {
            let output = run_checked(runner, None, "qconf", &["-sq".to_string(), name.clone()]).await?;
            queues.push(QueueInfo::parse(&name, &output)?);
        }

        // qconf -spl fails when no environment is defined at all.
        let mut parallel_environments = Vec::new();
        let listing = run_logged(runner, None, "qconf", &["-spl".to_string()]).await?;
        if listing.success() {
            for name in parse_list(&listing.stdout) {
                let output = run_checked(runner, None, "qconf", &["-sp".to_string(), name]).await?;
                parallel_environments.push(ParallelEnvironmentInfo::parse(&output)?);
            }
        }

        tracing::info!(
            queues = queues.len(),
            parallel_environments = parallel_environments.len(),
            "Grid Engine setup loaded"
        );
        Ok(Self::new(queues, parallel_environments))
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.queues.keys().cloned().collect()
    }

    pub fn queue(&self, name: &str) -> Option<&QueueInfo> {
        self.queues.get(name)
    }

    pub fn parallel_environment(&self, name: &str) -> Option<&ParallelEnvironmentInfo> {
        self.parallel_environments.get(name)
    }

    /// Slots to request from `pe_name` for `node_count` hosts running
    /// `processes_per_node` processes each.
    pub fn calculate_slots(
        &self,
        pe_name: &str,
        queue_name: Option<&str>,
        node_count: u32,
        processes_per_node: u32,
    ) -> Result<u32> {
        let pe = self.parallel_environment(pe_name).ok_or_else(|| {
            XenonError::InvalidParallelEnvironment(format!(
                "parallel environment {pe_name} does not exist"
            ))
        })?;

        let queue = match queue_name {
            Some(name) => {
                let queue = self
                    .queue(name)
                    .ok_or_else(|| XenonError::NoSuchQueue(name.to_string()))?;
                if let Some(attached) = &queue.parallel_environments {
                    if !attached.iter().any(|p| p == pe_name) {
                        return Err(XenonError::InvalidParallelEnvironment(format!(
                            "parallel environment {pe_name} is not available in queue {name}"
                        )));
                    }
                }
                Some(queue)
            }
            None => None,
        };

        match &pe.allocation_rule {
            AllocationRule::PeSlots => {
                if node_count > 1 {
                    return Err(XenonError::InvalidParallelEnvironment(format!(
                        "parallel environment {pe_name} only supports single node jobs"
                    )));
                }
                Ok(processes_per_node)
            }
            AllocationRule::FillUp => {
                let queue = queue.ok_or_else(|| {
                    XenonError::InvalidParallelEnvironment(format!(
                        "parallel environment {pe_name} fills whole nodes and needs a queue to size them"
                    ))
                })?;
                total_slots(pe_name, node_count, queue.slots)
            }
            AllocationRule::RoundRobin => {
                if node_count > 1 {
                    return Err(XenonError::InvalidParallelEnvironment(format!(
                        "parallel environment {pe_name} uses round robin scheduling, cannot guarantee node count"
                    )));
                }
                Ok(processes_per_node)
            }
            AllocationRule::SlotsPerHost(per_host) => total_slots(pe_name, node_count, *per_host),
            AllocationRule::Unknown(rule) => Err(XenonError::InvalidParallelEnvironment(format!(
                "parallel environment {pe_name} has unsupported allocation rule {rule}"
            ))),
        }
    }
}

fn total_slots(pe_name: &str, node_count: u32, per_node: u32) -> Result<u32> {
    node_count.checked_mul(per_node).ok_or_else(|| {
        XenonError::InvalidParallelEnvironment(format!(
            "parallel environment {pe_name} cannot allocate {node_count} nodes of {per_node} slots"
        ))
    })
}

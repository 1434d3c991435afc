//! Grid Engine adapter.
//!
//! Grid Engine has no API this side of its command-line tools, so job state is
//! pieced together from two sources that are never quite in sync:
//!
//! - `qstat -xml` lists queued and running jobs and drops a job as soon as it
//!   leaves the scheduler
//! - `qacct -j` holds the final outcome, written some time after that
//!
//! [`ReconciliationCache`] remembers when each job was last listed so that a
//! job caught between the two is reported as `unknown` instead of missing.

pub mod reconcile;
pub mod scheduler;
pub mod script;
pub mod setup;
pub mod status;
pub mod xml;

pub use reconcile::ReconciliationCache;
pub use scheduler::GridEngineScheduler;
pub use setup::{AllocationRule, GridEngineSetup, ParallelEnvironmentInfo, QueueInfo};

//! Job execution engine.
//!
//! - **Launchers** start the actual work: a local child process
//!   ([`LocalLauncher`]) or a command on another host ([`RemoteLauncher`]).
//! - **Execution units** ([`ExecutionUnit`]) own one job each, run a polling
//!   loop around the launched task and implement kill and max-runtime handling.
//!
//! # Lifecycle
//!
//! 1. A unit is created in `INITIAL` when the job is submitted
//! 2. Its run loop waits for a queue slot, then launches the task (`RUNNING`)
//! 3. The loop polls the task until it exits (`DONE`), fails (`ERROR`),
//!    or is cancelled or times out (`KILLED`)

pub mod launcher;
pub mod unit;

pub use launcher::{Launcher, LocalLauncher, RemoteLauncher, RunningTask, Streams};
pub use unit::ExecutionUnit;

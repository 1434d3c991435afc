pub mod config;
pub mod deadline;
pub mod engine;
pub mod error;
pub mod gridengine;
pub mod job;
pub mod remote;
pub mod scheduler;
pub mod scripting;

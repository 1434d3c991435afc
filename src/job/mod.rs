//! The uniform job model shared by every backend.

pub mod description;
pub mod status;

pub use description::{substitute_job_id, JobDescription};
pub use status::{Job, JobState, JobStatus};

//! Turning `qstat` entries and `qacct` records into job statuses.

use std::collections::BTreeMap;

use crate::error::{JobError, Result};
use crate::gridengine::xml::JobInfo;
use crate::job::{Job, JobStatus};
use crate::scripting::parse_key_value_records;

/// Exit status reported by qacct for a job killed with SIGKILL.
const KILLED_EXIT_STATUS: i32 = 137;

/// The raw state code of a listing entry, e.g. `qw`, `r` or `Eqw`.
pub fn listing_state(info: &JobInfo) -> &str {
    info.get("state").map(String::as_str).unwrap_or("")
}

/// Message for an entry stuck in an error state, which Grid Engine never
/// leaves by itself.
pub fn listing_error(info: &JobInfo) -> Option<String> {
    let state = listing_state(info);
    state
        .contains('E')
        .then(|| format!("Job reports error state: {state}"))
}

/// Status of a job that is still in the live listing.
pub fn from_listing(job: Job, info: &JobInfo) -> JobStatus {
    let state = listing_state(info);
    let running = state.contains('r') && !state.contains('d') && !state.contains('E');
    JobStatus::new(job, state, running, false).with_info(info.clone())
}

/// Parse `qacct -j` output. A job run more than once (rescheduled) has one
/// record per run; the last one wins.
pub fn parse_accounting(output: &str) -> Result<Option<BTreeMap<String, String>>> {
    Ok(parse_key_value_records(output, "==")?.pop())
}

/// Final status from an accounting record.
pub fn from_accounting(job: Job, record: BTreeMap<String, String>) -> JobStatus {
    let exit_code = record
        .get("exit_status")
        .and_then(|v| v.split_whitespace().next())
        .and_then(|v| v.parse::<i32>().ok());
    let failed = record.get("failed").map(|v| v.trim()).unwrap_or("0").to_string();

    let status = if failed == "0" {
        JobStatus::new(job, "done", false, true)
    } else if failed.starts_with("100") && exit_code == Some(KILLED_EXIT_STATUS) {
        JobStatus::new(job, "killed", false, true).with_error(JobError::Cancelled)
    } else {
        JobStatus::new(job, "done", false, true)
            .with_error(JobError::SchedulerReported(format!("Job reports error: {failed}")))
    };
    status.with_exit_code(exit_code).with_info(record)
}

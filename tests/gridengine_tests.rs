//! Grid Engine adapter against a scripted head node: discovery, submission,
//! slot policies and qstat/qacct reconciliation.

mod test_harness;

use std::sync::Arc;
use std::time::Duration;

use test_harness::{output, qstat_single, FakeRunner, QSTAT_EMPTY, QSTAT_TWO_JOBS};
use xenon_lite::config::GridEngineConfig;
use xenon_lite::error::{JobError, XenonError};
use xenon_lite::gridengine::GridEngineScheduler;
use xenon_lite::job::{Job, JobDescription};
use xenon_lite::remote::CommandRunner;
use xenon_lite::scheduler::Scheduler;

const QACCT_DONE: &str = "==============================================================
qname        all.q
hostname     node1
owner        alice
jobname      xenon
jobnumber    583111
failed       0
exit_status  0
";

fn test_config() -> GridEngineConfig {
    GridEngineConfig::default().with_polling_delay(Duration::from_millis(20))
}

async fn connect(runner: &Arc<FakeRunner>, config: GridEngineConfig) -> GridEngineScheduler {
    let runner: Arc<dyn CommandRunner> = runner.clone();
    GridEngineScheduler::connect(runner, config).await.unwrap()
}

fn submitted(id: &str) -> String {
    format!("Your job {id} (\"xenon\") has been submitted\n")
}

/// Script piped to the last `qsub` call.
fn last_script(runner: &FakeRunner) -> String {
    runner
        .calls()
        .into_iter()
        .filter(|c| c.command == "qsub")
        .last()
        .and_then(|c| c.stdin)
        .unwrap()
}

#[tokio::test]
async fn test_connect_loads_queues() {
    let runner = FakeRunner::gridengine();
    let scheduler = connect(&runner, test_config()).await;

    assert_eq!(scheduler.adaptor_name(), "gridengine");
    assert_eq!(scheduler.queue_names(), vec!["all.q".to_string(), "gpu.q".to_string()]);
    assert!(scheduler.default_queue_name().is_none());
    assert_eq!(scheduler.setup().queue("all.q").unwrap().slots, 4);
    assert!(scheduler.setup().parallel_environment("fill").is_some());
}

#[tokio::test]
async fn test_unsupported_version_rejected() {
    let runner = FakeRunner::gridengine();
    runner.set("qstat -help", "SLURM 23.02\n", 0);
    let dyn_runner: Arc<dyn CommandRunner> = runner.clone();
    let result = GridEngineScheduler::connect(dyn_runner, test_config()).await;
    assert!(matches!(result, Err(XenonError::UnsupportedScheduler(_))));

    let scheduler = connect(&runner, test_config().with_ignore_version(true)).await;
    assert_eq!(scheduler.queue_names().len(), 2);
}

#[tokio::test]
async fn test_connect_without_parallel_environments() {
    let runner = FakeRunner::gridengine();
    runner.set_output("qconf -spl", output("", "no parallel environment defined", 1));
    let scheduler = connect(&runner, test_config()).await;
    assert!(scheduler.setup().parallel_environment("smp").is_none());
}

#[tokio::test]
async fn test_get_jobs_lists_qstat() {
    let runner = FakeRunner::gridengine();
    runner.set("qstat -xml", QSTAT_TWO_JOBS, 0);
    let scheduler = connect(&runner, test_config()).await;

    let jobs = scheduler.get_jobs(&[]).await.unwrap();
    let ids: Vec<&str> = jobs.iter().map(|j| j.identifier.as_str()).collect();
    assert!(ids.contains(&"583111"));
    assert!(ids.contains(&"583112"));

    let in_all = scheduler.get_jobs(&["all.q".to_string()]).await.unwrap();
    assert_eq!(in_all.len(), 1);
    assert_eq!(in_all[0].identifier, "583111");
    assert_eq!(in_all[0].queue_name.as_deref(), Some("all.q"));

    assert!(scheduler.get_jobs(&["gpu.q".to_string()]).await.unwrap().is_empty());
    assert!(matches!(
        scheduler.get_jobs(&["nope".to_string()]).await,
        Err(XenonError::NoSuchQueue(_))
    ));
}

#[tokio::test]
async fn test_submit_generates_script() {
    let runner = FakeRunner::gridengine();
    runner.set("qsub", &submitted("583113"), 0);
    let scheduler = connect(&runner, test_config()).await;

    let job = scheduler
        .submit_job(
            JobDescription::new("/bin/hostname")
                .with_queue("all.q")
                .with_working_directory("/home/alice")
                .with_max_runtime(Duration::from_secs(3600))
                .with_stdout("out.%j"),
        )
        .await
        .unwrap();

    assert_eq!(job.identifier, "583113");
    assert_eq!(job.queue_name.as_deref(), Some("all.q"));
    assert_eq!(job.scheduler_id, scheduler.scheduler_id());

    let script = last_script(&runner);
    assert!(script.starts_with("#!/bin/sh\n#$ -S /bin/sh\n"));
    assert!(script.contains("#$ -wd '/home/alice'\n"));
    assert!(script.contains("#$ -q all.q\n"));
    assert!(script.contains("#$ -l h_rt=01:00:00\n"));
    assert!(script.contains("#$ -o 'out.$JOB_ID'\n"));
    assert!(script.contains("#$ -e '/dev/null'\n"));
    assert!(script.ends_with("/bin/hostname\n"));
}

#[tokio::test]
async fn test_submit_rejects_unknown_queue_and_interactive() {
    let runner = FakeRunner::gridengine();
    let scheduler = connect(&runner, test_config()).await;

    let result = scheduler
        .submit_job(JobDescription::new("/bin/true").with_queue("nope"))
        .await;
    assert!(matches!(result, Err(XenonError::NoSuchQueue(_))));

    let result = scheduler
        .submit_job(JobDescription::new("/bin/true").with_interactive(true))
        .await;
    assert!(matches!(result, Err(XenonError::InvalidJobDescription(_))));
    assert_eq!(runner.count("qsub"), 0);
}

#[tokio::test]
async fn test_slot_policies() {
    let runner = FakeRunner::gridengine();
    runner.set("qsub", &submitted("1"), 0);
    let scheduler = connect(&runner, test_config()).await;

    // $pe_slots: processes on one node
    scheduler
        .submit_job(
            JobDescription::new("/bin/hostname")
                .with_queue("all.q")
                .with_nodes(1, 4)
                .with_job_option("parallel.environment", "smp"),
        )
        .await
        .unwrap();
    assert!(last_script(&runner).contains("#$ -pe smp 4\n"));

    // $fill_up: whole nodes of all.q (4 slots each)
    scheduler
        .submit_job(
            JobDescription::new("/bin/hostname")
                .with_queue("all.q")
                .with_nodes(2, 1)
                .with_job_option("parallel.environment", "fill"),
        )
        .await
        .unwrap();
    let script = last_script(&runner);
    assert!(script.contains("#$ -pe fill 8\n"));
    assert!(script.contains("for host in `cat $PE_HOSTFILE | cut -d \" \" -f 1` ; do\n"));
    assert!(script.ends_with("wait\nexit 0\n"));

    // Explicit slot count wins
    scheduler
        .submit_job(
            JobDescription::new("/bin/hostname")
                .with_queue("all.q")
                .with_job_option("parallel.environment", "smp")
                .with_job_option("parallel.slots", "16"),
        )
        .await
        .unwrap();
    assert!(last_script(&runner).contains("#$ -pe smp 16\n"));
    assert_eq!(runner.count("qsub"), 3);

    // $pe_slots and $round_robin refuse multiple nodes
    for pe in ["smp", "make"] {
        let result = scheduler
            .submit_job(
                JobDescription::new("/bin/hostname")
                    .with_nodes(2, 1)
                    .with_job_option("parallel.environment", pe),
            )
            .await;
        assert!(
            matches!(result, Err(XenonError::InvalidParallelEnvironment(_))),
            "{pe} accepted two nodes"
        );
    }

    // Unknown allocation rule
    let result = scheduler
        .submit_job(
            JobDescription::new("/bin/hostname").with_job_option("parallel.environment", "odd"),
        )
        .await;
    assert!(matches!(result, Err(XenonError::InvalidParallelEnvironment(_))));

    // gpu.q has no parallel environments attached
    let result = scheduler
        .submit_job(
            JobDescription::new("/bin/hostname")
                .with_queue("gpu.q")
                .with_job_option("parallel.environment", "smp"),
        )
        .await;
    assert!(matches!(result, Err(XenonError::InvalidParallelEnvironment(_))));

    // More than one process needs a parallel environment
    let result = scheduler
        .submit_job(JobDescription::new("/bin/hostname").with_nodes(2, 1))
        .await;
    assert!(matches!(result, Err(XenonError::InvalidParallelEnvironment(_))));
    assert_eq!(runner.count("qsub"), 3);
}

#[tokio::test]
async fn test_submit_custom_script() {
    let runner = FakeRunner::gridengine();
    runner.set("qsub /home/alice/run.sh", &submitted("583114"), 0);
    let scheduler = connect(&runner, test_config()).await;

    let job = scheduler
        .submit_job(
            JobDescription::default()
                .with_working_directory("/home/alice")
                .with_job_option("job.script", "run.sh"),
        )
        .await
        .unwrap();
    assert_eq!(job.identifier, "583114");
    assert_eq!(runner.count("qsub /home/alice/run.sh"), 1);
    assert_eq!(runner.count("qsub"), 0);
}

#[tokio::test]
async fn test_status_from_listing() {
    let runner = FakeRunner::gridengine();
    runner.set("qstat -xml", QSTAT_TWO_JOBS, 0);
    let scheduler = connect(&runner, test_config()).await;

    let running = Job::discovered("583111", scheduler.scheduler_id(), None);
    let status = scheduler.get_job_status(&running).await.unwrap();
    assert_eq!(status.state, "r");
    assert!(status.is_running());
    assert!(!status.is_done());
    assert_eq!(status.info.get("queue_name").unwrap(), "all.q@node1");

    let pending = Job::discovered("583112", scheduler.scheduler_id(), None);
    let status = scheduler.get_job_status(&pending).await.unwrap();
    assert_eq!(status.state, "qw");
    assert!(!status.is_running());

    // Found in qstat, so qacct is never consulted.
    assert_eq!(runner.count("qacct -j 583111"), 0);
}

#[tokio::test]
async fn test_status_from_accounting() {
    let runner = FakeRunner::gridengine();
    runner.set("qacct -j 583111", QACCT_DONE, 0);
    let scheduler = connect(&runner, test_config()).await;

    let job = Job::discovered("583111", scheduler.scheduler_id(), None);
    let status = scheduler.get_job_status(&job).await.unwrap();
    assert_eq!(status.state, "done");
    assert!(status.is_done());
    assert_eq!(status.exit_code, Some(0));
    assert!(!status.has_error());
    assert_eq!(status.info.get("hostname").unwrap(), "node1");
}

#[tokio::test]
async fn test_killed_in_accounting() {
    let runner = FakeRunner::gridengine();
    runner.set(
        "qacct -j 583111",
        "==========\njobnumber 583111\nfailed 100 : assumedly after job\nexit_status 137\n",
        0,
    );
    let scheduler = connect(&runner, test_config()).await;

    let job = Job::discovered("583111", scheduler.scheduler_id(), None);
    let status = scheduler.get_job_status(&job).await.unwrap();
    assert_eq!(status.state, "killed");
    assert_eq!(status.error, Some(JobError::Cancelled));
}

#[tokio::test]
async fn test_grace_window_then_no_such_job() {
    let runner = FakeRunner::gridengine();
    runner.set("qsub", &submitted("583115"), 0);
    runner.set_output(
        "qacct -j 583115",
        output("", "error: job id 583115 not found", 1),
    );
    let scheduler = connect(
        &runner,
        test_config().with_accounting_grace_time(Duration::from_millis(300)),
    )
    .await;

    let job = scheduler
        .submit_job(JobDescription::new("/bin/true"))
        .await
        .unwrap();

    // Gone from qstat, not yet in qacct.
    let status = scheduler.get_job_status(&job).await.unwrap();
    assert_eq!(status.state, "unknown");
    assert!(!status.is_running());
    assert!(!status.is_done());
    assert!(!status.has_error());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(matches!(
        scheduler.get_job_status(&job).await,
        Err(XenonError::NoSuchJob(id)) if id == "583115"
    ));
}

#[tokio::test]
async fn test_unknown_job_is_an_error() {
    let runner = FakeRunner::gridengine();
    runner.set_output("qacct -j 42", output("", "error: job id 42 not found", 1));
    let scheduler = connect(&runner, test_config()).await;

    let job = Job::discovered("42", scheduler.scheduler_id(), None);
    assert!(matches!(
        scheduler.get_job_status(&job).await,
        Err(XenonError::NoSuchJob(_))
    ));

    // Batched queries embed the error instead.
    let statuses = scheduler.get_job_statuses(&[job]).await;
    assert_eq!(statuses[0].state, "UNKNOWN");
    assert!(statuses[0].has_error());
}

#[tokio::test]
async fn test_cancel_pending_job_reports_killed_once() {
    let runner = FakeRunner::gridengine();
    runner.set("qstat -xml", QSTAT_TWO_JOBS, 0);
    runner.set("qdel 583112", "alice has deleted job 583112\n", 0);
    runner.set_output("qacct -j 583112", output("", "error: job id 583112 not found", 1));
    let scheduler = connect(&runner, test_config()).await;

    let job = Job::discovered("583112", scheduler.scheduler_id(), None);
    assert_eq!(scheduler.get_job_status(&job).await.unwrap().state, "qw");

    runner.set("qstat -xml", QSTAT_EMPTY, 0);
    let status = scheduler.cancel_job(&job).await.unwrap();
    assert_eq!(status.state, "killed");
    assert!(status.is_done());
    assert_eq!(status.error, Some(JobError::DeletedBeforeStart));

    // The marker is consumed; the grace window still covers the job.
    let status = scheduler.get_job_status(&job).await.unwrap();
    assert_eq!(status.state, "unknown");
    assert!(!status.is_done());
}

#[tokio::test]
async fn test_cancel_running_job() {
    let runner = FakeRunner::gridengine();
    runner.set("qstat -xml", &qstat_single("583111", "dr", "all.q@node1"), 0);
    runner.set(
        "qdel 583111",
        "alice has registered the job 583111 for deletion\n",
        0,
    );
    let scheduler = connect(&runner, test_config()).await;

    let job = Job::discovered("583111", scheduler.scheduler_id(), None);
    let status = scheduler.cancel_job(&job).await.unwrap();
    assert_eq!(status.state, "dr");
    assert!(!status.is_running());
    assert!(!status.is_done());
    assert_eq!(runner.count("qdel 583111"), 1);
}

#[tokio::test]
async fn test_cancel_missing_job() {
    let runner = FakeRunner::gridengine();
    runner.set_output(
        "qdel 999",
        output("", "denied: job \"999\" does not exist\n", 1),
    );
    let scheduler = connect(&runner, test_config()).await;

    let job = Job::discovered("999", scheduler.scheduler_id(), None);
    assert!(matches!(
        scheduler.cancel_job(&job).await,
        Err(XenonError::NoSuchJob(_))
    ));
}

#[tokio::test]
async fn test_error_state_is_cancelled() {
    let runner = FakeRunner::gridengine();
    runner.set("qstat -xml", &qstat_single("583120", "Eqw", ""), 0);
    runner.set("qdel 583120", "alice has deleted job 583120\n", 0);
    runner.set_output("qacct -j 583120", output("", "error: job id 583120 not found", 1));
    let scheduler = connect(&runner, test_config()).await;

    let job = Job::discovered("583120", scheduler.scheduler_id(), None);
    let status = scheduler.get_job_status(&job).await.unwrap();
    assert_eq!(status.state, "error");
    assert!(status.is_done());
    assert_eq!(
        status.error,
        Some(JobError::SchedulerReported(
            "Job reports error state: Eqw".to_string()
        ))
    );
    assert_eq!(runner.count("qdel 583120"), 1);
}

#[tokio::test]
async fn test_batch_status_uses_one_listing() {
    let runner = FakeRunner::gridengine();
    runner.set("qstat -xml", QSTAT_TWO_JOBS, 0);
    let scheduler = connect(&runner, test_config()).await;

    let jobs = vec![
        Job::discovered("583111", scheduler.scheduler_id(), None),
        Job::discovered("583112", scheduler.scheduler_id(), None),
    ];
    let before = runner.count("qstat -xml");
    let statuses = scheduler.get_job_statuses(&jobs).await;
    assert_eq!(runner.count("qstat -xml") - before, 1);
    assert_eq!(statuses[0].state, "r");
    assert_eq!(statuses[1].state, "qw");
}

#[tokio::test]
async fn test_wait_until_done_polls() {
    let runner = FakeRunner::gridengine();
    runner.set("qsub", &submitted("583111"), 0);
    runner.push("qacct -j 583111", "", 1);
    runner.push("qacct -j 583111", "", 1);
    runner.push("qacct -j 583111", QACCT_DONE, 0);
    let scheduler = connect(&runner, test_config()).await;

    let job = scheduler
        .submit_job(JobDescription::new("/bin/true"))
        .await
        .unwrap();

    let status = scheduler.wait_until_done(&job, 10_000).await.unwrap();
    assert_eq!(status.state, "done");
    assert_eq!(status.exit_code, Some(0));
    assert_eq!(runner.count("qacct -j 583111"), 3);
}

#[tokio::test]
async fn test_wait_until_running_times_out() {
    let runner = FakeRunner::gridengine();
    runner.set("qstat -xml", QSTAT_TWO_JOBS, 0);
    let scheduler = connect(&runner, test_config()).await;

    let job = Job::discovered("583112", scheduler.scheduler_id(), None);
    let status = scheduler.wait_until_running(&job, 100).await.unwrap();
    assert_eq!(status.state, "qw");

    let status = scheduler.wait_until_running(&job, -1).await.unwrap();
    assert_eq!(status.state, "qw");
}

#[tokio::test]
async fn test_job_from_other_scheduler_rejected() {
    let runner = FakeRunner::gridengine();
    let scheduler = connect(&runner, test_config()).await;
    let other = connect(&runner, test_config()).await;

    let job = Job::discovered("583111", other.scheduler_id(), None);
    assert!(matches!(
        scheduler.get_job_status(&job).await,
        Err(XenonError::WrongScheduler { .. })
    ));
    assert!(matches!(
        scheduler.cancel_job(&job).await,
        Err(XenonError::WrongScheduler { .. })
    ));
}

//! Shared helpers for integration tests.
//!
//! Provides polling assertions and a scripted [`CommandRunner`] that stands in
//! for the Grid Engine command-line tools.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use xenon_lite::error::Result;
use xenon_lite::remote::{command_line, CommandOutput, CommandRunner};

/// `qstat -help` banner of a supported installation.
#[allow(dead_code)]
pub const QSTAT_HELP: &str = "SGE 8.1.9\nusage: qstat [options]\n";

/// `qstat -xml` with one running job (583111) and one pending job (583112).
#[allow(dead_code)]
pub const QSTAT_TWO_JOBS: &str = r#"<?xml version='1.0'?>
<job_info  xmlns:xsd="http://gridengine.sunsource.net/source/browse/*checkout*/gridengine/source/dist/util/resources/schemas/qstat/qstat.xsd?revision=1.11">
  <queue_info>
    <job_list state="running">
      <JB_job_number>583111</JB_job_number>
      <JAT_prio>0.50500</JAT_prio>
      <JB_name>xenon</JB_name>
      <JB_owner>alice</JB_owner>
      <state>r</state>
      <JAT_start_time>2013-01-21T10:00:00</JAT_start_time>
      <queue_name>all.q@node1</queue_name>
      <slots>1</slots>
    </job_list>
  </queue_info>
  <job_info>
    <job_list state="pending">
      <JB_job_number>583112</JB_job_number>
      <JB_name>xenon</JB_name>
      <JB_owner>alice</JB_owner>
      <state>qw</state>
      <queue_name></queue_name>
      <slots>1</slots>
    </job_list>
  </job_info>
</job_info>
"#;

#[allow(dead_code)]
pub const QSTAT_EMPTY: &str =
    "<?xml version='1.0'?>\n<job_info>\n  <queue_info>\n  </queue_info>\n  <job_info>\n  </job_info>\n</job_info>\n";

/// `qstat -xml` listing a single job in the given state.
#[allow(dead_code)]
pub fn qstat_single(id: &str, state: &str, queue: &str) -> String {
    format!(
        "<?xml version='1.0'?>\n<job_info>\n  <queue_info>\n    <job_list state=\"running\">\n      \
         <JB_job_number>{id}</JB_job_number>\n      <state>{state}</state>\n      \
         <queue_name>{queue}</queue_name>\n    </job_list>\n  </queue_info>\n  <job_info>\n  </job_info>\n</job_info>\n"
    )
}

#[allow(dead_code)]
pub const QCONF_SQ_ALL: &str = "qname                 all.q
hostlist              @allhosts
seq_no                0
pe_list               make smp fill
slots                 4
shell                 /bin/sh
";

#[allow(dead_code)]
pub const QCONF_SQ_GPU: &str = "qname                 gpu.q
hostlist              @gpuhosts
pe_list               NONE
slots                 2
";

#[allow(dead_code)]
pub fn qconf_sp(name: &str, rule: &str) -> String {
    format!(
        "pe_name            {name}\nslots              999\nuser_lists         NONE\n\
         allocation_rule    {rule}\ncontrol_slaves     FALSE\njob_is_first_task  TRUE\n"
    )
}

/// One command as the fake runner saw it.
#[derive(Debug, Clone)]
pub struct Call {
    pub command: String,
    pub stdin: Option<String>,
}

/// [`CommandRunner`] answering from a script of canned outputs.
///
/// Responses are keyed by the full command line. Each key holds a queue; the
/// last entry is repeated once the others are used up. Unknown commands exit
/// with 127.
#[derive(Default)]
pub struct FakeRunner {
    responses: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
    calls: Mutex<Vec<Call>>,
}

#[allow(dead_code)]
impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replace every queued response for `command`.
    pub fn set(&self, command: &str, stdout: &str, exit_code: i32) {
        self.set_output(command, output(stdout, "", exit_code));
    }

    pub fn set_output(&self, command: &str, out: CommandOutput) {
        let mut responses = self.responses.lock().unwrap();
        responses.insert(command.to_string(), VecDeque::from([out]));
    }

    /// Queue a response behind the existing ones for `command`.
    pub fn push(&self, command: &str, stdout: &str, exit_code: i32) {
        let mut responses = self.responses.lock().unwrap();
        responses
            .entry(command.to_string())
            .or_default()
            .push_back(output(stdout, "", exit_code));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// How many times `command` was run.
    pub fn count(&self, command: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.command == command)
            .count()
    }

    /// A fake Grid Engine head node: supported version, queues `all.q` and
    /// `gpu.q`, parallel environments covering every allocation rule.
    pub fn gridengine() -> Arc<Self> {
        let runner = Self::new();
        runner.set("qstat -help", QSTAT_HELP, 0);
        runner.set("qconf -sql", "all.q\ngpu.q\n", 0);
        runner.set("qconf -sq all.q", QCONF_SQ_ALL, 0);
        runner.set("qconf -sq gpu.q", QCONF_SQ_GPU, 0);
        runner.set("qconf -spl", "smp\nfill\nmake\nodd\n", 0);
        runner.set("qconf -sp smp", &qconf_sp("smp", "$pe_slots"), 0);
        runner.set("qconf -sp fill", &qconf_sp("fill", "$fill_up"), 0);
        runner.set("qconf -sp make", &qconf_sp("make", "$round_robin"), 0);
        runner.set("qconf -sp odd", &qconf_sp("odd", "$weird"), 0);
        runner.set("qstat -xml", QSTAT_EMPTY, 0);
        runner
    }
}

#[allow(dead_code)]
pub fn output(stdout: &str, stderr: &str, exit_code: i32) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        exit_code,
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(
        &self,
        stdin: Option<&str>,
        executable: &str,
        args: &[String],
    ) -> Result<CommandOutput> {
        let command = command_line(executable, args);
        self.calls.lock().unwrap().push(Call {
            command: command.clone(),
            stdin: stdin.map(str::to_string),
        });
        let mut responses = self.responses.lock().unwrap();
        let out = match responses.get_mut(&command) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        Ok(out.unwrap_or_else(|| output("", &format!("{executable}: command not found"), 127)))
    }

    fn location(&self) -> String {
        "fake".to_string()
    }
}

/// Wait for a condition to become true with timeout
#[allow(dead_code)]
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true
#[allow(dead_code)]
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(50)).await;
    assert!(result, "{}", message);
}

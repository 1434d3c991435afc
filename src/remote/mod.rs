//! Remote command execution.
//!
//! A [`CommandRunner`] runs one command to completion somewhere and hands back
//! its stdout, stderr and exit code. The Grid Engine adapter drives `qsub`,
//! `qstat` and friends through it, and [`RemoteLauncher`](crate::engine::RemoteLauncher)
//! uses it to run jobs directly on another host.
//!
//! - [`LocalCommandRunner`] runs on this host.
//! - [`SshCommandRunner`] goes through the system `ssh` client.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::Result;

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs a command to completion. Implementations must be safe to call concurrently.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        stdin: Option<&str>,
        executable: &str,
        args: &[String],
    ) -> Result<CommandOutput>;

    /// Where commands end up, for logs and error messages.
    fn location(&self) -> String;
}

/// Runs commands on the local host.
#[derive(Debug, Clone, Default)]
pub struct LocalCommandRunner;

impl LocalCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for LocalCommandRunner {
    async fn run(
        &self,
        stdin: Option<&str>,
        executable: &str,
        args: &[String],
    ) -> Result<CommandOutput> {
        let mut cmd = Command::new(executable);
        cmd.args(args);
        run_captured(cmd, stdin).await
    }

    fn location(&self) -> String {
        "localhost".to_string()
    }
}

/// Runs commands on a remote host via the `ssh` binary.
#[derive(Debug, Clone)]
pub struct SshCommandRunner {
    destination: String,
    options: Vec<String>,
}

impl SshCommandRunner {
    /// `destination` is anything `ssh` accepts (`host`, `user@host`, an alias).
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            options: vec!["-o".to_string(), "BatchMode=yes".to_string()],
        }
    }

    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push("-o".to_string());
        self.options.push(option.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.options.push("-p".to_string());
        self.options.push(port.to_string());
        self
    }
}

#[async_trait]
impl CommandRunner for SshCommandRunner {
    async fn run(
        &self,
        stdin: Option<&str>,
        executable: &str,
        args: &[String],
    ) -> Result<CommandOutput> {
        let mut cmd = Command::new("ssh");
        cmd.args(&self.options)
            .arg(&self.destination)
            .arg("--")
            .arg(command_line(executable, args));
        run_captured(cmd, stdin).await
    }

    fn location(&self) -> String {
        self.destination.clone()
    }
}

async fn run_captured(mut cmd: Command, stdin: Option<&str>) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes()).await?;
        pipe.shutdown().await?;
    }
    let output = child.wait_with_output().await?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        // Killed by a signal
        exit_code: output.status.code().unwrap_or(-1),
    })
}

/// Quote one word for a POSIX shell.
pub fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c))
    {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Join an executable and its arguments into a single shell command line.
pub fn command_line(executable: &str, args: &[String]) -> String {
    std::iter::once(executable)
        .chain(args.iter().map(String::as_str))
        .map(shell_quote)
        .collect::<Vec<_>>()
        .join(" ")
}

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::job::{substitute_job_id, JobDescription};
use crate::remote::{command_line, shell_quote, CommandRunner};

/// Starts the process or task behind an execution unit.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(
        &self,
        description: &JobDescription,
        job_id: &str,
    ) -> io::Result<Box<dyn RunningTask>>;

    /// Short name used in job identifiers and logs.
    fn name(&self) -> &str;
}

/// A launched process or task.
#[async_trait]
pub trait RunningTask: Send {
    /// Exit code if finished, without blocking.
    fn try_exit_code(&mut self) -> io::Result<Option<i32>>;

    /// Forcibly terminate and reap.
    async fn destroy(&mut self);
}

/// Spawns jobs as child processes of this one.
#[derive(Debug, Clone, Default)]
pub struct LocalLauncher;

impl LocalLauncher {
    pub fn new() -> Self {
        Self
    }

    fn command(description: &JobDescription) -> io::Result<Command> {
        let executable = description.executable.as_deref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "job has no executable")
        })?;
        let mut cmd = Command::new(executable);
        cmd.args(&description.arguments)
            .envs(&description.environment)
            .kill_on_drop(true);
        if let Some(dir) = &description.working_directory {
            cmd.current_dir(dir);
        }
        Ok(cmd)
    }

    /// Start a job with piped stdio, handing the pipes to the caller.
    pub fn launch_interactive(
        &self,
        description: &JobDescription,
        job_id: &str,
    ) -> io::Result<(LocalTask, Streams)> {
        let mut cmd = Self::command(description)?;
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn()?;

        let missing = || io::Error::new(io::ErrorKind::BrokenPipe, "stdio pipe not available");
        let streams = Streams {
            job_id: job_id.to_string(),
            stdin: child.stdin.take().ok_or_else(missing)?,
            stdout: child.stdout.take().ok_or_else(missing)?,
            stderr: child.stderr.take().ok_or_else(missing)?,
        };
        tracing::debug!(job_id, pid = ?child.id(), "Interactive process started");
        Ok((LocalTask { child }, streams))
    }
}

#[async_trait]
impl Launcher for LocalLauncher {
    async fn launch(
        &self,
        description: &JobDescription,
        job_id: &str,
    ) -> io::Result<Box<dyn RunningTask>> {
        let mut cmd = Self::command(description)?;
        let workdir = description.working_directory.as_deref().map(Path::new);

        match &description.stdin {
            Some(path) => {
                let file = std::fs::File::open(resolve(workdir, path, job_id))?;
                cmd.stdin(Stdio::from(file));
            }
            None => {
                cmd.stdin(Stdio::null());
            }
        }
        cmd.stdout(output_target(workdir, description.stdout.as_deref(), job_id).await?);
        cmd.stderr(output_target(workdir, description.stderr.as_deref(), job_id).await?);

        let child = cmd.spawn()?;
        tracing::debug!(job_id, pid = ?child.id(), "Process started");
        Ok(Box::new(LocalTask { child }))
    }

    fn name(&self) -> &str {
        "local"
    }
}

fn resolve(workdir: Option<&Path>, path: &str, job_id: &str) -> PathBuf {
    let path = PathBuf::from(substitute_job_id(path, job_id));
    match workdir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path,
    }
}

async fn output_target(workdir: Option<&Path>, path: Option<&str>, job_id: &str) -> io::Result<Stdio> {
    match path {
        Some(path) => {
            let file = tokio::fs::File::create(resolve(workdir, path, job_id)).await?;
            Ok(Stdio::from(file.into_std().await))
        }
        None => Ok(Stdio::null()),
    }
}

/// Piped stdio of an interactive job.
#[derive(Debug)]
pub struct Streams {
    pub job_id: String,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// A child process spawned by [`LocalLauncher`].
#[derive(Debug)]
pub struct LocalTask {
    child: Child,
}

#[async_trait]
impl RunningTask for LocalTask {
    fn try_exit_code(&mut self) -> io::Result<Option<i32>> {
        Ok(self.child.try_wait()?.map(exit_code))
    }

    async fn destroy(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::warn!(pid = ?self.child.id(), error = %e, "Failed to kill process");
        }
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Runs jobs on another host through a [`CommandRunner`].
pub struct RemoteLauncher {
    runner: Arc<dyn CommandRunner>,
}

impl RemoteLauncher {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Shell script that runs the job on the remote side with its redirections.
    pub fn remote_script(description: &JobDescription, job_id: &str) -> io::Result<String> {
        let executable = description.executable.as_deref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "job has no executable")
        })?;
        let mut script = String::new();
        if let Some(dir) = &description.working_directory {
            script.push_str(&format!("cd {} && ", shell_quote(dir)));
        }
        for (key, value) in &description.environment {
            script.push_str(&format!("export {}={} && ", key, shell_quote(value)));
        }
        script.push_str("exec ");
        script.push_str(&command_line(executable, &description.arguments));

        let redirect = |path: &Option<String>, fallback: &str| {
            path.as_deref()
                .map(|p| shell_quote(&substitute_job_id(p, job_id)))
                .unwrap_or_else(|| fallback.to_string())
        };
        script.push_str(&format!(" < {}", redirect(&description.stdin, "/dev/null")));
        script.push_str(&format!(" > {}", redirect(&description.stdout, "/dev/null")));
        script.push_str(&format!(" 2> {}", redirect(&description.stderr, "/dev/null")));
        Ok(script)
    }
}

#[async_trait]
impl Launcher for RemoteLauncher {
    async fn launch(
        &self,
        description: &JobDescription,
        job_id: &str,
    ) -> io::Result<Box<dyn RunningTask>> {
        let script = Self::remote_script(description, job_id)?;
        let runner = self.runner.clone();
        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let args = vec!["-c".to_string(), script];
            let result = runner
                .run(None, "sh", &args)
                .await
                .map(|out| out.exit_code)
                .map_err(|e| e.to_string());
            let _ = tx.send(result);
        });
        tracing::debug!(job_id, location = %self.runner.location(), "Remote task dispatched");
        Ok(Box::new(RemoteTask { handle, rx }))
    }

    fn name(&self) -> &str {
        "remote"
    }
}

/// A command in flight on a [`CommandRunner`].
pub struct RemoteTask {
    handle: JoinHandle<()>,
    rx: oneshot::Receiver<std::result::Result<i32, String>>,
}

#[async_trait]
impl RunningTask for RemoteTask {
    fn try_exit_code(&mut self) -> io::Result<Option<i32>> {
        match self.rx.try_recv() {
            Ok(Ok(code)) => Ok(Some(code)),
            Ok(Err(message)) => Err(io::Error::other(message)),
            Err(oneshot::error::TryRecvError::Empty) => Ok(None),
            Err(oneshot::error::TryRecvError::Closed) => {
                Err(io::Error::other("remote task vanished"))
            }
        }
    }

    async fn destroy(&mut self) {
        // Dropping the runner future drops its channel to the remote side.
        self.handle.abort();
        let _ = (&mut self.handle).await;
    }
}

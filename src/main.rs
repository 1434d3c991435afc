use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use xenon_lite::config::{GridEngineConfig, QueueSchedulerConfig};
use xenon_lite::gridengine::GridEngineScheduler;
use xenon_lite::job::{Job, JobDescription, JobStatus};
use xenon_lite::remote::{CommandRunner, LocalCommandRunner, SshCommandRunner};
use xenon_lite::scheduler::{QueueScheduler, Scheduler};

#[derive(Parser, Debug)]
#[command(name = "xenon-lite")]
#[command(version)]
#[command(about = "Run jobs locally or on a Grid Engine cluster")]
#[command(propagate_version = true)]
struct Args {
    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "table")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Jobs run by this process
    Local {
        #[command(subcommand)]
        command: LocalCommands,
    },

    /// Jobs on a Grid Engine cluster
    Gridengine {
        /// Run the Grid Engine tools over ssh on this host (e.g. "user@headnode")
        #[arg(long)]
        host: Option<String>,

        /// Skip the scheduler version check
        #[arg(long)]
        ignore_version: bool,

        #[command(subcommand)]
        command: GridEngineCommands,
    },
}

// =============================================================================
// Local Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum LocalCommands {
    /// Run a job and wait for it to finish. Ctrl-C cancels it.
    Run {
        /// Queue to submit to (single, multi or unlimited)
        #[arg(long)]
        queue: Option<String>,

        /// Kill the job after this many seconds
        #[arg(long)]
        max_runtime_secs: Option<u64>,

        /// Working directory of the job
        #[arg(long)]
        workdir: Option<String>,

        /// Executable to run
        executable: String,

        /// Arguments passed to the executable
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

// =============================================================================
// Grid Engine Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum GridEngineCommands {
    /// List queues
    Queues,

    /// List jobs
    List {
        /// Only jobs in these queues
        #[arg(long)]
        queue: Vec<String>,
    },

    /// Get status of a job
    Status {
        /// The Grid Engine job number
        job_id: String,
    },

    /// Submit a job
    Submit {
        #[arg(long)]
        queue: Option<String>,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        workdir: Option<String>,

        #[arg(long)]
        max_runtime_secs: Option<u64>,

        /// Parallel environment to run in
        #[arg(long)]
        parallel_environment: Option<String>,

        #[arg(long, default_value = "1")]
        nodes: u32,

        #[arg(long, default_value = "1")]
        processes_per_node: u32,

        executable: String,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Cancel a job
    Cancel {
        job_id: String,
    },
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct JobStatusOutput {
    job_id: String,
    queue: Option<String>,
    state: String,
    running: bool,
    done: bool,
    exit_code: Option<i32>,
    error: Option<String>,
}

impl From<&JobStatus> for JobStatusOutput {
    fn from(status: &JobStatus) -> Self {
        Self {
            job_id: status.job.identifier.clone(),
            queue: status.job.queue_name.clone(),
            state: status.state.clone(),
            running: status.running,
            done: status.done,
            exit_code: status.exit_code,
            error: status.error.as_ref().map(ToString::to_string),
        }
    }
}

#[derive(Serialize)]
struct JobListItem {
    job_id: String,
    queue: Option<String>,
}

#[derive(Serialize)]
struct QueueListOutput {
    queues: Vec<String>,
    default_queue: Option<String>,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn print_status(status: &JobStatus, output_format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&JobStatusOutput::from(status))?);
        }
        OutputFormat::Table => {
            println!("Job ID:    {}", status.job.identifier);
            if let Some(queue) = &status.job.queue_name {
                println!("Queue:     {}", queue);
            }
            println!("State:     {}", status.state);
            if let Some(code) = status.exit_code {
                println!("Exit code: {}", code);
            }
            if let Some(error) = &status.error {
                println!("Error:     {}", error);
            }
        }
    }
    Ok(())
}

fn print_jobs(jobs: &[Job], output_format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match output_format {
        OutputFormat::Json => {
            let items: Vec<JobListItem> = jobs
                .iter()
                .map(|job| JobListItem {
                    job_id: job.identifier.clone(),
                    queue: job.queue_name.clone(),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Table => {
            if jobs.is_empty() {
                println!("No jobs found.");
                return Ok(());
            }
            println!("{:<16} QUEUE", "JOB ID");
            println!("{}", "-".repeat(32));
            for job in jobs {
                println!("{:<16} {}", job.identifier, job.queue_name.as_deref().unwrap_or("-"));
            }
        }
    }
    Ok(())
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn handle_local_run(
    description: JobDescription,
    output_format: &OutputFormat,
) -> Result<Option<i32>, Box<dyn std::error::Error>> {
    let scheduler = QueueScheduler::local(QueueSchedulerConfig::default())?;
    let job = scheduler.submit_job(description).await?;
    tracing::debug!(job_id = %job.identifier, "Waiting for job");

    let status = tokio::select! {
        status = scheduler.wait_until_done(&job, 0) => status?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(job_id = %job.identifier, "Interrupted, cancelling job");
            scheduler.cancel_job(&job).await?;
            scheduler.wait_until_done(&job, 0).await?
        }
    };

    print_status(&status, output_format)?;
    Ok(status.exit_code)
}

async fn connect_gridengine(
    host: Option<String>,
    ignore_version: bool,
) -> Result<GridEngineScheduler, Box<dyn std::error::Error>> {
    let runner: Arc<dyn CommandRunner> = match host {
        Some(host) => Arc::new(SshCommandRunner::new(host)),
        None => Arc::new(LocalCommandRunner::new()),
    };
    let config = GridEngineConfig::default().with_ignore_version(ignore_version);
    Ok(GridEngineScheduler::connect(runner, config).await?)
}

async fn handle_gridengine(
    scheduler: &GridEngineScheduler,
    command: GridEngineCommands,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        GridEngineCommands::Queues => {
            let output = QueueListOutput {
                queues: scheduler.queue_names(),
                default_queue: scheduler.default_queue_name(),
            };
            match output_format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
                OutputFormat::Table => {
                    for queue in &output.queues {
                        println!("{}", queue);
                    }
                }
            }
        }
        GridEngineCommands::List { queue } => {
            let jobs = scheduler.get_jobs(&queue).await?;
            print_jobs(&jobs, output_format)?;
        }
        GridEngineCommands::Status { job_id } => {
            let job = Job::discovered(job_id, scheduler.scheduler_id(), None);
            let status = scheduler.get_job_status(&job).await?;
            print_status(&status, output_format)?;
        }
        GridEngineCommands::Submit {
            queue,
            name,
            workdir,
            max_runtime_secs,
            parallel_environment,
            nodes,
            processes_per_node,
            executable,
            args,
        } => {
            let mut description = JobDescription::new(executable)
                .with_args(args)
                .with_nodes(nodes, processes_per_node);
            description.queue_name = queue;
            description.name = name;
            description.working_directory = workdir;
            description.max_runtime = max_runtime_secs.map(Duration::from_secs);
            if let Some(pe) = parallel_environment {
                description = description.with_job_option("parallel.environment", pe);
            }
            let job = scheduler.submit_job(description).await?;
            match output_format {
                OutputFormat::Json => {
                    let item = JobListItem {
                        job_id: job.identifier,
                        queue: job.queue_name,
                    };
                    println!("{}", serde_json::to_string_pretty(&item)?);
                }
                OutputFormat::Table => {
                    println!("Job submitted successfully!");
                    println!("Job ID: {}", job.identifier);
                }
            }
        }
        GridEngineCommands::Cancel { job_id } => {
            let job = Job::discovered(job_id, scheduler.scheduler_id(), None);
            let status = scheduler.cancel_job(&job).await?;
            print_status(&status, output_format)?;
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Local { command } => match command {
            LocalCommands::Run {
                queue,
                max_runtime_secs,
                workdir,
                executable,
                args: job_args,
            } => {
                let mut description = JobDescription::new(executable).with_args(job_args);
                description.queue_name = queue;
                description.working_directory = workdir;
                description.max_runtime = max_runtime_secs.map(Duration::from_secs);

                let exit_code = handle_local_run(description, &args.output).await?;
                if let Some(code) = exit_code.filter(|code| *code != 0) {
                    std::process::exit(code);
                }
            }
        },
        Commands::Gridengine {
            host,
            ignore_version,
            command,
        } => {
            let scheduler = connect_gridengine(host, ignore_version).await?;
            handle_gridengine(&scheduler, command, &args.output).await?;
        }
    }

    Ok(())
}

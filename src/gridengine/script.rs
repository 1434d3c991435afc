//! Rendering a [`JobDescription`] as a Grid Engine batch script.

use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, XenonError};
use crate::job::description::JOB_ID_PLACEHOLDER;
use crate::job::JobDescription;
use crate::remote::command_line;

const DEFAULT_JOB_NAME: &str = "xenon";

/// `HH:MM:SS`, hours unbounded.
pub fn format_runtime(runtime: Duration) -> String {
    let secs = runtime.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn redirect(path: Option<&str>) -> String {
    match path {
        Some(path) => path.replace(JOB_ID_PLACEHOLDER, "$JOB_ID"),
        None => "/dev/null".to_string(),
    }
}

/// Single-quote a path for a `#$` directive. qsub does not unescape quotes
/// inside directives, so a path containing one cannot be expressed.
fn quoted(path: &str) -> Result<String> {
    if path.contains('\'') {
        return Err(XenonError::InvalidJobDescription(format!(
            "path cannot be passed to Grid Engine, it contains a single quote: {path}"
        )));
    }
    Ok(format!("'{path}'"))
}

/// Generate the script submitted on `qsub`'s stdin. `parallel` carries the
/// environment name and slot count when the job needs one.
pub fn generate(description: &JobDescription, parallel: Option<(&str, u32)>) -> Result<String> {
    let executable = description.executable.as_deref().ok_or_else(|| {
        XenonError::InvalidJobDescription("executable missing".to_string())
    })?;

    let mut script = String::new();
    // Writing to a String cannot fail.
    let _ = writeln!(script, "#!/bin/sh");
    let _ = writeln!(script, "#$ -S /bin/sh");
    let _ = writeln!(
        script,
        "#$ -N {}",
        description.name.as_deref().unwrap_or(DEFAULT_JOB_NAME)
    );
    if let Some(dir) = &description.working_directory {
        let _ = writeln!(script, "#$ -wd {}", quoted(dir)?);
    }
    if let Some(queue) = &description.queue_name {
        let _ = writeln!(script, "#$ -q {queue}");
    }
    if let Some((pe, slots)) = parallel {
        let _ = writeln!(script, "#$ -pe {pe} {slots}");
    }
    if let Some(runtime) = description.max_runtime {
        let _ = writeln!(script, "#$ -l h_rt={}", format_runtime(runtime));
    }
    if let Some(mb) = description.max_memory_mb {
        let _ = writeln!(script, "#$ -l mem_free={mb}M,h_vmem={mb}M");
    }
    if let Some(mb) = description.temp_space_mb {
        let _ = writeln!(script, "#$ -l tmpspace={mb}M");
    }
    if let Some(stdin) = &description.stdin {
        let _ = writeln!(script, "#$ -i {}", quoted(&redirect(Some(stdin)))?);
    }
    let _ = writeln!(script, "#$ -o {}", quoted(&redirect(description.stdout.as_deref()))?);
    let _ = writeln!(script, "#$ -e {}", quoted(&redirect(description.stderr.as_deref()))?);
    for arg in &description.scheduler_arguments {
        let _ = writeln!(script, "#$ {arg}");
    }

    if !description.environment.is_empty() {
        script.push('\n');
        for (key, value) in &description.environment {
            let value = value.replace('\\', "\\\\").replace('"', "\\\"");
            let _ = writeln!(script, "export {key}=\"{value}\"");
        }
    }
    script.push('\n');

    let command = command_line(executable, &description.arguments);
    if description.total_processes() <= 1 {
        let _ = writeln!(script, "{command}");
    } else {
        let _ = writeln!(
            script,
            "for host in `cat $PE_HOSTFILE | cut -d \" \" -f 1` ; do"
        );
        for _ in 0..description.processes_per_node {
            let _ = writeln!(
                script,
                "  ssh -o StrictHostKeyChecking=false $host \"cd `pwd` && {}\"&",
                command.replace('"', "\\\"")
            );
        }
        let _ = writeln!(script, "done");
        script.push('\n');
        let _ = writeln!(script, "wait");
        let _ = writeln!(script, "exit 0");
    }
    Ok(script)
}

/// Location of a user-supplied script, made absolute against the job's
/// working directory.
pub fn resolve_script_path(description: &JobDescription, script: &str) -> String {
    match &description.working_directory {
        Some(dir) if !Path::new(script).is_absolute() => {
            Path::new(dir).join(script).to_string_lossy().into_owned()
        }
        _ => script.to_string(),
    }
}

//! Helpers for adapters that drive a batch scheduler through its command-line
//! tools: checked command execution and parsing of their textual output.

use std::collections::BTreeMap;

use crate::error::{Result, XenonError};
use crate::remote::{command_line, CommandOutput, CommandRunner};

/// Run a command and insist it succeeded: exit code zero and nothing on stderr.
pub async fn run_checked(
    runner: &dyn CommandRunner,
    stdin: Option<&str>,
    executable: &str,
    args: &[String],
) -> Result<String> {
    let output = run_logged(runner, stdin, executable, args).await?;
    if !output.success() || !output.stderr.trim().is_empty() {
        return Err(XenonError::CommandFailed {
            command: command_line(executable, args),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output.stdout)
}

/// Run a command and return whatever it produced, successful or not.
pub async fn run_logged(
    runner: &dyn CommandRunner,
    stdin: Option<&str>,
    executable: &str,
    args: &[String],
) -> Result<CommandOutput> {
    let output = runner.run(stdin, executable, args).await?;
    tracing::debug!(
        location = %runner.location(),
        command = %command_line(executable, args),
        exit_code = output.exit_code,
        "Scheduler command finished"
    );
    Ok(output)
}

/// Non-empty, trimmed lines.
pub fn parse_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Join lines continued with a trailing backslash, as `qconf` prints long values.
pub fn join_continuations(output: &str) -> String {
    let mut joined = String::with_capacity(output.len());
    let mut continuing = false;
    for line in output.lines() {
        let line = if continuing { line.trim_start() } else { line };
        match line.trim_end().strip_suffix('\\') {
            Some(head) => {
                joined.push_str(head.trim_end());
                joined.push(' ');
                continuing = true;
            }
            None => {
                joined.push_str(line);
                joined.push('\n');
                continuing = false;
            }
        }
    }
    joined
}

/// Parse `key value` lines (key and value separated by whitespace) into a map.
///
/// Lines starting with any of `ignore` are skipped. A key without a value maps
/// to the empty string; a repeated key is an error.
pub fn parse_key_value_lines(output: &str, ignore: &[&str]) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || ignore.iter().any(|prefix| line.starts_with(prefix)) {
            continue;
        }
        let (key, value) = match line.split_once(char::is_whitespace) {
            Some((key, value)) => (key, value.trim()),
            None => (line, ""),
        };
        if map.insert(key.to_string(), value.to_string()).is_some() {
            return Err(XenonError::Parse(format!("duplicate key {key:?}")));
        }
    }
    Ok(map)
}

/// Split output into records at lines starting with `separator` and parse each
/// as key/value lines. Empty records are dropped.
pub fn parse_key_value_records(output: &str, separator: &str) -> Result<Vec<BTreeMap<String, String>>> {
    let mut records = Vec::new();
    let mut current = String::new();
    for line in output.lines() {
        if line.trim_start().starts_with(separator) {
            if !current.trim().is_empty() {
                records.push(parse_key_value_lines(&current, &[])?);
            }
            current.clear();
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    if !current.trim().is_empty() {
        records.push(parse_key_value_lines(&current, &[])?);
    }
    Ok(records)
}

/// The whitespace-delimited token following `prefix`, e.g. the job id in
/// `Your job 583111 ("xenon") has been submitted`.
pub fn parse_job_id_after(output: &str, prefix: &str) -> Result<String> {
    let rest = output
        .find(prefix)
        .map(|pos| &output[pos + prefix.len()..])
        .ok_or_else(|| {
            XenonError::Parse(format!("no {prefix:?} in output: {}", output.trim()))
        })?;
    rest.split_whitespace()
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| XenonError::Parse(format!("no job id after {prefix:?}")))
}

/// Index of the first of `options` that occurs in `output`.
pub fn match_outcome(output: &str, options: &[&str]) -> Result<usize> {
    options
        .iter()
        .position(|option| output.contains(option))
        .ok_or_else(|| {
            XenonError::Parse(format!(
                "unexpected output {:?}, expected one of {:?}",
                output.trim(),
                options
            ))
        })
}

/// Leading integer of a value such as `8` or `8,[node1=4]`.
pub fn parse_leading_int(value: &str) -> Option<u32> {
    let digits: String = value
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

//! Streaming parser for `qstat -xml` output.

use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Result, XenonError};

/// Key holding the job number inside each `job_list` element.
pub const JOB_NUMBER: &str = "JB_job_number";
/// Synthetic key holding the `state` attribute of `job_list` (`running`/`pending`).
pub const LONG_STATE: &str = "long_state";

/// Fields of one `job_list` entry, keyed by element name.
pub type JobInfo = BTreeMap<String, String>;

/// Parse `qstat -xml` into job infos keyed by job number.
///
/// Both the running (`queue_info`) and pending (`job_info`) sections are
/// read; a job listed twice keeps its last entry.
pub fn parse_job_infos(xml: &str) -> Result<BTreeMap<String, JobInfo>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut jobs = BTreeMap::new();
    let mut saw_root = false;
    let mut current: Option<JobInfo> = None;
    let mut field: Option<String> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = element_name(e)?;
                if name == "job_info" {
                    saw_root = true;
                }
                if name == "job_list" {
                    let mut info = JobInfo::new();
                    if let Some(state) = attribute(e, "state") {
                        info.insert(LONG_STATE.to_string(), state);
                    }
                    current = Some(info);
                } else if current.is_some() {
                    field = Some(name);
                    text.clear();
                }
            }
            Ok(Event::Empty(ref e)) => {
                let name = element_name(e)?;
                if name == "job_info" {
                    saw_root = true;
                }
                if let Some(info) = current.as_mut() {
                    info.insert(name, String::new());
                }
            }
            Ok(Event::Text(e)) => {
                if field.is_some() {
                    let value = e
                        .unescape()
                        .map_err(|e| XenonError::Parse(format!("bad text in qstat output: {e}")))?;
                    text.push_str(&value);
                }
            }
            Ok(Event::End(ref e)) => {
                let name = std::str::from_utf8(e.name().as_ref())
                    .map_err(|e| XenonError::Parse(format!("invalid UTF-8 in element name: {e}")))?
                    .to_string();
                if name == "job_list" {
                    if let Some(info) = current.take() {
                        let id = info.get(JOB_NUMBER).cloned().ok_or_else(|| {
                            XenonError::Parse(format!("job_list without {JOB_NUMBER}"))
                        })?;
                        jobs.insert(id, info);
                    }
                } else if let (Some(info), Some(key)) = (current.as_mut(), field.take()) {
                    info.insert(key, text.trim().to_string());
                    text.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(XenonError::Parse(format!(
                    "qstat XML error at position {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err(XenonError::Parse(
            "qstat output has no job_info element".to_string(),
        ));
    }
    Ok(jobs)
}

fn element_name(e: &BytesStart) -> Result<String> {
    std::str::from_utf8(e.name().as_ref())
        .map(str::to_string)
        .map_err(|e| XenonError::Parse(format!("invalid UTF-8 in element name: {e}")))
}

fn attribute(e: &BytesStart, key: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key.as_bytes())
        .and_then(|attr| std::str::from_utf8(&attr.value).ok().map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    const QSTAT: &str = r#"<?xml version='1.0'?>
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
      <JB_name>a &amp; b</JB_name>
      <state>qw</state>
      <queue_name></queue_name>
      <slots>4</slots>
    </job_list>
  </job_info>
</job_info>
"#;

    #[test]
    fn parses_running_and_pending_jobs() {
        let jobs = parse_job_infos(QSTAT).unwrap();
        assert_eq!(jobs.len(), 2);

        let running = &jobs["583111"];
        assert_eq!(running["state"], "r");
        assert_eq!(running["queue_name"], "all.q@node1");
        assert_eq!(running[LONG_STATE], "running");
        assert_eq!(running["JB_owner"], "alice");

        let pending = &jobs["583112"];
        assert_eq!(pending["state"], "qw");
        assert_eq!(pending["queue_name"], "");
        assert_eq!(pending["JB_name"], "a & b");
        assert_eq!(pending[LONG_STATE], "pending");
    }

    #[test]
    fn empty_listing() {
        let xml = "<?xml version='1.0'?>\n<job_info>\n  <queue_info/>\n  <job_info/>\n</job_info>\n";
        assert!(parse_job_infos(xml).unwrap().is_empty());
    }

    #[test]
    fn rejects_non_qstat_output() {
        assert!(parse_job_infos("error: commlib error").is_err());
        assert!(parse_job_infos("<other></other>").is_err());
    }

    #[test]
    fn rejects_job_without_number() {
        let xml = "<job_info><queue_info><job_list state=\"running\"><state>r</state></job_list></queue_info></job_info>";
        assert!(parse_job_infos(xml).is_err());
    }
}

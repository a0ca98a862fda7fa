//! Session summary from `/var/log/pacman.log`.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};
use xup_core::{Error, Result};

const ALPM_TAG: &str = "[ALPM]";

pub const NO_CHANGES: &str = "No package changes recorded in pacman log for this session.\n";
pub const UNREADABLE: &str = "Error: Could not open pacman log file.\n";

/// A log line that made it into the session summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub action: String,
    /// None when the timestamp could not be parsed.
    pub timestamp: Option<DateTime<Local>>,
}

impl LogEntry {
    pub fn render(&self) -> String {
        match self.timestamp {
            Some(_) => format!(" - {}", self.action),
            None => format!(" - {} (time parse failed)", self.action),
        }
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Local>> {
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(ts.with_timezone(&Local));
    }

    // offset-less stamps are local time
    let naive_part = raw.split('+').next()?;
    let naive = NaiveDateTime::parse_from_str(naive_part, "%Y-%m-%dT%H:%M:%S").ok()?;
    Local.from_local_datetime(&naive).earliest()
}

fn parse_line(line: &str) -> Option<(Option<DateTime<Local>>, String)> {
    if !line.contains(ALPM_TAG) {
        return None;
    }
    if !(line.contains("upgraded") || line.contains("installed")) {
        return None;
    }

    let raw_ts = line
        .strip_prefix('[')
        .and_then(|rest| rest.split_once(']'))
        .map(|(ts, _)| ts)
        .unwrap_or("");

    let action = line
        .split_once(ALPM_TAG)
        .map(|(_, rest)| rest.trim())
        .unwrap_or(line)
        .to_string();

    Some((parse_timestamp(raw_ts), action))
}

/// Upgrade/install entries logged at or after `since`, in file order.
pub fn session_entries(contents: &str, since: DateTime<Local>) -> Vec<LogEntry> {
    contents
        .lines()
        .filter_map(parse_line)
        .filter_map(|(timestamp, action)| match timestamp {
            Some(ts) if ts < since => None,
            Some(ts) => Some(LogEntry {
                action,
                timestamp: Some(ts),
            }),
            None => {
                debug!("Unparseable pacman log timestamp for: {}", action);
                Some(LogEntry {
                    action,
                    timestamp: None,
                })
            }
        })
        .collect()
}

pub fn read_session(path: &Path, since: DateTime<Local>) -> Result<Vec<LogEntry>> {
    let contents = fs::read_to_string(path)
        .map_err(|e| Error::LogUnavailable(format!("{}: {}", path.display(), e)))?;
    Ok(session_entries(&contents, since))
}

/// Human-readable summary block for the session log. Never fails.
pub fn session_summary(path: &Path, since: DateTime<Local>) -> String {
    match read_session(path, since) {
        Ok(entries) if entries.is_empty() => NO_CHANGES.to_string(),
        Ok(entries) => {
            let mut summary = String::from("Packages updated/installed in this session:\n");
            for entry in &entries {
                summary.push_str(&entry.render());
                summary.push('\n');
            }
            summary
        }
        Err(e) => {
            warn!("{}", e);
            UNREADABLE.to_string()
        }
    }
}

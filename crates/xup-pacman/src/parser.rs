//! Turns raw pacman output into per-package progress events.
//!
//! This is best-effort matching against human-readable text, so all of it
//! lives here: adapting to a different tool's output touches only this file.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveMode {
    Upgrading,
    Installing,
}

impl fmt::Display for ActiveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActiveMode::Upgrading => write!(f, "Upgrading"),
            ActiveMode::Installing => write!(f, "Installing"),
        }
    }
}

/// Coarse top-level phase, independent of the per-package table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Downloading,
    Checking,
    Resolving,
    Loading,
}

impl Phase {
    pub fn status_text(&self) -> &'static str {
        match self {
            Phase::Downloading => "Downloading packages...",
            Phase::Checking => "Checking packages...",
            Phase::Resolving => "Resolving dependencies...",
            Phase::Loading => "Loading package files...",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    Complete(String),
    BeginActive {
        name: String,
        mode: ActiveMode,
    },
    SetStatus {
        name: String,
        status: String,
        determinate: bool,
    },
    SetProgress {
        name: String,
        percent: u8,
        status: String,
    },
    /// pacman could not take its database lock.
    LockContention,
    PhaseHint(Phase),
}

fn begin_re() -> &'static Regex {
    static BEGIN_RE: OnceLock<Regex> = OnceLock::new();
    BEGIN_RE.get_or_init(|| {
        // optional "( 3/12)" counter that pacman puts in front of each step
        Regex::new(r"(?i)^\s*(?:\(\s*\d+\s*/\s*\d+\s*\)\s*)?(upgrading|installing)\s+(\S+)")
            .expect("valid begin regex")
    })
}

fn download_re() -> &'static Regex {
    static DOWNLOAD_RE: OnceLock<Regex> = OnceLock::new();
    DOWNLOAD_RE.get_or_init(|| Regex::new(r"(?i)downloading\s+\S+").expect("valid download regex"))
}

fn percent_re() -> &'static Regex {
    static PERCENT_RE: OnceLock<Regex> = OnceLock::new();
    PERCENT_RE.get_or_init(|| Regex::new(r"(\d{1,3})%").expect("valid percent regex"))
}

/// Parses one output chunk.
///
/// `active` is the package the previous chunk left active; within the chunk
/// the active package advances as new begin lines are seen.
pub fn parse(chunk: &str, active: Option<&str>) -> Vec<ParseEvent> {
    let cleaned = strip_ansi(chunk);
    let mut events = Vec::new();
    let mut active: Option<String> = active.map(str::to_string);

    for line in cleaned.split(['\n', '\r']) {
        if line.trim().is_empty() {
            continue;
        }

        if let Some(caps) = begin_re().captures(line) {
            let mode = if caps[1].eq_ignore_ascii_case("upgrading") {
                ActiveMode::Upgrading
            } else {
                ActiveMode::Installing
            };
            let name = caps[2].to_string();

            if active.as_deref() != Some(name.as_str()) {
                if let Some(previous) = active.take() {
                    events.push(ParseEvent::Complete(previous));
                }
                events.push(ParseEvent::BeginActive {
                    name: name.clone(),
                    mode,
                });
                active = Some(name);
            }
        }

        if let Some(ref current) = active {
            if download_re().is_match(line) {
                events.push(ParseEvent::SetStatus {
                    name: current.clone(),
                    status: "Downloading...".to_string(),
                    determinate: false,
                });
            }

            let percent = percent_re()
                .captures(line)
                .and_then(|caps| caps[1].parse::<u8>().ok())
                .filter(|p| *p <= 100);
            if let Some(percent) = percent {
                events.push(ParseEvent::SetProgress {
                    name: current.clone(),
                    percent,
                    status: format!("{}%", percent),
                });
            }
        }

        if line.to_lowercase().contains("unable to lock database") {
            events.push(ParseEvent::LockContention);
        }
    }

    if let Some(phase) = phase_hint(&cleaned) {
        events.push(ParseEvent::PhaseHint(phase));
    }

    events
}

// chunk-level keyword scan, first match in priority order wins
fn phase_hint(chunk: &str) -> Option<Phase> {
    let lower = chunk.to_lowercase();
    [
        ("downloading", Phase::Downloading),
        ("checking", Phase::Checking),
        ("resolving", Phase::Resolving),
        ("loading", Phase::Loading),
    ]
    .into_iter()
    .find(|(keyword, _)| lower.contains(keyword))
    .map(|(_, phase)| phase)
}

/// Strip ANSI escape sequences for clean parsing.
/// Handles CSI sequences (ESC[...), OSC (ESC]...), and simple ESC+char sequences.
pub fn strip_ansi(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\x1b' {
            result.push(c);
            continue;
        }

        match chars.next() {
            Some('[') => {
                // CSI: parameters and intermediates, then one final byte in @..~
                while let Some(&next) = chars.peek() {
                    chars.next();
                    if ('@'..='~').contains(&next) {
                        break;
                    }
                }
            }
            Some(']') => {
                // OSC: terminated by BEL or ESC '\'
                while let Some(next) = chars.next() {
                    if next == '\x07' {
                        break;
                    }
                    if next == '\x1b' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            Some('(') | Some(')') | Some('*') | Some('+') => {
                chars.next();
            }
            _ => {}
        }
    }

    result
}

/// Holds back the unterminated tail of streamed output so that [`parse`]
/// only ever sees whole lines.
#[derive(Debug, Clone, Default)]
pub struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns everything up to the last line break.
    pub fn push(&mut self, chunk: &str) -> Option<String> {
        self.pending.push_str(chunk);
        let end = self.pending.rfind(['\n', '\r'])? + 1;
        let rest = self.pending.split_off(end);
        Some(std::mem::replace(&mut self.pending, rest))
    }

    /// Returns whatever is left once the stream has ended.
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

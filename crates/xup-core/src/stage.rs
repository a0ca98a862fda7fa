use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Where an update cycle currently is. Exactly one stage is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Stage {
    #[default]
    Idle,
    Authenticating,
    QueryingOfficial,
    QueryingHelper,
    UpdatingOfficial,
    UpdatingHelper,
    Finalizing,
}

impl Stage {
    pub fn is_idle(&self) -> bool {
        matches!(self, Stage::Idle)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Idle => write!(f, "Idle"),
            Stage::Authenticating => write!(f, "Authenticating"),
            Stage::QueryingOfficial => write!(f, "Checking official packages"),
            Stage::QueryingHelper => write!(f, "Checking AUR packages"),
            Stage::UpdatingOfficial => write!(f, "Updating official packages"),
            Stage::UpdatingHelper => write!(f, "Updating AUR packages"),
            Stage::Finalizing => write!(f, "Finalizing"),
        }
    }
}

/// Exit state of a stage's process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub exit_code: i32,
    pub crashed: bool,
}

impl StageResult {
    pub fn exited(exit_code: i32) -> Self {
        Self {
            exit_code,
            crashed: false,
        }
    }

    pub fn crashed() -> Self {
        Self {
            exit_code: -1,
            crashed: true,
        }
    }

    pub fn is_success(&self) -> bool {
        !self.crashed && self.exit_code == 0
    }

    pub fn failure_cause(&self) -> FailureCause {
        if self.crashed {
            FailureCause::Crashed
        } else {
            FailureCause::ExitCode(self.exit_code)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCause {
    ExitCode(i32),
    Crashed,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::ExitCode(code) => write!(f, "exit code {}", code),
            FailureCause::Crashed => write!(f, "process crashed"),
        }
    }
}

/// Launch-time and I/O failures reported by the stage runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessErrorKind {
    ExecutableMissing,
    PermissionDenied,
    FailedToStart,
    TimedOut,
    ReadError,
    WriteError,
}

impl ProcessErrorKind {
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ProcessErrorKind::ExecutableMissing,
            std::io::ErrorKind::PermissionDenied => ProcessErrorKind::PermissionDenied,
            _ => ProcessErrorKind::FailedToStart,
        }
    }
}

impl fmt::Display for ProcessErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessErrorKind::ExecutableMissing => write!(f, "executable not found"),
            ProcessErrorKind::PermissionDenied => write!(f, "permission denied"),
            ProcessErrorKind::FailedToStart => write!(f, "failed to start"),
            ProcessErrorKind::TimedOut => write!(f, "timed out"),
            ProcessErrorKind::ReadError => write!(f, "read error"),
            ProcessErrorKind::WriteError => write!(f, "write error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Everything a running stage can report back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageEvent {
    Started,
    Output { stream: OutputStream, text: String },
    Finished(StageResult),
    ProcessError(ProcessErrorKind),
    /// Completion of an invocation run with inherited stdio (no streaming).
    DetachedFinished(std::result::Result<i32, String>),
}

/// One external tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    // short name used in status lines, e.g. "/usr/bin/yay" -> "yay"
    pub fn tool_name(&self) -> String {
        let program = std::path::Path::new(&self.program)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.program);
        program.to_string()
    }

    pub fn display_name(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_result() {
        assert!(StageResult::exited(0).is_success());
        assert!(!StageResult::exited(1).is_success());
        assert!(!StageResult::crashed().is_success());
        assert_eq!(StageResult::exited(3).failure_cause(), FailureCause::ExitCode(3));
        assert_eq!(StageResult::crashed().failure_cause(), FailureCause::Crashed);
    }

    #[test]
    fn test_invocation_names() {
        let inv = Invocation::new("/usr/bin/sudo")
            .arg("/usr/bin/pacman")
            .args(["-Syu", "--noconfirm"]);
        assert_eq!(inv.tool_name(), "sudo");
        assert_eq!(
            inv.display_name(),
            "/usr/bin/sudo /usr/bin/pacman -Syu --noconfirm"
        );
        assert_eq!(Invocation::new("checkupdates").display_name(), "checkupdates");
    }

    #[test]
    fn test_process_error_from_io() {
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
        assert_eq!(
            ProcessErrorKind::from_io(&missing),
            ProcessErrorKind::ExecutableMissing
        );
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(
            ProcessErrorKind::from_io(&denied),
            ProcessErrorKind::PermissionDenied
        );
    }
}

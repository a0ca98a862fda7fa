use crate::stage::{FailureCause, ProcessErrorKind};
use thiserror::Error;

// every way an update cycle can go wrong; none of these escape the orchestrator
#[derive(Error, Debug)]
pub enum Error {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthFailure),

    #[error("Failed to check {tool} updates (exit code {exit_code})")]
    QueryFailure { tool: String, exit_code: i32 },

    #[error("{tool} update failed: {cause}")]
    UpdateFailure { tool: String, cause: FailureCause },

    #[error("Failed to launch {tool}: {kind}")]
    LaunchFailure { tool: String, kind: ProcessErrorKind },

    #[error("A stage is already running: {0}")]
    StageBusy(String),

    #[error("Log file unavailable: {0}")]
    LogUnavailable(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why the credential gate refused to open.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("Incorrect password")]
    WrongCredential,

    #[error("Authentication cancelled")]
    Cancelled,

    #[error("Password prompt timed out")]
    PromptTimedOut,

    #[error("Credential check timed out")]
    ProbeTimedOut,

    #[error("Password prompt not available: {0}")]
    PromptUnavailable(String),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::QueryFailure {
            tool: "checkupdates".into(),
            exit_code: 1,
        };
        assert_eq!(
            err.to_string(),
            "Failed to check checkupdates updates (exit code 1)"
        );

        let err = Error::UpdateFailure {
            tool: "pacman".into(),
            cause: FailureCause::Crashed,
        };
        assert_eq!(err.to_string(), "pacman update failed: process crashed");

        let err: Error = AuthFailure::WrongCredential.into();
        assert_eq!(err.to_string(), "Authentication failed: Incorrect password");
    }
}

use crate::config::Config;
use async_trait::async_trait;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};
use xup_core::{CommandOutput, Error, Invocation, PrivilegedOps, ProcessErrorKind, Result};

/// Process-table checks and short root commands through `sudo -n`,
/// relying on the timestamp primed during authentication.
#[derive(Debug, Clone)]
pub struct SudoOps {
    sudo: String,
    pgrep: String,
}

impl SudoOps {
    pub fn new(sudo: impl Into<String>, pgrep: impl Into<String>) -> Self {
        Self {
            sudo: sudo.into(),
            pgrep: pgrep.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.pacman.sudo, "pgrep")
    }
}

async fn capture(invocation: &Invocation, limit: Duration) -> Result<Output> {
    let child = Command::new(&invocation.program)
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::LaunchFailure {
            tool: invocation.tool_name(),
            kind: ProcessErrorKind::from_io(&e),
        })?;

    match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(output) => Ok(output?),
        Err(_) => {
            warn!("{} timed out", invocation.display_name());
            Err(Error::LaunchFailure {
                tool: invocation.tool_name(),
                kind: ProcessErrorKind::TimedOut,
            })
        }
    }
}

#[async_trait]
impl PrivilegedOps for SudoOps {
    async fn is_process_running(&self, names: &[&str]) -> bool {
        for name in names {
            let probe = Invocation::new(&self.pgrep).arg("-x").arg(*name);
            match capture(&probe, Duration::from_secs(5)).await {
                Ok(output) if output.status.success() => {
                    debug!("{} is running", name);
                    return true;
                }
                Ok(_) => {}
                Err(e) => debug!("pgrep failed: {}", e),
            }
        }
        false
    }

    async fn remove_file(&self, path: &Path, timeout: Duration) -> Result<()> {
        let invocation = Invocation::new(&self.sudo)
            .args(["-n", "rm", "-f"])
            .arg(path.to_string_lossy());
        let output = capture(&invocation, timeout).await?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(Error::Other(if stderr.is_empty() {
            format!("Could not remove {}", path.display())
        } else {
            stderr
        }))
    }

    async fn run(&self, invocation: Invocation, timeout: Duration) -> Result<CommandOutput> {
        let output = capture(&invocation, timeout).await?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_captures_output() {
        let ops = SudoOps::new("sudo", "pgrep");
        let output = ops
            .run(
                Invocation::new("sh").args(["-c", "echo freed; echo warn >&2"]),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.stdout, "freed\n");
        assert_eq!(output.stderr, "warn\n");
    }

    #[tokio::test]
    async fn test_run_timeout_and_missing_tool() {
        let ops = SudoOps::new("sudo", "pgrep");
        match ops
            .run(
                Invocation::new("sh").args(["-c", "exec sleep 5"]),
                Duration::from_millis(100),
            )
            .await
        {
            Err(Error::LaunchFailure { kind, .. }) => assert_eq!(kind, ProcessErrorKind::TimedOut),
            other => panic!("unexpected {:?}", other),
        }

        match ops
            .run(Invocation::new("/nonexistent/paccache"), Duration::from_secs(1))
            .await
        {
            Err(Error::LaunchFailure { tool, kind }) => {
                assert_eq!(tool, "paccache");
                assert_eq!(kind, ProcessErrorKind::ExecutableMissing);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remove_file_reports_failure() {
        // "false" stands in for a sudo that refuses
        let ops = SudoOps::new("false", "pgrep");
        let err = ops
            .remove_file(Path::new("/var/lib/pacman/db.lck"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("db.lck"));
    }
}

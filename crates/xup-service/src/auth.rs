//! Password prompt plus sudo credential caching.

use crate::config::Config;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use xup_core::{AuthFailure, Authenticator, Invocation};

/// Asks for the password with a graphical prompt and primes sudo's
/// timestamp with `sudo -S -v`, so later `sudo` calls run without asking.
pub struct SudoAuthenticator {
    prompt: Invocation,
    probe: Invocation,
    prompt_timeout: Duration,
    probe_timeout: Duration,
}

impl SudoAuthenticator {
    pub fn new(
        prompt: Invocation,
        probe: Invocation,
        prompt_timeout: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            prompt,
            probe,
            prompt_timeout,
            probe_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let prompt = Invocation::new(&config.auth.prompt)
            .arg("--password")
            .arg(format!("--title={}", config.auth.title));
        let probe = Invocation::new(&config.pacman.sudo).args(["-S", "-v"]);
        Self::new(
            prompt,
            probe,
            config.timeouts.prompt(),
            config.timeouts.probe(),
        )
    }

    async fn read_password(&self) -> Result<String, AuthFailure> {
        let child = Command::new(&self.prompt.program)
            .args(&self.prompt.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AuthFailure::PromptUnavailable(self.prompt.tool_name()));
            }
            Err(e) => return Err(AuthFailure::Other(e.to_string())),
        };

        // dropping the future on timeout kills the prompt
        let output = match timeout(self.prompt_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(AuthFailure::Other(e.to_string())),
            Err(_) => {
                warn!("Password prompt timed out");
                return Err(AuthFailure::PromptTimedOut);
            }
        };

        if !output.status.success() {
            return Err(AuthFailure::Cancelled);
        }

        let password = String::from_utf8_lossy(&output.stdout)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        if password.is_empty() {
            return Err(AuthFailure::Cancelled);
        }

        Ok(password)
    }

    async fn validate(&self, password: &str) -> Result<(), AuthFailure> {
        let mut child = Command::new(&self.probe.program)
            .args(&self.probe.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AuthFailure::Other(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            let mut line = password.as_bytes().to_vec();
            line.push(b'\n');
            // sudo may exit before reading on a cached timestamp; that is fine
            if let Err(e) = stdin.write_all(&line).await {
                debug!("Credential write ended early: {}", e);
            }
        }

        match timeout(self.probe_timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(_)) => Err(AuthFailure::WrongCredential),
            Ok(Err(e)) => Err(AuthFailure::Other(e.to_string())),
            Err(_) => {
                let _ = child.kill().await;
                warn!("Credential check timed out");
                Err(AuthFailure::ProbeTimedOut)
            }
        }
    }
}

#[async_trait]
impl Authenticator for SudoAuthenticator {
    async fn authenticate(&self) -> Result<(), AuthFailure> {
        let password = self.read_password().await?;
        self.validate(&password).await?;
        info!("Authenticated, sudo credentials cached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Invocation {
        Invocation::new("sh").args(["-c", script])
    }

    fn gate(prompt: Invocation, probe: Invocation) -> SudoAuthenticator {
        SudoAuthenticator::new(
            prompt,
            probe,
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
    }

    const CHECK_SECRET: &str = r#"read pw; [ "$pw" = "hunter2" ]"#;

    #[tokio::test]
    async fn test_correct_password() {
        let auth = gate(sh("echo hunter2"), sh(CHECK_SECRET));
        assert_eq!(auth.authenticate().await, Ok(()));
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let auth = gate(sh("echo letmein"), sh(CHECK_SECRET));
        assert_eq!(auth.authenticate().await, Err(AuthFailure::WrongCredential));
    }

    #[tokio::test]
    async fn test_cancelled_prompt() {
        let auth = gate(sh("exit 1"), sh(CHECK_SECRET));
        assert_eq!(auth.authenticate().await, Err(AuthFailure::Cancelled));

        let auth = gate(sh("printf ''"), sh(CHECK_SECRET));
        assert_eq!(auth.authenticate().await, Err(AuthFailure::Cancelled));
    }

    #[tokio::test]
    async fn test_missing_prompt_tool() {
        let auth = gate(Invocation::new("/nonexistent/zenity"), sh(CHECK_SECRET));
        assert_eq!(
            auth.authenticate().await,
            Err(AuthFailure::PromptUnavailable("zenity".into()))
        );
    }

    #[tokio::test]
    async fn test_prompt_timeout() {
        let auth = SudoAuthenticator::new(
            sh("sleep 5"),
            sh(CHECK_SECRET),
            Duration::from_millis(100),
            Duration::from_secs(5),
        );
        assert_eq!(auth.authenticate().await, Err(AuthFailure::PromptTimedOut));
    }

    #[tokio::test]
    async fn test_probe_timeout() {
        let auth = SudoAuthenticator::new(
            sh("echo hunter2"),
            sh("sleep 5"),
            Duration::from_secs(5),
            Duration::from_millis(100),
        );
        assert_eq!(auth.authenticate().await, Err(AuthFailure::ProbeTimedOut));
    }

    #[test]
    fn test_from_config_invocations() {
        let auth = SudoAuthenticator::from_config(&Config::default());
        assert_eq!(auth.prompt.program, "zenity");
        assert_eq!(auth.prompt.args[0], "--password");
        assert!(auth.prompt.args[1].starts_with("--title="));
        assert_eq!(auth.probe.display_name(), "/usr/bin/sudo -S -v");
    }
}

//! AUR helper backend.

use crate::terminal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use xup_core::Invocation;

const KNOWN_HELPERS: [&str; 2] = ["yay", "paru"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperConfig {
    /// Helper executable. Both yay and paru accept `-Qua` and `-Sua`.
    pub program: String,
    /// Terminal the interactive helper update runs in.
    pub terminal: String,
    /// Overrides the terminal's exec flag; empty string means none.
    pub terminal_exec_flag: Option<String>,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            program: "/usr/bin/yay".to_string(),
            terminal: "foot".to_string(),
            terminal_exec_flag: None,
        }
    }
}

impl HelperConfig {
    /// Lists foreign packages with pending updates.
    pub fn query_invocation(&self) -> Invocation {
        Invocation::new(&self.program).arg("-Qua")
    }

    /// Interactive helper upgrade wrapped in the configured terminal.
    pub fn update_invocation(&self) -> Invocation {
        let update = Invocation::new(&self.program).arg("-Sua");
        terminal::wrap(
            &self.terminal,
            self.terminal_exec_flag.as_deref(),
            &update,
        )
    }

    pub fn helper_name(&self) -> String {
        Invocation::new(&self.program).tool_name()
    }

    /// Falls back to another known helper on PATH when the configured one is missing.
    pub fn resolve(mut self) -> Self {
        if Path::new(&self.program).exists() || find_in_path(&self.program).is_some() {
            return self;
        }

        for candidate in KNOWN_HELPERS {
            if let Some(path) = find_in_path(candidate) {
                info!(
                    "AUR helper {} not found, using {}",
                    self.program,
                    path.display()
                );
                self.program = path.to_string_lossy().into_owned();
                return self;
            }
        }

        debug!("No AUR helper found on PATH");
        self
    }
}

fn find_in_path(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        return None;
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_invocations() {
        let config = HelperConfig::default();
        assert_eq!(config.query_invocation().display_name(), "/usr/bin/yay -Qua");
        assert_eq!(
            config.update_invocation().display_name(),
            "foot -e /usr/bin/yay -Sua"
        );
        assert_eq!(config.helper_name(), "yay");
    }

    #[test]
    fn test_explicit_empty_flag() {
        let config = HelperConfig {
            program: "paru".into(),
            terminal: "mystery-term".into(),
            terminal_exec_flag: Some(String::new()),
        };
        assert_eq!(
            config.update_invocation().display_name(),
            "mystery-term paru -Sua"
        );
    }

    #[test]
    fn test_resolve_keeps_existing_program() {
        let dir = tempfile::tempdir().unwrap();
        let helper = dir.path().join("my-helper");
        std::fs::write(&helper, "").unwrap();

        let config = HelperConfig {
            program: helper.to_string_lossy().into_owned(),
            ..Default::default()
        };
        assert_eq!(config.clone().resolve(), config);
    }
}

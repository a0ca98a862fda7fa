use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use xup_core::Invocation;

/// Paths of the pacman-side tools and files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacmanConfig {
    pub checkupdates: String,
    pub pacman: String,
    pub sudo: String,
    pub pkexec: String,
    pub paccache: String,
    pub log_file: PathBuf,
    pub lock_file: PathBuf,
    pub cache_dirs: Vec<String>,
    /// Versions of each package paccache keeps.
    pub keep_versions: u32,
}

impl Default for PacmanConfig {
    fn default() -> Self {
        Self {
            checkupdates: "/usr/bin/checkupdates".to_string(),
            pacman: "/usr/bin/pacman".to_string(),
            sudo: "/usr/bin/sudo".to_string(),
            pkexec: "/usr/bin/pkexec".to_string(),
            paccache: "paccache".to_string(),
            log_file: PathBuf::from("/var/log/pacman.log"),
            lock_file: PathBuf::from(crate::lock::DB_LOCK),
            cache_dirs: vec!["/var/cache/pacman/pkg".to_string()],
            keep_versions: 1,
        }
    }
}

/// checkupdates exits with 2 when nothing is pending.
pub const CHECKUPDATES_NO_UPDATES: i32 = 2;

impl PacmanConfig {
    pub fn query_invocation(&self) -> Invocation {
        Invocation::new(&self.checkupdates)
    }

    pub fn upgrade_invocation(&self) -> Invocation {
        Invocation::new(&self.sudo)
            .arg(&self.pacman)
            .args(["-Syu", "--noconfirm"])
    }

    pub fn clean_cache_invocation(&self) -> Invocation {
        Invocation::new(&self.pkexec)
            .arg(&self.paccache)
            .arg(format!("-rk{}", self.keep_versions))
    }

    /// Maps the official query's exit code onto "listing is valid".
    pub fn query_succeeded(exit_code: i32) -> bool {
        exit_code == 0 || exit_code == CHECKUPDATES_NO_UPDATES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_invocations() {
        let config = PacmanConfig::default();
        assert_eq!(
            config.query_invocation().display_name(),
            "/usr/bin/checkupdates"
        );
        assert_eq!(
            config.upgrade_invocation().display_name(),
            "/usr/bin/sudo /usr/bin/pacman -Syu --noconfirm"
        );
        assert_eq!(
            config.clean_cache_invocation().display_name(),
            "/usr/bin/pkexec paccache -rk1"
        );
    }

    #[test]
    fn test_query_exit_codes() {
        assert!(PacmanConfig::query_succeeded(0));
        assert!(PacmanConfig::query_succeeded(2));
        assert!(!PacmanConfig::query_succeeded(1));
    }
}

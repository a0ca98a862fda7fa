use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use xup_core::PrivilegedOps;

pub const DB_LOCK: &str = "/var/lib/pacman/db.lck";

/// Processes that legitimately hold the database lock.
pub const LOCK_HOLDERS: [&str; 2] = ["pacman", "checkupdates"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    Cleared,
    NotPresent,
    StillHeld(String),
}

/// Removes a stale database lock if no lock holder is running.
pub async fn reconcile(
    lock_path: &Path,
    ops: &dyn PrivilegedOps,
    remove_timeout: Duration,
) -> LockState {
    if !lock_path.exists() {
        return LockState::NotPresent;
    }

    if ops.is_process_running(&LOCK_HOLDERS).await {
        info!("{:?} is held by a running package manager", lock_path);
        return LockState::StillHeld("pacman is still running".to_string());
    }

    match ops.remove_file(lock_path, remove_timeout).await {
        Ok(()) => {
            info!("Removed stale lock {:?}", lock_path);
            LockState::Cleared
        }
        Err(e) => {
            warn!("Failed to remove lock {:?}: {}", lock_path, e);
            LockState::StillHeld(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use xup_core::{CommandOutput, Error, Invocation, Result};

    #[derive(Default)]
    struct CountingOps {
        running: bool,
        fail_remove: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PrivilegedOps for CountingOps {
        async fn is_process_running(&self, _names: &[&str]) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.running
        }

        async fn remove_file(&self, path: &Path, _timeout: Duration) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_remove {
                return Err(Error::Other("sudo: a password is required".into()));
            }
            std::fs::remove_file(path)?;
            Ok(())
        }

        async fn run(&self, _invocation: Invocation, _timeout: Duration) -> Result<CommandOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CommandOutput::default())
        }
    }

    #[tokio::test]
    async fn test_missing_lock_makes_no_privileged_calls() {
        let dir = tempfile::tempdir().unwrap();
        let ops = CountingOps::default();
        let state = reconcile(&dir.path().join("db.lck"), &ops, Duration::from_secs(5)).await;
        assert_eq!(state, LockState::NotPresent);
        assert_eq!(ops.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_lock_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join("db.lck");
        std::fs::write(&lock, "").unwrap();

        let ops = CountingOps::default();
        let state = reconcile(&lock, &ops, Duration::from_secs(5)).await;
        assert_eq!(state, LockState::Cleared);
        assert!(!lock.exists());
    }

    #[tokio::test]
    async fn test_lock_held_by_running_pacman() {
        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join("db.lck");
        std::fs::write(&lock, "").unwrap();

        let ops = CountingOps {
            running: true,
            ..Default::default()
        };
        let state = reconcile(&lock, &ops, Duration::from_secs(5)).await;
        assert_eq!(state, LockState::StillHeld("pacman is still running".into()));
        assert!(lock.exists());
    }

    #[tokio::test]
    async fn test_failed_removal_reports_reason() {
        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join("db.lck");
        std::fs::write(&lock, "").unwrap();

        let ops = CountingOps {
            fail_remove: true,
            ..Default::default()
        };
        match reconcile(&lock, &ops, Duration::from_secs(5)).await {
            LockState::StillHeld(reason) => assert!(reason.contains("password is required")),
            other => panic!("unexpected state {:?}", other),
        }
    }
}

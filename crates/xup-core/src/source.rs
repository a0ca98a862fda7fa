//! Collaborator traits the orchestrator drives.

use crate::error::{AuthFailure, Result};
use crate::stage::{Invocation, StageEvent};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Callback type for stage events. Implementations may call it from any task.
pub type StageCallback = Arc<dyn Fn(StageEvent) + Send + Sync>;

/// One-shot credential gate (prompt, validate, cache).
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Prompts for a credential and primes the privilege cache with it.
    async fn authenticate(&self) -> std::result::Result<(), AuthFailure>;
}

/// Owns at most one external tool invocation at a time.
pub trait StageLauncher: Send + Sync {
    /// Starts a streamed invocation. Output, start and exit are reported through `events`.
    fn start(&self, invocation: Invocation, events: StageCallback) -> Result<()>;

    /// Runs an invocation with inherited stdio, bounded by `timeout`.
    /// Completion is reported as [`StageEvent::DetachedFinished`].
    fn run_detached(
        &self,
        invocation: Invocation,
        timeout: Duration,
        events: StageCallback,
    ) -> Result<()>;

    /// Returns true while an invocation is running.
    fn is_busy(&self) -> bool;
}

/// Captured result of a short privileged helper command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Small privileged or process-table operations with bounded waits.
#[async_trait]
pub trait PrivilegedOps: Send + Sync {
    /// Checks whether any process with one of these exact names is running.
    async fn is_process_running(&self, names: &[&str]) -> bool;

    /// Removes a root-owned file using the cached credential.
    async fn remove_file(&self, path: &Path, timeout: Duration) -> Result<()>;

    /// Runs a command through the privilege wrapper and captures its output.
    async fn run(&self, invocation: Invocation, timeout: Duration) -> Result<CommandOutput>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Normal,
    Critical,
}

/// Fire-and-forget desktop notifications. Never fails the caller.
pub trait Notifier: Send + Sync {
    fn notify(&self, urgency: Urgency, body: &str);
}

use chrono::{DateTime, Local};
use xup_core::{PackageRef, Stage};
use xup_pacman::LineBuffer;

/// One authenticate-to-update cycle, owned by the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub authenticated: bool,
    pub stage: Stage,
    pub pending_official: Vec<PackageRef>,
    pub pending_helper: Vec<PackageRef>,
    pub start_timestamp: Option<DateTime<Local>>,

    // bookkeeping for the stage in flight
    pub(crate) active_package: Option<String>,
    pub(crate) query_buffer: String,
    pub(crate) update_output: LineBuffer,
    pub(crate) ignored: Vec<String>,
    pub(crate) current_tool: String,
    pub(crate) awaiting_lock: bool,
    pub(crate) lock_contention: bool,
    pub(crate) lock_retries_left: u32,
    /// A cache clean is running outside the stage sequence.
    pub(crate) maintenance: bool,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// The orchestrator is free to accept a new command.
    pub fn is_free(&self) -> bool {
        self.stage.is_idle() && !self.maintenance
    }

    pub fn can_run_updates(&self) -> bool {
        self.authenticated && self.is_free()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_official.len() + self.pending_helper.len()
    }

    /// Drops per-stage bookkeeping after a run ends, however it ended.
    pub(crate) fn end_run(&mut self) {
        self.authenticated = false;
        self.active_package = None;
        self.query_buffer.clear();
        self.update_output.clear();
        self.awaiting_lock = false;
        self.lock_contention = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_updates_gate() {
        let mut session = Session::new();
        assert!(!session.can_run_updates());

        session.authenticated = true;
        assert!(session.can_run_updates());

        session.stage = Stage::QueryingHelper;
        assert!(!session.can_run_updates());

        session.stage = Stage::Idle;
        session.maintenance = true;
        assert!(!session.can_run_updates());
    }

    #[test]
    fn test_end_run_clears_auth() {
        let mut session = Session {
            authenticated: true,
            active_package: Some("foo".into()),
            ..Default::default()
        };
        session.end_run();
        assert!(!session.authenticated);
        assert!(session.active_package.is_none());
    }
}

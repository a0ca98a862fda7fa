//! Orchestration and process plumbing for xUpdate.

pub mod auth;
pub mod config;
pub mod notify;
pub mod orchestrator;
pub mod privileged;
pub mod progress;
pub mod runner;
pub mod state;
pub mod store;

pub use config::Config;
pub use orchestrator::{
    Collaborators, Command, Inbound, Orchestrator, OrchestratorHandle, Outcome, ProgressMessage,
};
pub use progress::{PackageProgress, ProgressState, ProgressTable};
pub use state::Session;
pub use store::{HistoryEntry, HistoryStore, IgnoredStore};

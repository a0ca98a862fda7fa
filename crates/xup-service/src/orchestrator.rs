//! The update cycle state machine.
//!
//! Everything that waits (authentication, processes, lock cleanup, file
//! I/O, cache cleaning) runs on its own task and posts an [`Inbound`]
//! message back. The orchestrator itself only ever runs on one task, so
//! session and progress state need no locking.

use crate::auth::SudoAuthenticator;
use crate::config::Config;
use crate::notify::DesktopNotifier;
use crate::privileged::SudoOps;
use crate::progress::{format_bytes, PackageProgress, ProgressTable};
use crate::runner::ProcessStageRunner;
use crate::state::Session;
use crate::store::{filter_ignored, HistoryEntry, HistoryStore, IgnoredStore, RunKind};
use chrono::Local;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use xup_core::{
    parse_listing, AuthFailure, Authenticator, Error, FailureCause, Invocation, Notifier,
    OutputStream, PackageRef, PrivilegedOps, Result, Stage, StageCallback, StageEvent,
    StageLauncher, StageResult, UpdateSource, Urgency,
};
use xup_pacman::{log, reconcile, CacheManager, LockState, PacmanConfig, ParseEvent, Phase};

const BUSY: &str = "An operation is already in progress";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    CheckForUpdates,
    RunUpdates,
    CleanCache,
    Shutdown,
}

/// Everything that can arrive on the orchestrator's queue.
#[derive(Debug, Clone)]
pub enum Inbound {
    Command(Command),
    Auth(std::result::Result<(), AuthFailure>),
    IgnoredLoaded(Vec<String>),
    Stage { stage: Stage, event: StageEvent },
    LockSettled(LockState),
    SessionLog(String),
    CacheCleaned(std::result::Result<String, String>),
}

/// How a command ended. Every command produces exactly one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    UpToDate,
    UpdatesAvailable {
        official: Vec<PackageRef>,
        helper: Vec<PackageRef>,
    },
    Updated {
        packages: usize,
    },
    CacheCleaned {
        message: String,
    },
    Failed {
        message: String,
    },
    Rejected {
        message: String,
    },
}

#[derive(Debug, Clone)]
pub enum ProgressMessage {
    StageChanged(Stage),
    Status(String),
    Phase(Phase),
    Package(PackageProgress),
    Log(String),
    Pending {
        official: Vec<PackageRef>,
        helper: Vec<PackageRef>,
    },
    Finished(Outcome),
}

/// Cheap cloneable sender for commands.
#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl OrchestratorHandle {
    pub fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(Inbound::Command(command))
            .map_err(|_| Error::Other("Orchestrator has shut down".into()))
    }

    pub fn check_for_updates(&self) -> Result<()> {
        self.send(Command::CheckForUpdates)
    }

    pub fn run_updates(&self) -> Result<()> {
        self.send(Command::RunUpdates)
    }

    pub fn clean_cache(&self) -> Result<()> {
        self.send(Command::CleanCache)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }
}

/// The outside world, as the orchestrator sees it.
#[derive(Clone)]
pub struct Collaborators {
    pub auth: Arc<dyn Authenticator>,
    pub launcher: Arc<dyn StageLauncher>,
    pub privileged: Arc<dyn PrivilegedOps>,
    pub notifier: Arc<dyn Notifier>,
    pub history: HistoryStore,
    pub ignored: IgnoredStore,
}

impl Collaborators {
    /// Real processes, sudo and notify-send.
    pub fn system(config: &Config) -> Self {
        let data_dir = config.data_dir();
        Self {
            auth: Arc::new(SudoAuthenticator::from_config(config)),
            launcher: Arc::new(ProcessStageRunner::new()),
            privileged: Arc::new(SudoOps::from_config(config)),
            notifier: Arc::new(DesktopNotifier::default()),
            history: HistoryStore::in_dir(&data_dir),
            ignored: IgnoredStore::in_dir(&data_dir),
        }
    }
}

pub struct Orchestrator {
    config: Config,
    collab: Collaborators,
    session: Session,
    progress: ProgressTable,
    log: String,
    tx: mpsc::UnboundedSender<Inbound>,
    progress_tx: broadcast::Sender<ProgressMessage>,
    shutdown: bool,
}

impl Orchestrator {
    pub fn new(config: Config, collab: Collaborators) -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (progress_tx, _) = broadcast::channel(256);

        let orchestrator = Self {
            config,
            collab,
            session: Session::new(),
            progress: ProgressTable::new(),
            log: String::new(),
            tx,
            progress_tx,
            shutdown: false,
        };
        (orchestrator, rx)
    }

    pub fn handle(&self) -> OrchestratorHandle {
        OrchestratorHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressMessage> {
        self.progress_tx.subscribe()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn progress(&self) -> &ProgressTable {
        &self.progress
    }

    pub fn log(&self) -> &str {
        &self.log
    }

    /// Drains the queue until `Shutdown` arrives.
    pub async fn run(&mut self, mut inbox: mpsc::UnboundedReceiver<Inbound>) {
        info!("Orchestrator started");
        while let Some(message) = inbox.recv().await {
            self.dispatch(message);
            if self.shutdown {
                break;
            }
        }
        info!("Orchestrator stopped");
    }

    pub fn dispatch(&mut self, message: Inbound) {
        match message {
            Inbound::Command(command) => self.on_command(command),
            Inbound::Auth(result) => {
                if self.session.stage != Stage::Authenticating {
                    debug!("Dropping late authentication result");
                    return;
                }
                self.on_auth(result);
            }
            Inbound::IgnoredLoaded(names) => {
                if self.session.stage != Stage::Authenticating {
                    debug!("Dropping late ignore list");
                    return;
                }
                self.session.ignored = names;
            }
            Inbound::Stage { stage, event } => {
                if stage != self.session.stage {
                    debug!("Dropping {:?} from {} while in {}", event, stage, self.session.stage);
                    return;
                }
                self.on_stage_event(stage, event);
            }
            Inbound::LockSettled(state) => {
                if self.session.stage != Stage::UpdatingOfficial || !self.session.awaiting_lock {
                    debug!("Dropping stale lock result {:?}", state);
                    return;
                }
                self.on_lock_settled(state);
            }
            Inbound::SessionLog(text) => {
                if self.session.stage != Stage::Finalizing {
                    debug!("Dropping session log outside finalize");
                    return;
                }
                self.on_session_log(text);
            }
            Inbound::CacheCleaned(result) => self.on_cache_cleaned(result),
        }
    }

    fn broadcast(&self, message: ProgressMessage) {
        let _ = self.progress_tx.send(message);
    }

    fn set_stage(&mut self, stage: Stage) {
        if self.session.stage != stage {
            info!("Stage: {} -> {}", self.session.stage, stage);
        }
        self.session.stage = stage;
        self.broadcast(ProgressMessage::StageChanged(stage));
    }

    fn status(&self, text: impl Into<String>) {
        let text = text.into();
        info!("{}", text);
        self.broadcast(ProgressMessage::Status(text));
    }

    fn append_log(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.log.push_str(&text);
        self.broadcast(ProgressMessage::Log(text));
    }

    fn publish_row(&self, row: PackageProgress) {
        self.broadcast(ProgressMessage::Package(row));
    }

    fn notify(&self, urgency: Urgency, body: &str) {
        if self.config.notifications {
            self.collab.notifier.notify(urgency, body);
        }
    }

    fn finish(&self, outcome: Outcome) {
        self.broadcast(ProgressMessage::Finished(outcome));
    }

    fn reject(&self, message: &str) {
        warn!("Command rejected: {}", message);
        self.finish(Outcome::Rejected {
            message: message.to_string(),
        });
    }

    fn stage_callback(&self, stage: Stage) -> StageCallback {
        let tx = self.tx.clone();
        Arc::new(move |event| {
            let _ = tx.send(Inbound::Stage { stage, event });
        })
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::CheckForUpdates => self.check_for_updates(),
            Command::RunUpdates => self.run_updates(),
            Command::CleanCache => self.clean_cache(),
            Command::Shutdown => {
                info!("Shutdown requested");
                self.shutdown = true;
            }
        }
    }

    fn check_for_updates(&mut self) {
        if !self.session.is_free() {
            self.reject(BUSY);
            return;
        }

        self.session.authenticated = false;
        self.session.ignored.clear();
        self.set_stage(Stage::Authenticating);
        self.status("Waiting for authentication...");

        let auth = self.collab.auth.clone();
        let ignored = self.collab.ignored.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            match tokio::task::spawn_blocking(move || ignored.load()).await {
                Ok(names) => {
                    let _ = tx.send(Inbound::IgnoredLoaded(names));
                }
                Err(e) => warn!("Could not load ignored packages: {}", e),
            }
            let result = auth.authenticate().await;
            let _ = tx.send(Inbound::Auth(result));
        });
    }

    fn on_auth(&mut self, result: std::result::Result<(), AuthFailure>) {
        if let Err(reason) = result {
            self.fail(Error::Auth(reason));
            return;
        }

        self.session.authenticated = true;
        self.session.pending_official.clear();
        self.session.pending_helper.clear();
        self.session.query_buffer.clear();
        self.progress.clear();

        self.set_stage(Stage::QueryingOfficial);
        self.status("Checking official repositories...");
        let invocation = self.config.pacman.query_invocation();
        self.launch(Stage::QueryingOfficial, invocation);
    }

    fn launch(&mut self, stage: Stage, invocation: Invocation) {
        self.session.current_tool = invocation.tool_name();
        let callback = self.stage_callback(stage);
        if let Err(e) = self.collab.launcher.start(invocation, callback) {
            self.fail(e);
        }
    }

    fn on_stage_event(&mut self, stage: Stage, event: StageEvent) {
        match event {
            StageEvent::Started => {
                debug!("{} started", self.session.current_tool);
            }
            StageEvent::Output { stream, text } => match stage {
                Stage::QueryingOfficial | Stage::QueryingHelper => {
                    self.on_query_output(stream, &text)
                }
                Stage::UpdatingOfficial => self.on_update_output(stream, &text),
                _ => {}
            },
            StageEvent::Finished(result) => match stage {
                Stage::QueryingOfficial => self.on_official_query_done(result),
                Stage::QueryingHelper => self.on_helper_query_done(result),
                Stage::UpdatingOfficial => self.on_official_update_done(result),
                _ => debug!("Unexpected exit during {}", stage),
            },
            StageEvent::ProcessError(kind) => {
                let tool = self.session.current_tool.clone();
                self.fail(Error::LaunchFailure { tool, kind });
            }
            StageEvent::DetachedFinished(result) => {
                if stage == Stage::UpdatingHelper {
                    self.on_helper_update_done(result);
                }
            }
        }
    }

    fn on_query_output(&mut self, stream: OutputStream, text: &str) {
        match stream {
            OutputStream::Stdout => self.session.query_buffer.push_str(text),
            OutputStream::Stderr => {
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    debug!("{}: {}", self.session.current_tool, line);
                }
            }
        }
    }

    fn on_official_query_done(&mut self, result: StageResult) {
        if result.crashed || !PacmanConfig::query_succeeded(result.exit_code) {
            self.fail(Error::QueryFailure {
                tool: UpdateSource::Official.to_string(),
                exit_code: result.exit_code,
            });
            return;
        }

        let listing = std::mem::take(&mut self.session.query_buffer);
        self.session.pending_official = parse_listing(&listing);
        debug!(
            "{} official package(s) pending",
            self.session.pending_official.len()
        );

        self.set_stage(Stage::QueryingHelper);
        self.status("Checking AUR packages...");
        let invocation = self.config.helper.query_invocation();
        self.launch(Stage::QueryingHelper, invocation);
    }

    fn on_helper_query_done(&mut self, result: StageResult) {
        if !result.is_success() {
            self.fail(Error::QueryFailure {
                tool: UpdateSource::Helper.to_string(),
                exit_code: result.exit_code,
            });
            return;
        }

        let listing = std::mem::take(&mut self.session.query_buffer);
        let ignored = std::mem::take(&mut self.session.ignored);
        let official = std::mem::take(&mut self.session.pending_official);
        self.session.pending_official = filter_ignored(official, &ignored);
        self.session.pending_helper = filter_ignored(parse_listing(&listing), &ignored);

        let official = self.session.pending_official.clone();
        let helper = self.session.pending_helper.clone();
        self.broadcast(ProgressMessage::Pending {
            official: official.clone(),
            helper: helper.clone(),
        });

        self.set_stage(Stage::Idle);
        let count = self.session.pending_count();
        if count == 0 {
            self.session.authenticated = false;
            self.status("System is up to date.");
            self.notify(Urgency::Normal, "System is up to date!");
            self.finish(Outcome::UpToDate);
        } else {
            self.status(format!("{} update(s) pending. Ready to update!", count));
            self.notify(Urgency::Normal, &format!("{} updates available!", count));
            self.finish(Outcome::UpdatesAvailable { official, helper });
        }
    }

    fn run_updates(&mut self) {
        if !self.session.authenticated {
            self.reject("Not authenticated. Check for updates first.");
            return;
        }
        if !self.session.can_run_updates() {
            self.reject(BUSY);
            return;
        }

        self.progress.clear();
        let official = self.session.pending_official.clone();
        for row in self.progress.populate(&official) {
            self.publish_row(row);
        }

        let started = Local::now();
        self.session.start_timestamp = Some(started);
        self.session.lock_retries_left = self.config.lock_retries;
        self.session.lock_contention = false;
        self.session.active_package = None;
        self.session.update_output.clear();

        self.set_stage(Stage::UpdatingOfficial);
        self.append_log(format!(
            "[{}] Starting system update\n",
            started.format("%H:%M:%S")
        ));
        self.status("Preparing system update...");
        self.notify(Urgency::Normal, "Starting system update...");
        self.settle_lock();
    }

    // reconcile the db lock off-queue, then wait out the grace delay
    fn settle_lock(&mut self) {
        self.session.awaiting_lock = true;

        let privileged = self.collab.privileged.clone();
        let lock_file = self.config.pacman.lock_file.clone();
        let remove_timeout = self.config.timeouts.lock_remove();
        let grace = self.config.timeouts.lock_grace();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let state = reconcile(&lock_file, privileged.as_ref(), remove_timeout).await;
            tokio::time::sleep(grace).await;
            let _ = tx.send(Inbound::LockSettled(state));
        });
    }

    fn on_lock_settled(&mut self, state: LockState) {
        self.session.awaiting_lock = false;

        match state {
            LockState::Cleared => self.append_log("Removed stale pacman database lock.\n"),
            LockState::NotPresent => {}
            LockState::StillHeld(reason) => {
                warn!("Database lock still held: {}", reason);
                self.append_log(format!("Warning: database lock still held ({})\n", reason));
            }
        }

        self.status("Updating official packages...");
        let invocation = self.config.pacman.upgrade_invocation();
        self.launch(Stage::UpdatingOfficial, invocation);
    }

    fn on_update_output(&mut self, stream: OutputStream, text: &str) {
        match stream {
            OutputStream::Stderr => {
                let stamp = Local::now().format("%H:%M:%S").to_string();
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    self.append_log(format!("[{}] ERROR: {}\n", stamp, line));

                    let lower = line.to_lowercase();
                    if lower.contains("authentication failed") || lower.contains("not authorized") {
                        self.status("Authentication failed. Update cancelled.");
                    }
                }

                // pacman reports lock trouble on stderr
                if xup_pacman::parse(text, None)
                    .iter()
                    .any(|e| *e == ParseEvent::LockContention)
                {
                    self.session.lock_contention = true;
                }
            }
            OutputStream::Stdout => {
                self.append_log(xup_pacman::strip_ansi(text));
                if let Some(lines) = self.session.update_output.push(text) {
                    self.apply_update_output(&lines);
                }
            }
        }
    }

    fn apply_update_output(&mut self, text: &str) {
        let events = xup_pacman::parse(text, self.session.active_package.as_deref());
        for event in events {
            match &event {
                ParseEvent::BeginActive { name, mode } => {
                    self.session.active_package = Some(name.clone());
                    self.status(format!("{} {}...", mode, name));
                }
                ParseEvent::LockContention => self.session.lock_contention = true,
                ParseEvent::PhaseHint(phase) => {
                    self.broadcast(ProgressMessage::Phase(*phase));
                }
                _ => {}
            }

            if let Some(row) = self.progress.apply(&event) {
                self.publish_row(row);
            }
        }
    }

    fn on_official_update_done(&mut self, result: StageResult) {
        if let Some(rest) = self.session.update_output.flush() {
            self.apply_update_output(&rest);
        }

        if result.is_success() {
            if let Some(name) = self.session.active_package.take() {
                let row = self.progress.complete(&name);
                self.publish_row(row);
            }
            self.append_log("Official packages updated.\n");

            if self.session.pending_helper.is_empty() {
                self.finalize();
            } else {
                self.start_helper_update();
            }
            return;
        }

        if self.session.lock_contention && self.session.lock_retries_left > 0 {
            self.session.lock_retries_left -= 1;
            self.session.lock_contention = false;
            self.session.active_package = None;
            warn!("pacman could not lock its database, retrying");
            self.append_log("Database was locked, retrying the update...\n");
            self.status("Waiting for the package database lock...");
            self.settle_lock();
            return;
        }

        let cause = result.failure_cause();
        self.fail(Error::UpdateFailure {
            tool: "pacman".to_string(),
            cause,
        });
    }

    fn start_helper_update(&mut self) {
        let helper = self.session.pending_helper.clone();
        for row in self.progress.populate(&helper) {
            self.publish_row(row);
        }

        self.set_stage(Stage::UpdatingHelper);
        self.status("Updating AUR packages in a terminal...");

        let invocation = self.config.helper.update_invocation();
        self.session.current_tool = self.config.helper.helper_name();
        let callback = self.stage_callback(Stage::UpdatingHelper);
        let limit = self.config.timeouts.helper_update();
        if let Err(e) = self.collab.launcher.run_detached(invocation, limit, callback) {
            self.fail(e);
        }
    }

    fn on_helper_update_done(&mut self, result: std::result::Result<i32, String>) {
        match result {
            Ok(0) => {
                let names: Vec<String> = self
                    .session
                    .pending_helper
                    .iter()
                    .map(|p| p.name.clone())
                    .collect();
                for name in names {
                    let row = self.progress.complete(&name);
                    self.publish_row(row);
                }
                self.append_log("AUR packages updated.\n");
                self.finalize();
            }
            Ok(code) => {
                let tool = self.session.current_tool.clone();
                self.fail(Error::UpdateFailure {
                    tool,
                    cause: FailureCause::ExitCode(code),
                });
            }
            Err(message) => self.fail(Error::Other(format!("AUR update failed: {}", message))),
        }
    }

    fn finalize(&mut self) {
        self.set_stage(Stage::Finalizing);
        self.status("Collecting update summary...");

        let path = self.config.pacman.log_file.clone();
        let since = self.session.start_timestamp.unwrap_or_else(Local::now);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let summary = tokio::task::spawn_blocking(move || log::session_summary(&path, since))
                .await
                .unwrap_or_else(|e| format!("Error: Could not read pacman log ({})\n", e));
            let _ = tx.send(Inbound::SessionLog(summary));
        });
    }

    fn run_kind(&self) -> RunKind {
        if self.session.pending_helper.is_empty() {
            RunKind::Official
        } else {
            RunKind::Full
        }
    }

    fn record_history(&self, status: &str) {
        let entry = HistoryEntry {
            date: Local::now(),
            kind: self.run_kind(),
            package_count: self.session.pending_count(),
            status: status.to_string(),
        };
        let history = self.collab.history.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = history.record(entry) {
                warn!("Failed to record update history: {}", e);
            }
        });
    }

    fn on_session_log(&mut self, summary: String) {
        let packages = self.session.pending_count();
        self.append_log(summary);
        self.append_log(format!(
            "[{}] Update run finished.\n",
            Local::now().format("%H:%M:%S")
        ));
        self.record_history("Success");

        self.session.end_run();
        self.session.pending_official.clear();
        self.session.pending_helper.clear();
        self.set_stage(Stage::Idle);
        self.status(format!(
            "Update run finished: {} package(s) updated.",
            packages
        ));
        self.notify(Urgency::Normal, "System update completed successfully.");
        self.finish(Outcome::Updated { packages });
    }

    fn clean_cache(&mut self) {
        if !self.session.is_free() {
            self.reject(BUSY);
            return;
        }

        self.session.maintenance = true;
        self.status("Cleaning package cache...");

        let cache = CacheManager::new(&self.config.pacman.cache_dirs);
        let invocation = self.config.pacman.clean_cache_invocation();
        let limit = self.config.timeouts.cache_clean();
        let privileged = self.collab.privileged.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = clean_cache_task(cache, privileged, invocation, limit).await;
            let _ = tx.send(Inbound::CacheCleaned(result));
        });
    }

    fn on_cache_cleaned(&mut self, result: std::result::Result<String, String>) {
        if !self.session.maintenance {
            debug!("Dropping cache result with no clean in flight");
            return;
        }
        self.session.maintenance = false;

        match result {
            Ok(message) => {
                self.append_log(format!("{}\n", message));
                self.status(message.clone());
                self.notify(Urgency::Normal, &message);
                self.finish(Outcome::CacheCleaned { message });
            }
            Err(message) => {
                error!("{}", message);
                self.append_log(format!("ERROR: {}\n", message));
                self.status(message.clone());
                self.notify(Urgency::Critical, &message);
                self.finish(Outcome::Failed { message });
            }
        }
    }

    /// Single exit for every failure: back to idle, credential dropped.
    fn fail(&mut self, err: Error) {
        let message = err.to_string();
        error!("{}", message);

        let was_updating = matches!(
            self.session.stage,
            Stage::UpdatingOfficial | Stage::UpdatingHelper
        );
        if let Some(name) = self.session.active_package.take() {
            let row = self.progress.fail(&name);
            self.publish_row(row);
        }
        if was_updating {
            self.record_history("Failed");
        }

        self.session.end_run();
        self.set_stage(Stage::Idle);
        self.append_log(format!(
            "[{}] ERROR: {}\n",
            Local::now().format("%H:%M:%S"),
            message
        ));
        self.status(message.clone());
        self.notify(Urgency::Critical, &message);
        self.finish(Outcome::Failed { message });
    }
}

async fn cache_size(cache: CacheManager) -> std::result::Result<u64, String> {
    tokio::task::spawn_blocking(move || cache.get_size())
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())
}

async fn clean_cache_task(
    cache: CacheManager,
    privileged: Arc<dyn PrivilegedOps>,
    invocation: Invocation,
    limit: std::time::Duration,
) -> std::result::Result<String, String> {
    let before = cache_size(cache.clone()).await.unwrap_or_else(|e| {
        warn!("Could not measure package cache: {}", e);
        0
    });

    let output = privileged
        .run(invocation, limit)
        .await
        .map_err(|e| format!("Cache cleaning failed: {}", e))?;
    if !output.success {
        let detail = output.stderr.trim();
        return Err(if detail.is_empty() {
            "Cache cleaning failed".to_string()
        } else {
            format!("Cache cleaning failed: {}", detail)
        });
    }

    let after = cache_size(cache).await.unwrap_or(before);
    Ok(format!(
        "Package cache cleaned, freed {}.",
        format_bytes(before.saturating_sub(after))
    ))
}

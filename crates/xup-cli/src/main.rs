//! xupdate - authenticated official + AUR updates for Arch Linux.

mod render;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use render::Renderer;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use xup_core::PackageRef;
use xup_service::progress::format_duration;
use xup_service::{
    Collaborators, Command, Config, HistoryStore, IgnoredStore, Orchestrator, OrchestratorHandle,
    Outcome, ProgressMessage,
};

#[derive(Parser, Debug)]
#[command(name = "xupdate", version)]
#[command(about = "Authenticated system and AUR updates for Arch Linux", long_about = None)]
struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Config file (default: $XDG_CONFIG_HOME/xupdate/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Authenticate and list pending updates
    Check,
    /// Check, then update official and AUR packages
    Update {
        /// Don't ask for confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Remove old package versions from the cache
    CleanCache,
    /// Show past update runs
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Manage packages excluded from updates
    Ignore {
        #[command(subcommand)]
        action: IgnoreAction,
    },
}

#[derive(Subcommand, Debug)]
enum IgnoreAction {
    List,
    Add { name: String },
    Remove { name: String },
}

fn init_logging(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")?;
    Ok(())
}

// owns the orchestrator task for the lifetime of one CLI command
struct Driver {
    handle: OrchestratorHandle,
    messages: broadcast::Receiver<ProgressMessage>,
    renderer: Renderer,
    task: JoinHandle<()>,
}

impl Driver {
    fn spawn(config: Config, show_log: bool) -> Self {
        let collab = Collaborators::system(&config);
        let (mut orchestrator, inbox) = Orchestrator::new(config, collab);
        let handle = orchestrator.handle();
        let messages = orchestrator.subscribe();
        let task = tokio::spawn(async move { orchestrator.run(inbox).await });

        Self {
            handle,
            messages,
            renderer: Renderer::new(show_log),
            task,
        }
    }

    async fn run(&mut self, command: Command) -> Result<Outcome> {
        self.renderer.begin();
        self.handle.send(command)?;
        loop {
            match self.messages.recv().await {
                Ok(message) => {
                    if let Some(outcome) = self.renderer.handle(message) {
                        return Ok(outcome);
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} progress messages", skipped),
                Err(RecvError::Closed) => bail!("Orchestrator stopped unexpectedly"),
            }
        }
    }

    async fn shutdown(self) -> Result<()> {
        self.handle.shutdown()?;
        self.task.await?;
        Ok(())
    }
}

fn print_pending(label: &str, packages: &[PackageRef]) {
    if packages.is_empty() {
        return;
    }
    println!("{} ({}):", label, packages.len());
    for pkg in packages {
        println!("  {}", pkg);
    }
}

async fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;

    let answer = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await??;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

/// Turns terminal outcomes into the process result.
fn report(outcome: Outcome) -> Result<()> {
    match outcome {
        Outcome::UpToDate => println!("System is up to date."),
        Outcome::UpdatesAvailable { official, helper } => {
            print_pending("Official", &official);
            print_pending("AUR", &helper);
        }
        Outcome::Updated { packages } => println!("Updated {} package(s).", packages),
        Outcome::CacheCleaned { message } => println!("{}", message),
        Outcome::Failed { message } | Outcome::Rejected { message } => bail!(message),
    }
    Ok(())
}

async fn check(config: Config, show_log: bool) -> Result<()> {
    let mut driver = Driver::spawn(config, show_log);
    let outcome = driver.run(Command::CheckForUpdates).await;
    driver.shutdown().await?;
    report(outcome?)
}

async fn update(config: Config, yes: bool, show_log: bool) -> Result<()> {
    let mut driver = Driver::spawn(config, show_log);
    let started = Instant::now();

    let outcome = match driver.run(Command::CheckForUpdates).await {
        Ok(outcome) => outcome,
        Err(e) => {
            driver.shutdown().await?;
            return Err(e);
        }
    };
    if !matches!(outcome, Outcome::UpdatesAvailable { .. }) {
        driver.shutdown().await?;
        return report(outcome);
    }

    report(outcome)?;
    if !(yes || confirm("Proceed with update?").await?) {
        println!("Update cancelled.");
        return driver.shutdown().await;
    }

    let outcome = driver.run(Command::RunUpdates).await;
    driver.shutdown().await?;
    report(outcome?)?;
    println!(
        "Finished in {}.",
        format_duration(started.elapsed().as_secs_f64())
    );
    Ok(())
}

async fn clean_cache(config: Config, show_log: bool) -> Result<()> {
    let mut driver = Driver::spawn(config, show_log);
    let outcome = driver.run(Command::CleanCache).await;
    driver.shutdown().await?;
    report(outcome?)
}

fn history(config: &Config, limit: usize) {
    let entries = HistoryStore::in_dir(&config.data_dir()).load();
    if entries.is_empty() {
        println!("No update history yet.");
        return;
    }

    for entry in entries.iter().take(limit) {
        println!(
            "{}  {:<16} {:>4} package(s)  {}",
            entry.date.format("%Y-%m-%d %H:%M"),
            entry.kind.to_string(),
            entry.package_count,
            entry.status
        );
    }
}

fn ignore(config: &Config, action: IgnoreAction) -> Result<()> {
    let store = IgnoredStore::in_dir(&config.data_dir());
    match action {
        IgnoreAction::List => {
            let names = store.load();
            if names.is_empty() {
                println!("No ignored packages.");
            }
            for name in names {
                println!("{}", name);
            }
        }
        IgnoreAction::Add { name } => {
            if store.add(&name)? {
                println!("Ignoring packages starting with '{}'.", name);
            } else {
                println!("'{}' is already ignored.", name);
            }
        }
        IgnoreAction::Remove { name } => {
            if store.remove(&name)? {
                println!("No longer ignoring '{}'.", name);
            } else {
                println!("'{}' was not ignored.", name);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    config.helper = config.helper.resolve();
    info!("Starting xupdate");

    let show_log = cli.verbose > 0;
    match cli.command {
        Commands::Check => check(config, show_log).await,
        Commands::Update { yes } => update(config, yes, show_log).await,
        Commands::CleanCache => clean_cache(config, show_log).await,
        Commands::History { limit } => {
            history(&config, limit);
            Ok(())
        }
        Commands::Ignore { action } => ignore(&config, action),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::parse_from(["xupdate", "-vv", "update", "--yes"]);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Update { yes: true }));

        let cli = Cli::parse_from(["xupdate", "ignore", "add", "linux"]);
        assert!(matches!(
            cli.command,
            Commands::Ignore {
                action: IgnoreAction::Add { ref name }
            } if name == "linux"
        ));

        let cli = Cli::parse_from(["xupdate", "history", "--limit", "3"]);
        assert!(matches!(cli.command, Commands::History { limit: 3 }));
    }

    #[test]
    fn test_report_maps_failures_to_errors() {
        assert!(report(Outcome::UpToDate).is_ok());
        let err = report(Outcome::Failed {
            message: "pacman update failed: exit code 1".into(),
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "pacman update failed: exit code 1");
    }
}

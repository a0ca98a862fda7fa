//! Small JSON stores under the data directory.

use chrono::{DateTime, Local};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use xup_core::{PackageRef, Result};

pub const HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunKind {
    /// Only official repositories were updated.
    Official,
    /// Official repositories and AUR packages.
    Full,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunKind::Official => write!(f, "official"),
            RunKind::Full => write!(f, "official + AUR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub date: DateTime<Local>,
    pub kind: RunKind,
    pub package_count: usize,
    pub status: String,
}

fn load_list<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return Vec::new(),
    };

    match serde_json::from_str(&contents) {
        Ok(items) => items,
        Err(e) => {
            warn!("Ignoring malformed {:?}: {}", path, e);
            Vec::new()
        }
    }
}

fn save_list<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(items)?)?;
    Ok(())
}

/// Past update runs, newest first.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("history.json"))
    }

    pub fn load(&self) -> Vec<HistoryEntry> {
        load_list(&self.path)
    }

    pub fn record(&self, entry: HistoryEntry) -> Result<()> {
        let mut entries = self.load();
        entries.insert(0, entry);
        entries.truncate(HISTORY_LIMIT);
        save_list(&self.path, &entries)
    }
}

/// Package name prefixes excluded from pending sets.
#[derive(Debug, Clone)]
pub struct IgnoredStore {
    path: PathBuf,
}

impl IgnoredStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("ignored.json"))
    }

    pub fn load(&self) -> Vec<String> {
        load_list(&self.path)
    }

    /// Returns false if the name was already present.
    pub fn add(&self, name: &str) -> Result<bool> {
        let mut names = self.load();
        if names.iter().any(|n| n == name) {
            return Ok(false);
        }
        names.push(name.to_string());
        save_list(&self.path, &names)?;
        Ok(true)
    }

    /// Returns false if the name was not present.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let mut names = self.load();
        let before = names.len();
        names.retain(|n| n != name);
        if names.len() == before {
            return Ok(false);
        }
        save_list(&self.path, &names)?;
        Ok(true)
    }
}

pub fn filter_ignored(packages: Vec<PackageRef>, ignored: &[String]) -> Vec<PackageRef> {
    packages
        .into_iter()
        .filter(|pkg| !ignored.iter().any(|prefix| pkg.name.starts_with(prefix.as_str())))
        .collect()
}

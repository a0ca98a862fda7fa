use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use xup_aur::HelperConfig;
use xup_core::error::{Error, Result};
use xup_pacman::PacmanConfig;

const APP_DIR: &str = "xupdate";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Graphical password prompt, invoked as `<prompt> --password --title=<title>`.
    pub prompt: String,
    pub title: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            prompt: "zenity".to_string(),
            title: "Authentication required for system update".to_string(),
        }
    }
}

/// All waits, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub prompt: u64,
    pub probe: u64,
    pub lock_remove: u64,
    pub lock_grace: u64,
    pub helper_update: u64,
    pub cache_clean: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            prompt: 120,
            probe: 10,
            lock_remove: 5,
            lock_grace: 3,
            helper_update: 600,
            cache_clean: 30,
        }
    }
}

impl Timeouts {
    pub fn prompt(&self) -> Duration {
        Duration::from_secs(self.prompt)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe)
    }

    pub fn lock_remove(&self) -> Duration {
        Duration::from_secs(self.lock_remove)
    }

    pub fn lock_grace(&self) -> Duration {
        Duration::from_secs(self.lock_grace)
    }

    pub fn helper_update(&self) -> Duration {
        Duration::from_secs(self.helper_update)
    }

    pub fn cache_clean(&self) -> Duration {
        Duration::from_secs(self.cache_clean)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pacman: PacmanConfig,
    pub helper: HelperConfig,
    pub auth: AuthConfig,
    pub timeouts: Timeouts,
    /// History and ignore list location. Defaults to `$XDG_DATA_HOME/xupdate`.
    pub data_dir: Option<PathBuf>,
    pub notifications: bool,
    /// Relaunches of the system upgrade after pacman reports a busy database lock.
    pub lock_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pacman: PacmanConfig::default(),
            helper: HelperConfig::default(),
            auth: AuthConfig::default(),
            timeouts: Timeouts::default(),
            data_dir: None,
            notifications: true,
            lock_retries: 1,
        }
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    /// Reads a TOML config. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::ConfigError(format!("{}: {}", path.display(), e)))?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR)
        })
    }
}

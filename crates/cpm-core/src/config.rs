//! Home directory layout and user configuration.
//!
//! Everything lives under `~/.cpm` unless `CPM_HOME` points elsewhere.
//! `config.toml` in that directory may override any default.

use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable overriding the home directory.
pub const HOME_ENV: &str = "CPM_HOME";

/// Returns the home directory, or None if the user's home cannot be resolved.
pub fn try_cpm_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var(HOME_ENV) {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".cpm"))
}

/// Returns the home directory.
///
/// # Errors
///
/// Fails if neither `CPM_HOME` is set nor the user's home can be resolved.
pub fn cpm_home() -> Result<PathBuf> {
    try_cpm_home().ok_or_else(|| {
        Error::Io("could not determine home directory; set CPM_HOME to override".into())
    })
}

/// Engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Resolver worker threads.
    pub jobs: usize,
    pub resolve_timeout_secs: u64,
    pub build_timeout_secs: u64,
    /// Local module registry read by the source adapter.
    pub registry: PathBuf,
    pub cache_dir: PathBuf,
    /// Build outputs, one directory per module, version and matrix.
    pub build_dir: PathBuf,
    /// Synced source trees.
    pub work_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Config {
    /// Defaults rooted at `home`.
    pub fn with_home(home: &Path) -> Self {
        Self {
            jobs: num_cpus::get().max(1),
            resolve_timeout_secs: 300,
            build_timeout_secs: 3600,
            registry: home.join("registry"),
            cache_dir: home.join("cache"),
            build_dir: home.join("build"),
            work_dir: home.join("work"),
            log_dir: home.join("logs"),
        }
    }

    /// Load `config.toml` from the home directory, falling back to defaults
    /// for a missing file or missing keys.
    ///
    /// # Errors
    ///
    /// Fails if the home directory is unknown or the file is unreadable or
    /// malformed.
    pub fn load() -> Result<Self> {
        Self::load_from(&cpm_home()?)
    }

    /// [`Config::load`] for an explicit home directory.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub fn load_from(home: &Path) -> Result<Self> {
        let file = home.join("config.toml");
        let content = match std::fs::read_to_string(&file) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::with_home(home));
            }
            Err(e) => return Err(Error::Io(format!("{}: {e}", file.display()))),
        };

        // Unset keys take the home-relative defaults, not `Default`.
        let mut value: toml::Table = toml::from_str(&content)
            .map_err(|e| Error::Io(format!("{}: {e}", file.display())))?;
        let defaults = toml::Value::try_from(Self::with_home(home))
            .map_err(|e| Error::Io(e.to_string()))?;
        if let toml::Value::Table(defaults) = defaults {
            for (key, default) in defaults {
                value.entry(key).or_insert(default);
            }
        }
        toml::Value::Table(value)
            .try_into()
            .map_err(|e: toml::de::Error| Error::Io(format!("{}: {e}", file.display())))
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    /// Log file for one build attempt of `path@version`.
    pub fn build_log_path(&self, path: &str, version: &str) -> PathBuf {
        let timestamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
        let name = path.replace(['/', '\\', ':'], "_");
        self.log_dir
            .join(format!("build-{name}-{version}-{timestamp}.log"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::with_home(&try_cpm_home().unwrap_or_else(|| PathBuf::from(".cpm")))
    }
}

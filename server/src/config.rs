//! Server configuration module.
//!
//! Parses configuration from environment variables for the TaskSync server.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `PORT` | No | 8000 | HTTP server port |
//! | `TASKSYNC_DIR` | No | `./tasksync` | Directory holding `tasks.md` and `log.md` |
//! | `TASKSYNC_WORKSPACE` | No | current directory | Root of the file-tree listing |
//! | `TASKSYNC_DEBOUNCE_MS` | No | 100 | Window for coalescing file notifications |

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 8000;

/// Default directory for the watched files, relative to the working directory.
const DEFAULT_SYNC_DIR: &str = "tasksync";

/// Default notification coalescing window in milliseconds.
const DEFAULT_DEBOUNCE_MS: u64 = 100;

/// File name of the tasks file inside the sync directory.
pub const TASKS_FILE_NAME: &str = "tasks.md";

/// File name of the log file inside the sync directory.
pub const LOG_FILE_NAME: &str = "log.md";

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },

    /// Port number is invalid.
    #[error("invalid port number: {0}")]
    InvalidPort(#[source] std::num::ParseIntError),

    /// The working directory could not be determined.
    #[error("cannot determine working directory: {0}")]
    WorkingDir(#[from] std::io::Error),
}

/// Server configuration parsed from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,

    /// Directory containing the tasks and log files.
    pub sync_dir: PathBuf,

    /// Root directory reported by the file-tree query.
    pub workspace_dir: PathBuf,

    /// How long notifications for one file are coalesced before processing.
    pub debounce: Duration,
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but malformed, or if the
    /// working directory needed for relative defaults cannot be read.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use tasksync_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Watching {}", config.tasks_file().display());
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let cwd = env::current_dir()?;
        let port = parse_port()?;
        let sync_dir = parse_dir("TASKSYNC_DIR", &cwd)?.unwrap_or_else(|| cwd.join(DEFAULT_SYNC_DIR));
        let workspace_dir = parse_dir("TASKSYNC_WORKSPACE", &cwd)?.unwrap_or_else(|| cwd.clone());
        let debounce = parse_debounce()?;

        Ok(Self {
            port,
            sync_dir,
            workspace_dir,
            debounce,
        })
    }

    /// Builds a configuration rooted at `sync_dir` with default settings.
    ///
    /// The workspace root is the parent of `sync_dir` (or `sync_dir` itself
    /// when it has none).
    #[must_use]
    pub fn for_dir(sync_dir: impl Into<PathBuf>) -> Self {
        let sync_dir = sync_dir.into();
        let workspace_dir = sync_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| sync_dir.clone());
        Self {
            port: DEFAULT_PORT,
            sync_dir,
            workspace_dir,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
        }
    }

    /// Full path of the tasks file.
    #[must_use]
    pub fn tasks_file(&self) -> PathBuf {
        self.sync_dir.join(TASKS_FILE_NAME)
    }

    /// Full path of the log file.
    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.sync_dir.join(LOG_FILE_NAME)
    }
}

/// Parse the PORT environment variable.
///
/// Returns the default port if not set.
fn parse_port() -> Result<u16, ConfigError> {
    match env::var("PORT") {
        Ok(port_str) => port_str.trim().parse().map_err(ConfigError::InvalidPort),
        Err(env::VarError::NotPresent) => Ok(DEFAULT_PORT),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: "PORT".to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

/// Parse a directory variable, resolving relative paths against `cwd`.
///
/// Unset or empty variables yield `None`.
fn parse_dir(var: &str, cwd: &Path) -> Result<Option<PathBuf>, ConfigError> {
    match env::var(var) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => {
            let path = PathBuf::from(value.trim());
            if path.is_absolute() {
                Ok(Some(path))
            } else {
                Ok(Some(cwd.join(path)))
            }
        }
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: var.to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

/// Parse the TASKSYNC_DEBOUNCE_MS environment variable.
fn parse_debounce() -> Result<Duration, ConfigError> {
    match env::var("TASKSYNC_DEBOUNCE_MS") {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| ConfigError::InvalidFormat {
                var: "TASKSYNC_DEBOUNCE_MS".to_string(),
                message: e.to_string(),
            }),
        Err(env::VarError::NotPresent) => Ok(Duration::from_millis(DEFAULT_DEBOUNCE_MS)),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: "TASKSYNC_DEBOUNCE_MS".to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

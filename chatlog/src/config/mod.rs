//! Configuration for the `chatlog` tool.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/chatlog/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::history::HistorySettings;
use crate::history::dedup::DedupWindows;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// No database path was given and the user's data directory is unknown.
    #[error("could not determine data directory for the history database")]
    NoDataDir,
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    storage: StorageFileConfig,
    history: HistoryFileConfig,
    ui: UiFileConfig,
}

/// `[storage]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    database_path: Option<PathBuf>,
}

/// `[history]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct HistoryFileConfig {
    dedup_window_secs: Option<u64>,
    correlated_dedup_window_secs: Option<u64>,
    default_page_size: Option<usize>,
    event_buffer: Option<usize>,
}

/// `[ui]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UiFileConfig {
    timestamp_format: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Storage --
    /// Explicit database location; `None` means the per-user default.
    pub database_path: Option<PathBuf>,

    // -- History --
    /// Dedup half-window for items without a correlation id.
    pub dedup_window: Duration,
    /// Dedup half-window for items with a correlation id.
    pub correlated_dedup_window: Duration,
    /// Page size used when a read does not specify one.
    pub default_page_size: usize,
    /// Events buffered per subscriber.
    pub event_buffer: usize,

    // -- UI --
    /// Timestamp display format string (chrono).
    pub timestamp_format: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let history = HistorySettings::default();
        Self {
            database_path: None,
            dedup_window: history.dedup.plain,
            correlated_dedup_window: history.dedup.correlated,
            default_page_size: 50,
            event_buffer: history.event_buffer,
            timestamp_format: "%Y-%m-%d %H:%M:%S".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read,
    /// or any config file cannot be parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            database_path: cli
                .database
                .clone()
                .or_else(|| file.storage.database_path.clone()),
            dedup_window: file
                .history
                .dedup_window_secs
                .map_or(defaults.dedup_window, Duration::from_secs),
            correlated_dedup_window: file
                .history
                .correlated_dedup_window_secs
                .map_or(defaults.correlated_dedup_window, Duration::from_secs),
            default_page_size: file
                .history
                .default_page_size
                .unwrap_or(defaults.default_page_size),
            event_buffer: file
                .history
                .event_buffer
                .unwrap_or(defaults.event_buffer),
            timestamp_format: cli
                .timestamp_format
                .clone()
                .or_else(|| file.ui.timestamp_format.clone())
                .unwrap_or(defaults.timestamp_format),
        }
    }

    /// Database location: the configured path, or
    /// `<data dir>/chatlog/history.db`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoDataDir`] if no path is configured and the
    /// data directory cannot be determined.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        let data_dir = dirs::data_dir().ok_or(ConfigError::NoDataDir)?;
        Ok(data_dir.join("chatlog").join("history.db"))
    }

    /// Engine settings derived from this configuration.
    #[must_use]
    pub const fn to_history_settings(&self) -> HistorySettings {
        HistorySettings {
            dedup: DedupWindows {
                plain: self.dedup_window,
                correlated: self.correlated_dedup_window,
            },
            event_buffer: self.event_buffer,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Inspect and maintain a chat history database")]
pub struct CliArgs {
    /// Path to config file (default: `~/.config/chatlog/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to the history database.
    #[arg(long, env = "CHATLOG_DB")]
    pub database: Option<PathBuf>,

    /// Timestamp display format (chrono format string).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "CHATLOG_LOG")]
    pub log_level: String,

    /// Path to log file (default: log to stderr).
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// What to do.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands of the `chatlog` binary.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print a page of a conversation's history, newest first.
    History {
        /// Owning account.
        #[arg(long)]
        account: String,
        /// Peer or room.
        #[arg(long)]
        conversation: String,
        /// Only show items older than this item id.
        #[arg(long)]
        before: Option<i64>,
        /// Maximum number of items (default from config).
        #[arg(long)]
        limit: Option<usize>,
        /// Print records as JSON lines.
        #[arg(long)]
        json: bool,
    },
    /// Mark every unread item of a conversation as read.
    MarkRead {
        /// Owning account.
        #[arg(long)]
        account: String,
        /// Peer or room.
        #[arg(long)]
        conversation: String,
    },
    /// Erase history of one conversation, or of the whole account.
    Clear {
        /// Owning account.
        #[arg(long)]
        account: String,
        /// Conversation to erase; all of them when omitted.
        #[arg(long)]
        conversation: Option<String>,
    },
    /// Print the database schema version.
    Schema,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("chatlog").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}

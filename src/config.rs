/// Application configuration, persisted as TOML in the platform config directory.
///
/// On Windows this is typically:
///   %APPDATA%\wakfu-combat-tracker\config.toml
///
/// The game writes its logs under the Ankama launcher's directory:
///   %APPDATA%\zaap\gamesLogs\wakfu\logs\wakfu.log        (fight lifecycle)
///   %APPDATA%\zaap\gamesLogs\wakfu\logs\wakfu_chat.log   (spell casts, turns)
use crate::dedup;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const APP_DIR_NAME: &str = "wakfu-combat-tracker";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error on {path:?}: {source}")]
    Io {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// Fixed-interval polling only.
    Poll,
    /// Polling plus OS change notifications that trigger an immediate read.
    Notify,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_true")]
    pub enabled:   bool,
    #[serde(default = "default_dedup_window_ms")]
    pub window_ms: u32,
    #[serde(default = "default_dedup_capacity")]
    pub capacity:  usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnConfig {
    /// When set, the fighter whose turn just ended may start a new turn once
    /// this many ms have passed. Unset: only a third fighter or a turn-end
    /// line releases them.
    #[serde(default)]
    pub trailing_grace_ms: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding `wakfu.log` and `wakfu_chat.log`.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,

    #[serde(default = "default_chat_log_file")]
    pub chat_log_file: String,

    #[serde(default = "default_combat_log_file")]
    pub combat_log_file: String,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_watch_mode")]
    pub watch_mode: WatchMode,

    /// Publish every admitted line alongside the domain events.
    #[serde(default)]
    pub forward_log_lines: bool,

    /// How often dedup counters are logged; 0 disables.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,

    // Tables last so the serialised TOML stays valid
    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub turns: TurnConfig,
}

fn default_true() -> bool { true }
fn default_dedup_window_ms() -> u32 { dedup::DEFAULT_WINDOW_MS }
fn default_dedup_capacity() -> usize { dedup::DEFAULT_CAPACITY }
fn default_chat_log_file() -> String { "wakfu_chat.log".to_owned() }
fn default_combat_log_file() -> String { "wakfu.log".to_owned() }
fn default_poll_interval_ms() -> u64 { 100 }
fn default_watch_mode() -> WatchMode { WatchMode::Poll }
fn default_stats_interval_secs() -> u64 { 60 }

/// `%APPDATA%`, or the temp dir on systems without it.
fn app_data_dir() -> PathBuf {
    std::env::var("APPDATA")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
}

fn default_logs_dir() -> PathBuf {
    app_data_dir().join("zaap").join("gamesLogs").join("wakfu").join("logs")
}

/// Where `config.toml` lives unless `--config` says otherwise.
pub fn default_config_dir() -> PathBuf {
    app_data_dir().join(APP_DIR_NAME)
}

/// Where the tracker's own rolling log goes.
pub fn default_log_dir() -> PathBuf {
    default_config_dir().join("logs")
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled:   true,
            window_ms: default_dedup_window_ms(),
            capacity:  default_dedup_capacity(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logs_dir:            default_logs_dir(),
            chat_log_file:       default_chat_log_file(),
            combat_log_file:     default_combat_log_file(),
            poll_interval_ms:    default_poll_interval_ms(),
            watch_mode:          default_watch_mode(),
            dedup:               DedupConfig::default(),
            turns:               TurnConfig::default(),
            forward_log_lines:   false,
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

impl AppConfig {
    pub fn chat_log_path(&self) -> PathBuf {
        self.logs_dir.join(&self.chat_log_file)
    }

    pub fn combat_log_path(&self) -> PathBuf {
        self.logs_dir.join(&self.combat_log_file)
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

pub fn load_or_default(config_dir: &Path) -> Result<AppConfig, ConfigError> {
    load_file(&config_dir.join("config.toml"))
}

/// Load a specific file; a missing file yields defaults.
pub fn load_file(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        tracing::info!("No config at {:?} — using defaults", path);
        return Ok(AppConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    Ok(toml::from_str(&raw)?)
}

pub fn save(config: &AppConfig, config_dir: &Path) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io { path: config_dir.to_path_buf(), source };
    std::fs::create_dir_all(config_dir).map_err(io_err)?;
    let raw = toml::to_string_pretty(config)?;
    std::fs::write(config_dir.join("config.toml"), raw).map_err(io_err)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_config() {
        let dir = tempdir().unwrap();
        let mut cfg = AppConfig::default();
        cfg.logs_dir = PathBuf::from("/games/wakfu/logs");
        cfg.poll_interval_ms = 250;
        cfg.watch_mode = WatchMode::Notify;
        cfg.dedup.window_ms = 150;
        cfg.turns.trailing_grace_ms = Some(500);

        save(&cfg, dir.path()).unwrap();

        let loaded = load_or_default(dir.path()).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn returns_default_when_missing() {
        let dir = tempdir().unwrap();
        let cfg = load_or_default(dir.path()).unwrap();
        assert_eq!(cfg.poll_interval_ms, 100);
        assert_eq!(cfg.dedup.window_ms, 100);
        assert_eq!(cfg.dedup.capacity, 1000);
        assert!(cfg.dedup.enabled);
        assert_eq!(cfg.watch_mode, WatchMode::Poll);
        assert!(cfg.logs_dir.ends_with("zaap/gamesLogs/wakfu/logs"));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "logs_dir = \"/tmp/wakfu\"\nwatch_mode = \"notify\"\n\n[dedup]\nwindow_ms = 80\n",
        )
        .unwrap();

        let cfg = load_or_default(dir.path()).unwrap();
        assert_eq!(cfg.chat_log_path(), PathBuf::from("/tmp/wakfu/wakfu_chat.log"));
        assert_eq!(cfg.combat_log_path(), PathBuf::from("/tmp/wakfu/wakfu.log"));
        assert_eq!(cfg.watch_mode, WatchMode::Notify);
        assert_eq!(cfg.dedup.window_ms, 80);
        assert_eq!(cfg.dedup.capacity, 1000);
        assert!(cfg.dedup.enabled);
        assert_eq!(cfg.turns.trailing_grace_ms, None);
    }

    #[test]
    fn rejects_malformed_toml() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), "poll_interval_ms = \"fast\"").unwrap();
        assert!(matches!(load_or_default(dir.path()), Err(ConfigError::Parse(_))));
    }
}

//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/searchmon/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/searchmon/` (~/.config/searchmon/)
//! - Data: `$XDG_DATA_HOME/searchmon/` (~/.local/share/searchmon/)
//! - State/Logs: `$XDG_STATE_HOME/searchmon/` (~/.local/state/searchmon/)

use crate::error::{Error, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Analysis and caching behavior
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Tunables for the action-sequence analysis and the daily cache
#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    /// Visits requested per feed page; a shorter page ends pagination
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Maximum gap in seconds between two searches of one repeat group
    #[serde(default = "default_repeat_window_secs")]
    pub repeat_window_secs: i64,

    /// No visit data exists before this day
    #[serde(default = "default_cutoff_date")]
    pub cutoff_date: NaiveDate,

    /// Recompute the current day on every query instead of trusting its row
    #[serde(default = "default_refresh_today")]
    pub refresh_today: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            repeat_window_secs: default_repeat_window_secs(),
            cutoff_date: default_cutoff_date(),
            refresh_today: default_refresh_today(),
        }
    }
}

impl AnalysisConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::Config(
                "analysis.page_size must be at least 1".to_string(),
            ));
        }
        if self.repeat_window_secs < 0 {
            return Err(Error::Config(
                "analysis.repeat_window_secs must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_page_size() -> usize {
    100
}

fn default_repeat_window_secs() -> i64 {
    180
}

fn default_cutoff_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2016, 1, 1).unwrap_or(NaiveDate::MIN)
}

fn default_refresh_today() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.analysis.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/searchmon/config.toml` (~/.config/searchmon/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("searchmon").join("config.toml")
    }

    /// Returns the data directory path (for the SQLite cache)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("searchmon")
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("searchmon")
    }

    /// Returns the daily aggregate cache path
    ///
    /// `$XDG_DATA_HOME/searchmon/cache.db` (~/.local/share/searchmon/cache.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("cache.db")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("searchmon.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.analysis.page_size, 100);
        assert_eq!(config.analysis.repeat_window_secs, 180);
        assert_eq!(
            config.analysis.cutoff_date,
            NaiveDate::from_ymd_opt(2016, 1, 1).unwrap()
        );
        assert!(config.analysis.refresh_today);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[analysis]
page_size = 50
cutoff_date = "2020-06-01"
refresh_today = false

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.analysis.page_size, 50);
        assert_eq!(config.analysis.repeat_window_secs, 180);
        assert_eq!(
            config.analysis.cutoff_date,
            NaiveDate::from_ymd_opt(2020, 6, 1).unwrap()
        );
        assert!(!config.analysis.refresh_today);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_analysis_config_validation() {
        assert!(AnalysisConfig::default().validate().is_ok());

        let config = AnalysisConfig {
            page_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AnalysisConfig {
            repeat_window_secs: -1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_rejects_zero_page_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[analysis]\npage_size = 0\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("page_size"));
    }
}

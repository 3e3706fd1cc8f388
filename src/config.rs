//! Configuration for conbridge.
//!
//! The configuration file is located at `~/.conbridge/config.toml`. Every
//! field is optional:
//!
//! ```toml
//! # Command line of the hosted program
//! shell = "pwsh.exe -NoLogo"
//!
//! # Working directory of the hosted program
//! starting_directory = "C:\\src"
//!
//! # Initial pseudo console size, used when the host size is unknown
//! rows = 30
//! cols = 120
//!
//! # Pipe text encoding: utf8 or utf16le
//! encoding = "utf8"
//!
//! # Kill the whole process tree when the session closes
//! kill_on_close = true
//!
//! # Log filter, overridden by RUST_LOG
//! log_level = "info"
//!
//! [pump]
//! strategy = "blocking"   # or "polling"
//! poll_interval_ms = 5
//! chunk_size = 1024
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::pump::{DEFAULT_CHUNK_SIZE, DEFAULT_POLL_INTERVAL};
use crate::core::{PipeEncoding, ReadStrategy, SessionOptions};

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Command line to launch
    pub shell: Option<String>,
    pub starting_directory: Option<PathBuf>,
    pub rows: u16,
    pub cols: u16,
    pub encoding: PipeEncoding,
    pub kill_on_close: bool,
    pub log_level: String,
    /// Output pump settings
    pub pump: PumpSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: None,
            starting_directory: None,
            rows: 24,
            cols: 80,
            encoding: PipeEncoding::default(),
            kill_on_close: true,
            log_level: "info".to_string(),
            pump: PumpSection::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PumpStrategy {
    Blocking,
    Polling,
}

/// `[pump]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpSection {
    pub strategy: PumpStrategy,
    pub poll_interval_ms: u64,
    pub chunk_size: usize,
}

impl Default for PumpSection {
    fn default() -> Self {
        Self {
            strategy: PumpStrategy::Blocking,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl PumpSection {
    pub fn read_strategy(&self) -> ReadStrategy {
        match self.strategy {
            PumpStrategy::Blocking => ReadStrategy::Blocking,
            PumpStrategy::Polling => ReadStrategy::Polling {
                interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            },
        }
    }
}

impl FromStr for Config {
    type Err = toml::de::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s)
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults
    pub fn load() -> Self {
        Self::config_path().map(|path| Self::load_from(&path)).unwrap_or_default()
    }

    /// Load from a specific file; missing or malformed files give defaults
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            if let Ok(content) = fs::read_to_string(path) {
                if let Ok(config) = content.parse() {
                    return config;
                }
            }
        }
        Self::default()
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<(), String> {
        match Self::config_path() {
            Some(path) => self.save_to(&path),
            None => Err("Could not determine config path".to_string()),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self).map_err(|e| format!("Failed to serialize config: {}", e))?;
        fs::write(path, content).map_err(|e| format!("Failed to write config: {}", e))?;
        Ok(())
    }

    /// Command line to launch: the configured shell or the platform default
    pub fn command_line(&self) -> String {
        match &self.shell {
            Some(shell) if !shell.trim().is_empty() => shell.clone(),
            _ => "cmd.exe".to_string(),
        }
    }

    /// Session options for a new session of `rows` x `cols`
    pub fn session_options(&self, rows: u16, cols: u16) -> SessionOptions {
        let mut options = SessionOptions::new(self.command_line());
        options.starting_directory = self.starting_directory.clone();
        options.rows = if rows == 0 { self.rows } else { rows };
        options.cols = if cols == 0 { self.cols } else { cols };
        options.encoding = self.encoding;
        options.strategy = self.pump.read_strategy();
        options.chunk_size = self.pump.chunk_size.max(2);
        options.kill_on_close = self.kill_on_close;
        options
    }

    fn config_path() -> Option<PathBuf> {
        app_dir().map(|dir| dir.join("config.toml"))
    }
}

/// `~/.conbridge`, created on first use
pub fn app_dir() -> Option<PathBuf> {
    let dir = home_dir()?.join(".conbridge");
    if !dir.exists() {
        let _ = fs::create_dir_all(&dir);
    }
    Some(dir)
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let config: Config = "".parse().unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.command_line(), "cmd.exe");
    }

    #[test]
    fn test_partial_config() {
        let config: Config = r#"
            shell = "pwsh.exe -NoLogo"
            encoding = "utf16le"

            [pump]
            strategy = "polling"
            poll_interval_ms = 20
        "#
        .parse()
        .unwrap();

        assert_eq!(config.encoding, PipeEncoding::Utf16le);
        assert_eq!(config.pump.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(
            config.pump.read_strategy(),
            ReadStrategy::Polling {
                interval: Duration::from_millis(20)
            }
        );

        let options = config.session_options(0, 132);
        assert_eq!(options.command_line, "pwsh.exe -NoLogo");
        assert_eq!((options.rows, options.cols), (24, 132));
        assert!(options.kill_on_close);
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        assert!("[pump]\nstrategy = \"spin\"".parse::<Config>().is_err());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.shell = Some("wsl.exe".to_string());
        config.rows = 50;
        config.pump.strategy = PumpStrategy::Polling;
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path), config);
    }

    #[test]
    fn test_malformed_or_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert_eq!(Config::load_from(&path), Config::default());

        fs::write(&path, "rows = \"many\"").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
    }
}

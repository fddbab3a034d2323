//! Server configuration loaded from a TOML file (§6 of the design).
//!
//! Matches `original_source/datafeed/config.py`'s `Config` in shape (a
//! single file supplying the AUTH password, datadir, port and calendar
//! parameters) but as a typed `serde`/`toml` struct rather than a
//! `ConfigParser` wrapper. Absence of the file is not fatal: auth is
//! disabled and every other field falls back to its default.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::calendar::Calendar;
use crate::constants::{DEFAULT_DATADIR, DEFAULT_PORT};
use crate::error::Result;

/// Top-level config file shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shared connection password. `None` disables auth entirely (§4.6).
    pub password: Option<String>,
    pub port: u16,
    pub datadir: String,
    /// Enable the secondary `rdb/` archive backend (§6). Carried as a
    /// config/CLI flag only; the crate does not implement that backend.
    pub rdb: bool,
    pub calendar: Calendar,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            password: None,
            port: DEFAULT_PORT,
            datadir: DEFAULT_DATADIR.to_string(),
            rdb: false,
            calendar: Calendar::sh_sz(),
        }
    }
}

impl Config {
    /// Load from `path`. A missing file yields [`Config::default`]
    /// (auth disabled) rather than an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Config::default());
        }
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn requires_auth(&self) -> bool {
        self.password.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = Config::load("/nonexistent/path/to/config.toml").unwrap();
        assert!(!cfg.requires_auth());
        assert_eq!(cfg.port, DEFAULT_PORT);
    }

    #[test]
    fn parses_password_and_port() {
        let dir = std::env::temp_dir().join(format!("datafeed-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "password = \"pw\"\nport = 9999\ndatadir = \"/tmp/var\"\n").unwrap();

        let cfg = Config::load(&path).unwrap();
        assert!(cfg.requires_auth());
        assert_eq!(cfg.password.as_deref(), Some("pw"));
        assert_eq!(cfg.port, 9999);
        assert_eq!(cfg.datadir, "/tmp/var");
    }
}

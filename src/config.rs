//! Configuration Module
//!
//! Startup settings from `config.ini`, overridable through
//! `EVERSENSE_ZERO__<SECTION>__<KEY>` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use config::{Config, Environment};
use ini::{Ini, ParseOption};
use serde::Deserialize;

use crate::auth::Credentials;

const APP_DIR: &str = "eversense-zero";
const ENV_PREFIX: &str = "EVERSENSE_ZERO";

/// Filesystem locations used by the process
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub database: PathBuf,
    pub log_dir: PathBuf,
}

impl AppPaths {
    /// Default layout under the user config directory, with an optional
    /// alternate config file
    pub fn resolve(config_file: Option<PathBuf>) -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Self {
            config_file: config_file.unwrap_or_else(|| config_dir.join("config.ini")),
            database: config_dir.join("glucose.db"),
            log_dir: config_dir.join("logs"),
            config_dir,
        }
    }

    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.log_dir)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub auth: Credentials,
    #[serde(default)]
    pub api: ApiSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_timezone() -> String {
    "Europe/Stockholm".into()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_env_prefix(path, ENV_PREFIX)
    }

    fn load_with_env_prefix(path: &Path, env_prefix: &str) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        for (key, value) in read_ini(path)? {
            builder = builder.set_default(key, value)?;
        }

        let raw = builder
            .add_source(Environment::with_prefix(env_prefix).separator("__"))
            .build()?;

        if raw.get_string("auth.username").is_err() || raw.get_string("auth.password").is_err() {
            return Err(ConfigError::MissingCredentials(path.display().to_string()));
        }

        Ok(raw.try_deserialize()?)
    }

    /// Civil timezone of the remote service
    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.api
            .timezone
            .parse()
            .map_err(|_| ConfigError::InvalidTimezone(self.api.timezone.clone()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs.max(1))
    }
}

/// Flatten `config.ini` into `section.key` pairs, values taken verbatim.
///
/// Escapes and quotes are left alone so passwords come through as written.
fn read_ini(path: &Path) -> Result<Vec<(String, String)>, ConfigError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let options = ParseOption {
        enabled_quote: false,
        enabled_escape: false,
        ..ParseOption::default()
    };
    let ini = Ini::load_from_file_opt(path, options)?;

    let mut entries = Vec::new();
    for (section, properties) in ini.iter() {
        let Some(section) = section else { continue };
        for (key, value) in properties.iter() {
            entries.push((
                format!("{}.{}", section.to_lowercase(), key.to_lowercase()),
                value.to_owned(),
            ));
        }
    }
    Ok(entries)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No credentials found in {0}, please add the config file first")]
    MissingCredentials(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Config error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Cannot read config file: {0}")]
    Ini(#[from] ini::Error),
}

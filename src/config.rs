//! Portal location, credentials and poll cadence.
//!
//! Layering, weakest first: built-in defaults, then the config file at
//! `<config_dir>/exoportal/config.json`, then environment variables. A
//! missing config file is normal; an unreadable or malformed one is not.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::poll::DEFAULT_POLL_INTERVAL;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

pub const ENV_BASE_URL: &str = "EXOPORTAL_URL";
pub const ENV_CSRF_TOKEN: &str = "EXOPORTAL_CSRF_TOKEN";
pub const ENV_API_KEY: &str = "EXOPORTAL_API_KEY";
pub const ENV_POLL_MS: &str = "EXOPORTAL_POLL_MS";

/// Cross-platform application paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    config_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self, String> {
        let base = dirs::config_dir().ok_or("Could not determine config directory")?;
        Ok(Self {
            config_dir: base.join("exoportal"),
        })
    }

    pub fn config_dir(&self) -> &PathBuf {
        &self.config_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }
}

/// Effective runtime configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PortalConfig {
    pub base_url: String,
    pub csrf_token: Option<String>,
    pub api_key: Option<String>,
    pub poll_interval: Duration,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            csrf_token: None,
            api_key: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// On-disk shape of `config.json`; every key is optional.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    csrf_token: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    poll_ms: Option<u64>,
}

impl PortalConfig {
    pub fn load() -> Result<Self, String> {
        let mut config = Self::default();
        if let Ok(paths) = AppPaths::new() {
            let path = paths.config_file();
            if path.exists() {
                let text = fs::read_to_string(&path)
                    .map_err(|e| format!("Failed to read config {:?}: {e}", path))?;
                let file: ConfigFile = serde_json::from_str(&text)
                    .map_err(|e| format!("Invalid config {:?}: {e}", path))?;
                config.apply_file(file);
            }
        }
        config.apply_env();
        Ok(config)
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(url) = file.base_url {
            self.base_url = url;
        }
        if file.csrf_token.is_some() {
            self.csrf_token = file.csrf_token;
        }
        if file.api_key.is_some() {
            self.api_key = file.api_key;
        }
        if let Some(ms) = file.poll_ms {
            match poll_interval_from_ms(ms) {
                Some(interval) => self.poll_interval = interval,
                None => warn!("Ignoring poll_ms = {ms} in config file"),
            }
        }
    }

    fn apply_env(&mut self) {
        if let Ok(url) = env::var(ENV_BASE_URL) {
            if !url.is_empty() {
                self.base_url = url;
            }
        }
        if let Ok(token) = env::var(ENV_CSRF_TOKEN) {
            if !token.is_empty() {
                self.csrf_token = Some(token);
            }
        }
        if let Ok(key) = env::var(ENV_API_KEY) {
            if !key.is_empty() {
                self.api_key = Some(key);
            }
        }
        if let Ok(raw) = env::var(ENV_POLL_MS) {
            match raw.parse::<u64>().ok().and_then(poll_interval_from_ms) {
                Some(interval) => self.poll_interval = interval,
                None => warn!("Ignoring {ENV_POLL_MS}={raw}"),
            }
        }
    }
}

/// A zero interval would hammer the portal; refuse it.
fn poll_interval_from_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

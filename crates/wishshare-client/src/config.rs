use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::http::RetryPolicy;

const APP_NAME: &str = "wishshare";
const CONFIG_FILE: &str = "config.json";

const ENV_API_URL: &str = "WISHSHARE_API_URL";
const ENV_WS_URL: &str = "WISHSHARE_WS_URL";
const ENV_ENVIRONMENT: &str = "WISHSHARE_ENV";

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Realtime base URL; derived from `api_base_url` when unset
    #[serde(default)]
    pub ws_base_url: Option<String>,
    /// Deployment environment; `local` enables verbose diagnostics
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
}

fn default_api_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_environment() -> String {
    "local".to_string()
}

fn default_request_timeout() -> u64 {
    15_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_base_delay() -> u64 {
    500
}

fn default_reconnect_delay() -> u64 {
    3_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            ws_base_url: None,
            environment: default_environment(),
            request_timeout_ms: default_request_timeout(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            reconnect_delay_ms: default_reconnect_delay(),
        }
    }
}

impl ClientConfig {
    /// Loads the config file from the user config directory, then applies
    /// `WISHSHARE_*` environment overrides
    pub fn load() -> Result<Self> {
        let config = Self::load_from(&Self::config_path()?)?;
        Ok(config.with_overrides(|key| std::env::var(key).ok()))
    }

    /// Loads a config file; a missing or malformed file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        Ok(serde_json::from_str(&data).unwrap_or_else(|e| {
            tracing::warn!("Ignoring malformed config file {}: {}", path.display(), e);
            Self::default()
        }))
    }

    /// Applies overrides from a variable lookup (normally the process environment)
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let set = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = set(ENV_API_URL) {
            self.api_base_url = url;
        }
        if let Some(url) = set(ENV_WS_URL) {
            self.ws_base_url = Some(url);
        }
        if let Some(environment) = set(ENV_ENVIRONMENT) {
            self.environment = environment;
        }
        self
    }

    /// Returns the config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join(APP_NAME)
            .join(CONFIG_FILE))
    }

    /// Base URL for realtime connections
    ///
    /// Falls back to the API URL with its scheme switched to `ws`/`wss`.
    pub fn realtime_base_url(&self) -> String {
        if let Some(url) = &self.ws_base_url {
            return url.trim_end_matches('/').to_string();
        }

        let api = self.api_base_url.trim_end_matches('/');
        if let Some(rest) = api.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = api.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            api.to_string()
        }
    }

    /// True when running against a local development backend
    ///
    /// Only affects how much diagnostic detail is logged.
    pub fn is_local_dev(&self) -> bool {
        let environment = self.environment.to_ascii_lowercase();
        if matches!(environment.as_str(), "local" | "development" | "dev") {
            return true;
        }

        reqwest::Url::parse(&self.api_base_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_owned))
            .is_some_and(|host| host == "localhost" || host == "127.0.0.1")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

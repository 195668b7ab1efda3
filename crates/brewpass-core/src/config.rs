//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! API base URL, login entry point, credential store backend and the last
//! used username. Environment variables override the file.
//!
//! Configuration is stored at `~/.config/brewpass/config.json`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::client::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::api::{ApiClient, Authenticator};
use crate::auth::{FileStore, KeyringStore, MemoryStore, SessionManager, SessionStore};
use crate::guard::{RouteGuard, DEFAULT_LOGIN_PATH};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "brewpass";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";

pub const ENV_API_URL: &str = "BREWPASS_API_URL";
pub const ENV_STORE: &str = "BREWPASS_STORE";
pub const ENV_USERNAME: &str = "BREWPASS_USERNAME";

/// Where session credentials are persisted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Keyring,
    File,
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyring" => Ok(StoreBackend::Keyring),
            "file" => Ok(StoreBackend::File),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(anyhow::anyhow!("Unknown store backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub login_path: Option<String>,
    #[serde(default)]
    pub store: StoreBackend,
    pub request_timeout_secs: Option<u64>,
    pub last_username: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        debug!(store = ?config.store, "Config loaded");
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Overlay environment variables read through `var`
    pub fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = var(ENV_API_URL).filter(|v| !v.is_empty()) {
            self.api_base_url = Some(url);
        }
        if let Some(store) = var(ENV_STORE).filter(|v| !v.is_empty()) {
            self.store = store.parse()?;
        }
        if let Some(username) = var(ENV_USERNAME).filter(|v| !v.is_empty()) {
            self.last_username = Some(username);
        }
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn api_base_url(&self) -> &str {
        self.api_base_url.as_deref().unwrap_or(DEFAULT_API_BASE_URL)
    }

    pub fn login_path(&self) -> &str {
        self.login_path.as_deref().unwrap_or(DEFAULT_LOGIN_PATH)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn open_store(&self) -> Result<Arc<dyn SessionStore>> {
        Ok(match self.store {
            StoreBackend::Keyring => Arc::new(KeyringStore::default()),
            StoreBackend::File => Arc::new(FileStore::in_dir(&self.cache_dir()?)),
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
        })
    }

    /// Wire a session manager to the configured backend and store
    pub fn session_manager(&self) -> Result<SessionManager> {
        let client = ApiClient::new(self.api_base_url(), self.request_timeout(), Authenticator::new())
            .context("Failed to build HTTP client")?;
        Ok(SessionManager::connect(client, self.open_store()?))
    }

    pub fn route_guard(&self) -> RouteGuard {
        RouteGuard::new(self.login_path())
    }
}

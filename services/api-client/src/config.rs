//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! `API_BASE_URL` overrides `client.base_url` so one file can target several
//! environments.

use dispatcher::DispatcherConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub client: DispatcherConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// Where the session credentials live between runs
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("api-client-session.json")
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(base_url) = std::env::var("API_BASE_URL") {
            let base_url = base_url.trim();
            if !base_url.is_empty() {
                config.client.base_url = base_url.to_owned();
            }
        }

        config.client.validate()?;
        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("api-client.toml")
    }
}

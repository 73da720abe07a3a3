//! Dispatcher configuration
//!
//! Held behind an async `RwLock` by the dispatcher so the base URL and verbose
//! flag can change at runtime; every request reads a fresh snapshot.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DispatcherConfig {
    /// Prefix for every relative request URL, e.g. `https://api.example.com/v1`
    pub base_url: String,
    /// Default per-request timeout, overridable per request
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Log every request/response pair at info level
    #[serde(default)]
    pub verbose: bool,
    /// Path of the credential renewal endpoint, relative to `base_url`
    #[serde(default = "default_renewal_path")]
    pub renewal_path: String,
}

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_renewal_path() -> String {
    "/auth/refresh".to_string()
}

impl DispatcherConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: default_timeout_ms(),
            verbose: false,
            renewal_path: default_renewal_path(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> common::Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.base_url
            )));
        }
        if self.timeout_ms == 0 {
            return Err(common::Error::Config(
                "timeout_ms must be greater than 0".into(),
            ));
        }
        if !self.renewal_path.starts_with('/') {
            return Err(common::Error::Config(format!(
                "renewal_path must start with '/', got: {}",
                self.renewal_path
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_omitted() {
        let config: DispatcherConfig =
            serde_json::from_str(r#"{"base_url":"https://api.example.com"}"#).unwrap();
        assert_eq!(config.timeout_ms, 15_000);
        assert!(!config.verbose);
        assert_eq!(config.renewal_path, "/auth/refresh");
        assert_eq!(config, DispatcherConfig::new("https://api.example.com"));
    }

    #[test]
    fn timeout_is_in_milliseconds() {
        let mut config = DispatcherConfig::new("https://api.example.com");
        config.timeout_ms = 2_500;
        assert_eq!(config.timeout(), Duration::from_millis(2_500));
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(DispatcherConfig::new("http://localhost:3000").validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_scheme() {
        let err = DispatcherConfig::new("api.example.com")
            .validate()
            .unwrap_err();
        assert!(
            err.to_string().contains("base_url must start with http"),
            "got: {err}"
        );
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut config = DispatcherConfig::new("https://api.example.com");
        config.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_relative_renewal_path() {
        let mut config = DispatcherConfig::new("https://api.example.com");
        config.renewal_path = "auth/refresh".into();
        assert!(config.validate().is_err());
    }
}

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::util::{env_non_empty, env_override_u64, is_local_endpoint_url, parse_bool_flag};

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_WELCOME_MESSAGE: &str =
    "Hi! Ask me about the data in this sheet, or select a range and tell me what to do with it.";
pub const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 120;
const MIN_STREAM_IDLE_TIMEOUT_SECS: u64 = 5;
const MAX_STREAM_IDLE_TIMEOUT_SECS: u64 = 900;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_url: String,
    pub api_token: Option<String>,
    pub streaming: bool,
    pub welcome_message: String,
    pub stream_idle_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            streaming: true,
            welcome_message: DEFAULT_WELCOME_MESSAGE.to_string(),
            stream_idle_timeout_secs: DEFAULT_STREAM_IDLE_TIMEOUT_SECS,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let api_url =
            env_non_empty("CELLCHAT_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_token = env_non_empty("CELLCHAT_API_TOKEN");
        let streaming = std::env::var("CELLCHAT_STREAMING")
            .ok()
            .and_then(parse_bool_flag)
            .unwrap_or(true);
        let welcome_message = env_non_empty("CELLCHAT_WELCOME_MESSAGE")
            .unwrap_or_else(|| DEFAULT_WELCOME_MESSAGE.to_string());
        let stream_idle_timeout_secs = env_override_u64(
            "CELLCHAT_STREAM_IDLE_TIMEOUT_SECS",
            DEFAULT_STREAM_IDLE_TIMEOUT_SECS,
            MIN_STREAM_IDLE_TIMEOUT_SECS,
            MAX_STREAM_IDLE_TIMEOUT_SECS,
        );

        Ok(Self {
            api_url,
            api_token,
            streaming,
            welcome_message,
            stream_idle_timeout_secs,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            bail!(
                "Invalid CELLCHAT_API_URL '{}': expected http:// or https:// URL",
                self.api_url
            );
        }

        if !self.is_local_endpoint() && self.api_token.is_none() {
            bail!(
                "CELLCHAT_API_TOKEN must be set for non-local endpoints (url: '{}')",
                self.api_url
            );
        }

        if self.welcome_message.trim().is_empty() {
            bail!("Welcome message must not be blank");
        }

        Ok(())
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs.clamp(
            MIN_STREAM_IDLE_TIMEOUT_SECS,
            MAX_STREAM_IDLE_TIMEOUT_SECS,
        ))
    }

    fn is_local_endpoint(&self) -> bool {
        is_local_endpoint_url(&self.api_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScopedEnv, ENV_LOCK};

    #[test]
    fn test_load_reads_environment_overrides() {
        let _env_lock = ENV_LOCK.blocking_lock();
        let _env = ScopedEnv::set(&[
            ("CELLCHAT_API_URL", Some("https://sheets.example.com/api")),
            ("CELLCHAT_API_TOKEN", Some("secret")),
            ("CELLCHAT_STREAMING", Some("off")),
            ("CELLCHAT_WELCOME_MESSAGE", Some("Hello there")),
            ("CELLCHAT_STREAM_IDLE_TIMEOUT_SECS", Some("1")),
        ]);

        let config = Config::load().expect("config loads");
        assert_eq!(config.api_url, "https://sheets.example.com/api");
        assert_eq!(config.api_token.as_deref(), Some("secret"));
        assert!(!config.streaming);
        assert_eq!(config.welcome_message, "Hello there");
        assert_eq!(config.stream_idle_timeout_secs, MIN_STREAM_IDLE_TIMEOUT_SECS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_defaults_when_unset() {
        let _env_lock = ENV_LOCK.blocking_lock();
        let _env = ScopedEnv::set(&[
            ("CELLCHAT_API_URL", None),
            ("CELLCHAT_API_TOKEN", Some("   ")),
            ("CELLCHAT_STREAMING", None),
            ("CELLCHAT_WELCOME_MESSAGE", None),
            ("CELLCHAT_STREAM_IDLE_TIMEOUT_SECS", None),
        ]);

        let config = Config::load().expect("config loads");
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert!(config.api_token.is_none());
        assert!(config.streaming);
        assert_eq!(
            config.stream_idle_timeout(),
            Duration::from_secs(DEFAULT_STREAM_IDLE_TIMEOUT_SECS)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_non_http_url() {
        let config = Config {
            api_url: "ftp://localhost/api".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_blank_welcome_message() {
        let config = Config {
            welcome_message: "  ".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}

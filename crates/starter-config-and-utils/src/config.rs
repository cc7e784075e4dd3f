//! Application configuration.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default backend URL (can be overridden at compile time via STARTER_BACKEND_URL).
pub const DEFAULT_BACKEND_URL: &str = match option_env!("STARTER_BACKEND_URL") {
    Some(url) => url,
    None => "https://example.supabase.co",
};

/// Default backend anon key (can be overridden at compile time via STARTER_BACKEND_ANON_KEY).
pub const DEFAULT_BACKEND_ANON_KEY: &str = match option_env!("STARTER_BACKEND_ANON_KEY") {
    Some(key) => key,
    None => "public-anon-key",
};

/// Default public site URL used to build auth redirect targets.
pub const DEFAULT_SITE_URL: &str = match option_env!("STARTER_SITE_URL") {
    Some(url) => url,
    None => "http://localhost:3000",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default per-request timeout for backend HTTP calls.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Backend project URL.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// Backend anonymous (publishable) API key.
    #[serde(default = "default_backend_anon_key")]
    pub backend_anon_key: String,
    /// Public site origin; OAuth and password-reset redirects point here.
    #[serde(default = "default_site_url")]
    pub site_url: String,
    /// Timeout applied to every backend HTTP request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_backend_url() -> String {
    DEFAULT_BACKEND_URL.to_string()
}

fn default_backend_anon_key() -> String {
    DEFAULT_BACKEND_ANON_KEY.to_string()
}

fn default_site_url() -> String {
    DEFAULT_SITE_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            backend_url: default_backend_url(),
            backend_anon_key: default_backend_anon_key(),
            site_url: default_site_url(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Create a Config with default values, then override from the environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from `config.json` under the base directory, falling
    /// back to defaults, then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `STARTER_*` overrides from the given lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(level) = get("STARTER_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(url) = get("STARTER_BACKEND_URL") {
            self.backend_url = url;
        }
        if let Some(key) = get("STARTER_BACKEND_ANON_KEY") {
            self.backend_anon_key = key;
        }
        if let Some(url) = get("STARTER_SITE_URL") {
            self.site_url = url;
        }
        if let Some(secs) = get("STARTER_REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.request_timeout_secs = secs;
        }
    }

    /// Check that URLs parse and required values are present.
    pub fn validate(&self) -> CoreResult<()> {
        self.backend_url()?;
        self.site_url()?;
        if self.backend_anon_key.trim().is_empty() {
            return Err(CoreError::Config("backend_anon_key must not be empty".to_string()));
        }
        Ok(())
    }

    /// Get the backend URL as a parsed URL.
    pub fn backend_url(&self) -> CoreResult<Url> {
        Url::parse(&self.backend_url).map_err(CoreError::from)
    }

    /// Get the site URL as a parsed URL.
    pub fn site_url(&self) -> CoreResult<Url> {
        Url::parse(&self.site_url).map_err(CoreError::from)
    }

    /// Redirect target for the OAuth callback (`{site}/auth/callback`).
    pub fn oauth_callback_url(&self) -> String {
        format!("{}/auth/callback", self.site_url.trim_end_matches('/'))
    }

    /// Redirect target for password-reset emails (`{site}/auth/reset-password`).
    pub fn password_reset_url(&self) -> String {
        format!("{}/auth/reset-password", self.site_url.trim_end_matches('/'))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.backend_url, DEFAULT_BACKEND_URL);
        assert_eq!(config.backend_anon_key, DEFAULT_BACKEND_ANON_KEY);
        assert_eq!(config.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_load_from_file_fills_missing_fields() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        std::fs::write(&config_path, r#"{ "log_level": "debug" }"#).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.site_url, DEFAULT_SITE_URL);
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config {
            log_level: "trace".to_string(),
            backend_url: "https://abc.supabase.co".to_string(),
            ..Config::default()
        };
        config.save(&paths).unwrap();

        let loaded = Config::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded.log_level, "trace");
        assert_eq!(loaded.backend_url, "https://abc.supabase.co");
    }

    #[test]
    fn test_overrides_ignore_empty_values() {
        let env: HashMap<&str, &str> = [
            ("STARTER_LOG_LEVEL", "warn"),
            ("STARTER_SITE_URL", "   "),
            ("STARTER_REQUEST_TIMEOUT_SECS", "5"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.log_level, "warn");
        assert_eq!(config.site_url, DEFAULT_SITE_URL);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_redirect_urls_strip_trailing_slash() {
        let config = Config {
            site_url: "https://app.example.com/".to_string(),
            ..Config::default()
        };
        assert_eq!(
            config.oauth_callback_url(),
            "https://app.example.com/auth/callback"
        );
        assert_eq!(
            config.password_reset_url(),
            "https://app.example.com/auth/reset-password"
        );
    }

    #[test]
    fn test_config_invalid_url() {
        let config = Config {
            backend_url: "not a valid url".to_string(),
            ..Config::default()
        };
        assert!(config.backend_url().is_err());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_empty_anon_key_rejected() {
        let config = Config {
            backend_anon_key: String::new(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }
}

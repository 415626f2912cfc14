//! Configuration management for the session core.

use crate::{CoreError, CoreResult, Paths, SessionTimings};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Default identity provider URL (can be overridden at compile time via LMS_SUPABASE_URL).
pub const DEFAULT_SUPABASE_URL: &str = match option_env!("LMS_SUPABASE_URL") {
    Some(url) => url,
    None => "https://lms-project.supabase.co",
};

/// Default publishable key (can be overridden at compile time via LMS_SUPABASE_PUBLISHABLE_KEY).
pub const DEFAULT_SUPABASE_PUBLISHABLE_KEY: &str =
    match option_env!("LMS_SUPABASE_PUBLISHABLE_KEY") {
        Some(key) => key,
        None => "lms-publishable-key",
    };

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const ENV_LOG_LEVEL: &str = "LMS_LOG_LEVEL";
const ENV_SUPABASE_URL: &str = "LMS_SUPABASE_URL";
const ENV_SUPABASE_PUBLISHABLE_KEY: &str = "LMS_SUPABASE_PUBLISHABLE_KEY";

/// Session core configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Identity provider project URL.
    #[serde(default = "default_supabase_url")]
    pub supabase_url: String,
    /// Publishable API key (public, safe to expose).
    #[serde(default = "default_supabase_publishable_key")]
    pub supabase_publishable_key: String,
    /// Timers, TTLs and retry policy.
    #[serde(default)]
    pub timings: SessionTimings,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_supabase_url() -> String {
    DEFAULT_SUPABASE_URL.to_string()
}

fn default_supabase_publishable_key() -> String {
    DEFAULT_SUPABASE_PUBLISHABLE_KEY.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            supabase_url: default_supabase_url(),
            supabase_publishable_key: default_supabase_publishable_key(),
            timings: SessionTimings::default(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration: defaults, then `config.json`, then environment.
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
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from a variable lookup. Empty values are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        if let Some(level) = get(ENV_LOG_LEVEL) {
            self.log_level = level;
        }
        if let Some(url) = get(ENV_SUPABASE_URL) {
            self.supabase_url = url;
        }
        if let Some(key) = get(ENV_SUPABASE_PUBLISHABLE_KEY) {
            self.supabase_publishable_key = key;
        }
    }

    /// Reject configurations the session core cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        self.supabase_url()?;
        if self.supabase_publishable_key.trim().is_empty() {
            return Err(CoreError::Config(
                "supabase_publishable_key must not be empty".to_string(),
            ));
        }
        self.timings.validate()
    }

    /// Get the identity provider URL as a parsed URL.
    pub fn supabase_url(&self) -> CoreResult<Url> {
        Url::parse(&self.supabase_url).map_err(CoreError::from)
    }
}

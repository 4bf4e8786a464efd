//! Runtime configuration: two required secrets and one tuning knob.
//!
//! Values come from an optional TOML file with environment variables layered
//! on top; `validate` runs after both and fails fast so a misconfigured
//! process never reaches the gateway.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Upper bound on entries tracked per correlation map before eviction.
pub const DEFAULT_CACHE_CAPACITY: usize = 5000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Discord bot token (from the Discord Developer Portal).
    #[serde(default)]
    pub discord_token: String,
    /// Instagram `sessionid` cookie used to authenticate scraping requests.
    #[serde(default)]
    pub instagram_session_id: String,
    /// Capacity of the reply-correlation store and the gateway message cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            instagram_session_id: String::new(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl Config {
    /// Load configuration: TOML file (if given) -> env overrides -> validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                toml::from_str(&contents)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?
            }
            None => Config::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply process-environment overrides on top of file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("DISCORD_TOKEN") {
            self.discord_token = token;
        }
        if let Some(session_id) = lookup("INSTA_SESSION_ID") {
            self.instagram_session_id = session_id;
        }
        if let Some(capacity) = lookup("GRAMLENS_CACHE_CAPACITY") {
            match capacity.parse::<usize>() {
                Ok(parsed) => self.cache_capacity = parsed,
                Err(_) => tracing::warn!(
                    "Ignoring GRAMLENS_CACHE_CAPACITY={capacity}: not a valid integer"
                ),
            }
        }
    }

    /// Validate configuration values that would cause runtime failures.
    ///
    /// Called after TOML deserialization and env-override application so an
    /// incomplete deployment dies with a diagnostic instead of failing at an
    /// arbitrary point mid-connection.
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!(
                "discord_token is required (set DISCORD_TOKEN or discord_token in the config file)"
            );
        }
        if self.instagram_session_id.trim().is_empty() {
            anyhow::bail!(
                "instagram_session_id is required (set INSTA_SESSION_ID or instagram_session_id in the config file)"
            );
        }
        if self.cache_capacity == 0 {
            anyhow::bail!("cache_capacity must be greater than 0");
        }
        Ok(())
    }
}

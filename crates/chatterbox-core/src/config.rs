//! Chatterbox configuration system.
//!
//! Values come from `~/.chatterbox/config.toml` (optional) and are then
//! overridden by environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BotError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Prefix that marks a chat message as a command.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Username the bot speaks as.
    #[serde(default = "default_username")]
    pub username: String,
    /// Channels joined at start-up.
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

fn default_prefix() -> String { "!".into() }
fn default_username() -> String { "chatterbox".into() }
fn default_database_path() -> String { "~/.chatterbox/chatterbox.db".into() }

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            username: default_username(),
            channels: Vec::new(),
            database_path: default_database_path(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl BotConfig {
    /// Load config from the default path, then apply the process environment.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load config from a specific path (no environment overrides).
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BotError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| BotError::Config(format!("Failed to parse config: {e}")))
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| BotError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Override fields from environment-style lookups.
    ///
    /// `lookup` returns the value of a variable, or `None` when unset.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(prefix) = lookup("PREFIX").filter(|p| !p.is_empty()) {
            self.prefix = prefix;
        }
        if let Some(username) = lookup("BOT_USERNAME").filter(|u| !u.is_empty()) {
            self.username = username.to_lowercase();
        }
        if let Some(channels) = lookup("CHANNELS") {
            self.channels = channels
                .split(',')
                .map(|c| c.trim().trim_start_matches('#').to_lowercase())
                .filter(|c| !c.is_empty())
                .collect();
        }
        if let Some(path) = lookup("DATABASE_PATH").filter(|p| !p.is_empty()) {
            self.database_path = path;
        }

        let d = &mut self.dispatch;
        if let Some(v) = lookup("MIN_SEND_INTERVAL") {
            d.min_send_interval_secs = parse_number("MIN_SEND_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("BYPASS_WINDOW") {
            d.bypass_window_secs = parse_number("BYPASS_WINDOW", &v)?;
        }
        if let Some(v) = lookup("RESEND_LIMIT") {
            d.resend_limit = parse_number("RESEND_LIMIT", &v)?;
        }
        if let Some(v) = lookup("POLL_INTERVAL") {
            d.poll_interval_secs = Some(parse_number("POLL_INTERVAL", &v)?);
        }
        if let Some(v) = lookup("LISTENER_CONFIRM") {
            d.listener_confirm = matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = lookup("DUPMSG_CHAR") {
            d.dupmsg_char = serde_json::from_str(&v)
                .map_err(|e| BotError::Config(format!("DUPMSG_CHAR must be a JSON array of code points: {e}")))?;
        }
        // Fail at load time rather than on the first duplicate send.
        d.bypass_sequence()?;
        Ok(())
    }

    /// Database path with `~` expanded.
    pub fn database_file(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database_path).to_string())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Chatterbox home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".chatterbox")
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BotError::Config(format!("{key} must be a non-negative integer, got '{value}'")))
}

/// Per-channel dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Minimum seconds between two sends on one channel.
    #[serde(default = "default_min_send_interval")]
    pub min_send_interval_secs: u64,
    /// A repeated response within this many seconds gets the bypass sequence appended.
    #[serde(default = "default_bypass_window")]
    pub bypass_window_secs: u64,
    /// Attempts beyond this count drop the queued response.
    #[serde(default = "default_resend_limit")]
    pub resend_limit: u32,
    /// Dispatcher tick period. Falls back to the minimum send interval.
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    /// Unicode code points appended to defeat duplicate-message suppression.
    #[serde(default = "default_dupmsg_char")]
    pub dupmsg_char: Vec<u32>,
    /// Only dequeue once the bot's own message is observed on the channel.
    #[serde(default)]
    pub listener_confirm: bool,
}

fn default_min_send_interval() -> u64 { 30 }
fn default_bypass_window() -> u64 { 30 }
fn default_resend_limit() -> u32 { 5 }
fn default_dupmsg_char() -> Vec<u32> { vec![917760] }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            min_send_interval_secs: default_min_send_interval(),
            bypass_window_secs: default_bypass_window(),
            resend_limit: default_resend_limit(),
            poll_interval_secs: None,
            dupmsg_char: default_dupmsg_char(),
            listener_confirm: false,
        }
    }
}

impl DispatchConfig {
    pub fn min_send_interval(&self) -> Duration {
        Duration::from_secs(self.min_send_interval_secs)
    }

    pub fn bypass_window(&self) -> Duration {
        Duration::from_secs(self.bypass_window_secs)
    }

    /// Tick period, never zero.
    pub fn poll_interval(&self) -> Duration {
        let secs = self.poll_interval_secs.unwrap_or(self.min_send_interval_secs);
        if secs == 0 {
            Duration::from_millis(100)
        } else {
            Duration::from_secs(secs)
        }
    }

    /// Decode `dupmsg_char` into the string appended to duplicate responses.
    pub fn bypass_sequence(&self) -> Result<String> {
        self.dupmsg_char
            .iter()
            .map(|&cp| {
                char::from_u32(cp)
                    .ok_or_else(|| BotError::Config(format!("DUPMSG_CHAR contains invalid code point {cp}")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults() {
        let config = BotConfig::default();
        assert_eq!(config.prefix, "!");
        assert_eq!(config.dispatch.min_send_interval_secs, 30);
        assert_eq!(config.dispatch.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.dispatch.bypass_sequence().unwrap(), "\u{E0000}");
    }

    #[test]
    fn test_env_overrides() {
        let vars = env(&[
            ("PREFIX", "?"),
            ("BOT_USERNAME", "MyBot"),
            ("CHANNELS", "#One, two ,,"),
            ("MIN_SEND_INTERVAL", "5"),
            ("DUPMSG_CHAR", "[32, 8203]"),
            ("LISTENER_CONFIRM", "true"),
        ]);
        let mut config = BotConfig::default();
        config.apply_env_with(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.prefix, "?");
        assert_eq!(config.username, "mybot");
        assert_eq!(config.channels, vec!["one", "two"]);
        assert_eq!(config.dispatch.min_send_interval_secs, 5);
        assert_eq!(config.dispatch.bypass_sequence().unwrap(), " \u{200B}");
        assert!(config.dispatch.listener_confirm);
    }

    #[test]
    fn test_invalid_env_values() {
        let vars = env(&[("MIN_SEND_INTERVAL", "soon")]);
        let mut config = BotConfig::default();
        assert!(config.apply_env_with(|k| vars.get(k).cloned()).is_err());

        // 0xD800 is a surrogate, not a char.
        let vars = env(&[("DUPMSG_CHAR", "[55296]")]);
        let mut config = BotConfig::default();
        assert!(matches!(
            config.apply_env_with(|k| vars.get(k).cloned()),
            Err(BotError::Config(_))
        ));
    }

    #[test]
    fn test_from_toml_partial() {
        let config = BotConfig::from_toml(
            r#"
            username = "helper"
            channels = ["somechannel"]

            [dispatch]
            resend_limit = 2
            poll_interval_secs = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.username, "helper");
        assert_eq!(config.prefix, "!");
        assert_eq!(config.dispatch.resend_limit, 2);
        assert_eq!(config.dispatch.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.dispatch.bypass_window_secs, 30);
    }
}

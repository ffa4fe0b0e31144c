//! Process configuration loading.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Process configuration for an engine host.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Platform credentials.
    pub bot: BotConfig,
    /// Durable storage.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Guilds the engine serves; empty means every guild the adapter sees.
    #[serde(default)]
    pub guilds: Vec<u64>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Path to a file holding the bot token, kept out of the config proper.
    pub token_path: String,
}

impl BotConfig {
    pub fn read_token(&self) -> Result<String, ConfigError> {
        Ok(std::fs::read_to_string(&self.token_path)?.trim().to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the record store.
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    "scrimd.redb".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses() {
        let config: Config = toml::from_str(
            r#"
[bot]
token_path = "data/bot.token"
"#,
        )
        .expect("parse");
        assert_eq!(config.bot.token_path, "data/bot.token");
        assert_eq!(config.storage.path, "scrimd.redb");
        assert!(config.guilds.is_empty());
    }

    #[test]
    fn full_config_parses() {
        let config: Config = toml::from_str(
            r#"
guilds = [908282497769558036]

[bot]
token_path = "token"

[storage]
path = "data/records.redb"
"#,
        )
        .expect("parse");
        assert_eq!(config.storage.path, "data/records.redb");
        assert_eq!(config.guilds, vec![908282497769558036]);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let error = Config::load("/nonexistent/scrimd.toml").unwrap_err();
        assert!(matches!(error, ConfigError::Io(_)));
    }
}

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::mqtt::config::{BrokerConfig, TopicConfig};

const CONFIG_DIR: &str = "traze-bridge";
const CONFIG_FILE: &str = "config.toml";

/// Complete bridge configuration as stored on disk.
///
/// Every field has a default, so a partial file only overrides what it names.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct BridgeConfig {
    pub broker: BrokerConfig,
    pub topics: TopicConfig,
}

impl BridgeConfig {
    pub fn default_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir().ok_or_else(|| eyre!("No config directory available"))?;
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    /// Writes the default configuration to `path` unless a file is already there.
    pub async fn ensure_default_config(path: &Path) -> Result<()> {
        if tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }

        let content = toml::to_string_pretty(&BridgeConfig::default())
            .map_err(|e| eyre!("Failed to serialize default config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write default config: {}", e))?;

        info!("Default config written to {}", path.display());
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

        let config: BridgeConfig = toml::from_str(&content)
            .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
        debug!("Loaded config from {}: {:?}", path.display(), config);
        Ok(config)
    }

    /// Loads an explicitly given file, or the default location after making sure it exists.
    pub async fn load_or_init(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path).await,
            None => {
                let path = Self::default_path()?;
                Self::ensure_default_config(&path).await?;
                Self::load(&path).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_config_is_written_once_and_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        BridgeConfig::ensure_default_config(&path).await.unwrap();
        let loaded = BridgeConfig::load(&path).await.unwrap();
        assert_eq!(loaded, BridgeConfig::default());

        tokio::fs::write(&path, "[topics]\nnamespace = \"mine\"\n")
            .await
            .unwrap();
        BridgeConfig::ensure_default_config(&path).await.unwrap();
        let kept = BridgeConfig::load(&path).await.unwrap();
        assert_eq!(kept.topics.namespace, "mine");
    }

    #[tokio::test]
    async fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(
            &path,
            "[broker]\nurl = \"ws://localhost:9001\"\nusername = \"bot\"\n",
        )
        .await
        .unwrap();

        let config = BridgeConfig::load_or_init(Some(&path)).await.unwrap();

        assert_eq!(config.broker.url, "ws://localhost:9001");
        assert_eq!(config.broker.username.as_deref(), Some("bot"));
        assert_eq!(config.broker.client_id, "traze-bridge");
        assert_eq!(config.topics, TopicConfig::default());
    }

    #[tokio::test]
    async fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        assert!(BridgeConfig::load_or_init(Some(&path)).await.is_err());
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(&path, "[broker\nurl = 3").await.unwrap();

        assert!(BridgeConfig::load(&path).await.is_err());
    }
}

//! Mailbox fixtures read from JSON files.

use std::path::Path;

use anyhow::{Context, Result};
use mailsearch_core::model::{EntityEventBatch, User};
use mailsearch_core::{IndexerConfig, Instance};
use serde::Deserialize;
use serde::de::DeserializeOwned;

/// A user and the entities their mailboxes consist of.
#[derive(Debug, Deserialize)]
pub struct Fixture {
    pub user: User,
    #[serde(default)]
    pub instances: Vec<Instance>,
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Invalid JSON in {}", path.display()))
}

pub async fn load_fixture(path: &Path) -> Result<Fixture> {
    read_json(path).await
}

pub async fn load_events(path: &Path) -> Result<Vec<EntityEventBatch>> {
    read_json(path).await
}

/// Loads the indexer configuration.
///
/// Without an explicit path the file in the user's config directory is used
/// if it exists, defaults otherwise.
pub async fn load_config(path: Option<&Path>) -> Result<IndexerConfig> {
    let default_path;
    let path = match path {
        Some(path) => path,
        None => {
            default_path = dirs::config_dir()
                .unwrap_or_else(|| std::path::PathBuf::from("."))
                .join("mailsearch")
                .join("config.json");
            if !default_path.exists() {
                return Ok(IndexerConfig::default());
            }
            &default_path
        }
    };

    let config: IndexerConfig = read_json(path).await?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}

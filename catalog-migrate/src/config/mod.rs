//! Configuration file handling
//!
//! Everything has a default, so a missing file is not an error. Secrets
//! never live here; see [`crate::api::salesforce`] for the environment
//! variables that carry them.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::transfer::LoadOptions;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Schema file replacing the built-in catalog schema
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<PathBuf>,
    pub target: TargetConfig,
    pub load: LoadConfig,
}

/// Target store connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_url: Option<String>,
    pub api_version: String,
    /// Records per create/update request
    pub batch_size: usize,
    /// Natural keys per lookup query
    pub query_chunk_size: usize,
}

impl Default for TargetConfig {
    fn default() -> Self {
        TargetConfig {
            instance_url: None,
            api_version: "v60.0".to_string(),
            batch_size: 200,
            query_chunk_size: 100,
        }
    }
}

/// Load behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Query the store for referenced records that were not staged
    pub lookup_external_references: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        LoadConfig {
            lookup_external_references: true,
        }
    }
}

impl From<&LoadConfig> for LoadOptions {
    fn from(config: &LoadConfig) -> Self {
        LoadOptions {
            lookup_external_references: config.lookup_external_references,
        }
    }
}

impl Config {
    /// `~/.config/catalog-migrate/config.toml` (platform equivalent)
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("catalog-migrate")
            .join("config.toml")
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicit path must exist; the default location may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (Self::default_path(), false),
        };

        if !path.exists() {
            if explicit {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            log::debug!("No config file at {}, using defaults", path.display());
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config TOML")
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions::from(&self.load)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.target.batch_size, 200);
        assert!(config.load_options().lookup_external_references);
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml_str(
            r#"
schema = "schemas/catalog.toml"

[target]
instance_url = "https://example.my.salesforce.com"
batch_size = 50

[load]
lookup_external_references = false
"#,
        )
        .unwrap();

        assert_eq!(config.schema, Some(PathBuf::from("schemas/catalog.toml")));
        assert_eq!(
            config.target.instance_url.as_deref(),
            Some("https://example.my.salesforce.com")
        );
        assert_eq!(config.target.batch_size, 50);
        assert_eq!(config.target.api_version, "v60.0");
        assert!(!config.load_options().lookup_external_references);
    }

    #[test]
    fn test_unknown_value_type_is_an_error() {
        assert!(Config::from_toml_str("[target]\nbatch_size = \"lots\"\n").is_err());
    }

    #[test]
    fn test_explicit_missing_path_is_an_error() {
        let path = std::env::temp_dir().join(format!("missing-{}.toml", uuid::Uuid::new_v4()));
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("catalog-migrate-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[target]\napi_version = \"v61.0\"\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(config.target.api_version, "v61.0");
    }
}

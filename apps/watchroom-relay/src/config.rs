//! Relay configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use watchroom_core::CatalogVideo;

/// Relay configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Port to bind the HTTP server to. `0` probes a fallback range.
    /// Override: `WATCHROOM_BIND_PORT`
    pub bind_port: u16,

    /// Origin prefixes allowed by CORS. Empty allows any origin.
    /// Override: `WATCHROOM_TRUSTED_ORIGINS` (comma separated)
    pub trusted_origins: Vec<String>,

    /// YAML list of catalog videos served at `/video/list`.
    /// Override: `WATCHROOM_CATALOG_FILE`
    pub catalog_file: Option<PathBuf>,

    /// Directory where the room directory is persisted across restarts.
    /// Override: `WATCHROOM_DATA_DIR`
    pub data_dir: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_port: 49500,
            trusted_origins: Vec::new(),
            catalog_file: None,
            data_dir: None,
        }
    }
}

impl RelayConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("WATCHROOM_TRUSTED_ORIGINS") {
            self.trusted_origins = parse_origins(&val);
        }

        // WATCHROOM_BIND_PORT, WATCHROOM_CATALOG_FILE and WATCHROOM_DATA_DIR are
        // handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Reads the catalog file, or returns an empty catalog when none is configured.
    pub fn load_catalog(&self) -> Result<Vec<CatalogVideo>> {
        let Some(path) = &self.catalog_file else {
            return Ok(Vec::new());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse catalog file: {}", path.display()))
    }
}

fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_fields_override_defaults() {
        let config: RelayConfig = serde_yaml::from_str(
            "bind_port: 8080\ntrusted_origins: [\"http://localhost\"]\n",
        )
        .unwrap();
        assert_eq!(config.bind_port, 8080);
        assert_eq!(config.trusted_origins, vec!["http://localhost".to_string()]);
        assert!(config.catalog_file.is_none());
    }

    #[test]
    fn origins_are_split_and_trimmed() {
        assert_eq!(
            parse_origins(" http://a , ,http://b"),
            vec!["http://a".to_string(), "http://b".to_string()]
        );
    }

    #[test]
    fn catalog_accepts_short_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.yaml");
        std::fs::write(
            &path,
            "- title: Intro.mp4\n  thumbnail: http://img/intro.png\n  duration: \"1:02\"\n",
        )
        .unwrap();

        let config = RelayConfig {
            catalog_file: Some(path),
            ..Default::default()
        };
        let catalog = config.load_catalog().unwrap();
        assert_eq!(catalog[0].thumbnail_url, "http://img/intro.png");
        assert_eq!(catalog[0].duration_label, "1:02");
    }
}

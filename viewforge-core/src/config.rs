//! View engine configuration
//!
//! Loaded from a JSON file; every field has a default so `{}` is a valid
//! configuration.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Which artifact tier `render` reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Hash the source on every render and use its compiled artifact.
    #[default]
    Compiled,
    /// Use the inlined artifact recorded in the manifest.
    Static,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewConfig {
    #[serde(default = "default_views_root")]
    pub views_root: PathBuf,
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default)]
    pub mode: CacheMode,
    #[serde(default)]
    pub app_url: String,
    #[serde(default = "default_asset_prefix")]
    pub asset_prefix: String,
    #[serde(default)]
    pub translations: BTreeMap<String, String>,
}

fn default_views_root() -> PathBuf { PathBuf::from("views") }
fn default_cache_root() -> PathBuf { PathBuf::from("cache/views") }
fn default_extension() -> String { "tpl".to_string() }
fn default_asset_prefix() -> String { "assets".to_string() }

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            views_root: default_views_root(),
            cache_root: default_cache_root(),
            extension: default_extension(),
            mode: CacheMode::default(),
            app_url: String::new(),
            asset_prefix: default_asset_prefix(),
            translations: BTreeMap::new(),
        }
    }
}

impl ViewConfig {
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config: ViewConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ViewConfig::default());
        assert_eq!(config.extension, "tpl");
        assert_eq!(config.mode, CacheMode::Compiled);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("views.json");
        fs::write(
            &path,
            r#"{"views_root": "app/views", "mode": "static", "translations": {"hi": "salut"}}"#,
        )
        .unwrap();
        let config = ViewConfig::load_from(&path).unwrap();
        assert_eq!(config.views_root, PathBuf::from("app/views"));
        assert_eq!(config.mode, CacheMode::Static);
        assert_eq!(config.translations["hi"], "salut");
        assert_eq!(config.asset_prefix, "assets");
    }

    #[test]
    fn test_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(ViewConfig::load_from(&missing), Err(ConfigError::Io { .. })));

        let bad = dir.path().join("bad.json");
        fs::write(&bad, r#"{"mode": "sometimes"}"#).unwrap();
        let err = ViewConfig::load_from(&bad).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.json"));
    }
}

//! Cache manifest
//!
//! `manifest.json` maps every view name to its compiled and static artifact
//! files. It is rewritten whole on each cache build and never patched.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::{ArtifactStore, StorageError};
use crate::ENGINE_VERSION;

/// Name of the manifest file within the cache root.
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Unix time the cache build started.
    pub created_at: i64,
    /// Seconds the build took.
    pub exec_time: f64,
    #[serde(default)]
    pub engine_version: String,
    /// View name to compiled artifact file.
    pub list: BTreeMap<String, String>,
    /// View name to static (inlined) artifact file.
    pub static_list: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            created_at: created_at.timestamp(),
            exec_time: 0.0,
            engine_version: ENGINE_VERSION.to_string(),
            list: BTreeMap::new(),
            static_list: BTreeMap::new(),
        }
    }

    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.created_at, 0).single()
    }

    /// Load the manifest from `store`.
    ///
    /// Returns `None` if it is absent, unreadable, unparsable or from an
    /// incompatible engine; the caller treats all of these as a cache miss.
    pub fn load(store: &dyn ArtifactStore) -> Option<Self> {
        let contents = match store.read(MANIFEST_FILE) {
            Ok(contents) => contents?,
            Err(e) => {
                warn!(error = %e, "failed to read cache manifest");
                return None;
            }
        };
        let manifest: Manifest = match serde_json::from_str(&contents) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(error = %e, "ignoring unparsable cache manifest");
                return None;
            }
        };
        if !manifest.is_compatible(ENGINE_VERSION) {
            warn!(found = %manifest.engine_version, current = ENGINE_VERSION, "ignoring manifest from another engine version");
            return None;
        }
        Some(manifest)
    }

    pub fn save(&self, store: &mut dyn ArtifactStore) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            StorageError::new(MANIFEST_FILE, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        store.write(MANIFEST_FILE, &json)
    }

    /// Same major and minor version as `current`.
    pub fn is_compatible(&self, current: &str) -> bool {
        match (semver::Version::parse(&self.engine_version), semver::Version::parse(current)) {
            (Ok(found), Ok(current)) => found.major == current.major && found.minor == current.minor,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn sample() -> Manifest {
        let mut manifest = Manifest::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        manifest.exec_time = 0.25;
        manifest.list.insert("home".into(), "aa.json".into());
        manifest.static_list.insert("home".into(), "static_bb.json".into());
        manifest
    }

    #[test]
    fn test_save_and_load() {
        let mut store = MemoryStore::new();
        sample().save(&mut store).unwrap();
        let loaded = Manifest::load(&store).unwrap();
        assert_eq!(loaded, sample());
        assert_eq!(loaded.created_at_utc().unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_json_keys() {
        let value = serde_json::to_value(sample()).unwrap();
        for key in ["created_at", "exec_time", "list", "static_list"] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(value["static_list"]["home"], "static_bb.json");
    }

    #[test]
    fn test_missing_manifest_is_none() {
        assert!(Manifest::load(&MemoryStore::new()).is_none());
    }

    #[test]
    fn test_half_written_manifest_is_none() {
        let mut store = MemoryStore::new();
        store.write(MANIFEST_FILE, r#"{"created_at": 17000"#).unwrap();
        assert!(Manifest::load(&store).is_none());
    }

    #[test]
    fn test_version_compatibility() {
        let mut manifest = sample();
        manifest.engine_version = "1.0.9".into();
        assert!(manifest.is_compatible("1.0.0"));
        manifest.engine_version = "1.1.0".into();
        assert!(!manifest.is_compatible("1.0.0"));
        manifest.engine_version = String::new();
        assert!(!manifest.is_compatible("1.0.0"));
    }
}

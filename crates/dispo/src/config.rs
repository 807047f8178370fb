//! Persisted grouping configuration, one JSON file per facility.
//!
//! Two formats are in circulation. Version 3 stores direct name-to-station
//! assignments; version 2 stored the inverse (station to member list) and
//! is normalized on load. Anything older is refused and the caller starts
//! from an empty grouping.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const CURRENT_VERSION: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported config version {found}")]
    UnsupportedVersion { found: u32 },
}

/// Platform-to-station and access-track-to-connection assignments.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Grouping {
    pub assignments: HashMap<String, String>,
    pub connections: HashMap<String, String>,
}

impl Grouping {
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty() && self.connections.is_empty()
    }
}

#[derive(Deserialize)]
struct FileHeader {
    #[serde(rename = "_version", default)]
    version: Option<u32>,
    #[serde(rename = "_build", default)]
    build: Option<u32>,
}

#[derive(Serialize, Deserialize)]
struct FileV3 {
    #[serde(rename = "_version")]
    version: u32,
    #[serde(rename = "_build")]
    build: u32,
    #[serde(default)]
    assignments: HashMap<String, String>,
    #[serde(default)]
    connections: HashMap<String, String>,
}

#[derive(Deserialize)]
struct FileV2 {
    #[serde(default)]
    platform_groups: HashMap<String, Vec<String>>,
    #[serde(default)]
    connection_groups: HashMap<String, Vec<String>>,
}

impl FileV2 {
    fn normalize(self) -> Grouping {
        Grouping {
            assignments: invert(self.platform_groups),
            connections: invert(self.connection_groups),
        }
    }
}

fn invert(groups: HashMap<String, Vec<String>>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for (group, members) in groups {
        for member in members {
            out.insert(member, group.clone());
        }
    }
    out
}

/// Directory-backed store, one file per facility id.
#[derive(Clone, Debug)]
pub struct GroupingStore {
    dir: PathBuf,
}

impl GroupingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, aid: u32) -> PathBuf {
        self.dir.join(format!("{aid}.json"))
    }

    /// Load the grouping for a facility. `build` is the facility's current
    /// build number; a stored file from another build still loads, with a
    /// warning.
    pub fn load(&self, aid: u32, build: u32) -> Result<Grouping, ConfigError> {
        let raw = fs::read_to_string(self.path_for(aid))?;
        let header: FileHeader = serde_json::from_str(&raw)?;
        let version = match header.version {
            Some(version) => version,
            None => {
                warn!(aid, "config carries no version marker, assuming 1");
                1
            }
        };
        if version < 2 {
            return Err(ConfigError::UnsupportedVersion { found: version });
        }
        if let Some(stored) = header.build {
            if stored != build {
                warn!(aid, stored, current = build, "config was written for another build");
            }
        }
        let grouping = if version == 2 {
            serde_json::from_str::<FileV2>(&raw)?.normalize()
        } else {
            let file: FileV3 = serde_json::from_str(&raw)?;
            Grouping {
                assignments: file.assignments,
                connections: file.connections,
            }
        };
        info!(aid, version, "loaded grouping config");
        Ok(grouping)
    }

    /// Load, falling back to an empty grouping when the file is missing or
    /// its version is unsupported. Parse and io errors other than
    /// not-found still surface.
    pub fn load_or_default(&self, aid: u32, build: u32) -> Result<Grouping, ConfigError> {
        match self.load(aid, build) {
            Ok(grouping) => Ok(grouping),
            Err(ConfigError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(Grouping::default())
            }
            Err(ConfigError::UnsupportedVersion { found }) => {
                warn!(aid, found, "ignoring config with unsupported version");
                Ok(Grouping::default())
            }
            Err(err) => Err(err),
        }
    }

    /// Persist in the current format.
    pub fn save(&self, aid: u32, build: u32, grouping: &Grouping) -> Result<(), ConfigError> {
        let file = FileV3 {
            version: CURRENT_VERSION,
            build,
            assignments: grouping.assignments.clone(),
            connections: grouping.connections.clone(),
        };
        if let Some(parent) = self.path_for(aid).parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(self.path_for(aid), serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(tag: &str) -> GroupingStore {
        let dir = std::env::temp_dir().join(format!(
            "stellwerk-config-{tag}-{}",
            std::process::id()
        ));
        GroupingStore::new(dir)
    }

    #[test]
    fn test_v3_roundtrip() {
        let store = temp_store("v3");
        let grouping = Grouping {
            assignments: HashMap::from([("A 1".to_string(), "Westdorf".to_string())]),
            connections: HashMap::from([("W".to_string(), "West".to_string())]),
        };
        store.save(77, 300, &grouping).unwrap();
        assert_eq!(store.load(77, 300).unwrap(), grouping);
    }

    #[test]
    fn test_v2_is_normalized() {
        let store = temp_store("v2");
        fs::create_dir_all(&store.dir).unwrap();
        fs::write(
            store.path_for(5),
            r#"{
                "_version": 2,
                "_build": 1,
                "platform_groups": { "Westdorf": ["A 1", "A 2"] },
                "connection_groups": { "West": ["W"] }
            }"#,
        )
        .unwrap();

        let grouping = store.load(5, 1).unwrap();
        assert_eq!(grouping.assignments.get("A 1"), Some(&"Westdorf".to_string()));
        assert_eq!(grouping.assignments.get("A 2"), Some(&"Westdorf".to_string()));
        assert_eq!(grouping.connections.get("W"), Some(&"West".to_string()));
    }

    #[test]
    fn test_old_version_is_refused_then_defaulted() {
        let store = temp_store("v1");
        fs::create_dir_all(&store.dir).unwrap();
        fs::write(store.path_for(6), r#"{ "_version": 1 }"#).unwrap();

        assert!(matches!(
            store.load(6, 1),
            Err(ConfigError::UnsupportedVersion { found: 1 })
        ));
        assert!(store.load_or_default(6, 1).unwrap().is_empty());
    }

    #[test]
    fn test_missing_version_counts_as_one() {
        let store = temp_store("none");
        fs::create_dir_all(&store.dir).unwrap();
        fs::write(store.path_for(7), r#"{ "platform_groups": {} }"#).unwrap();

        assert!(matches!(
            store.load(7, 1),
            Err(ConfigError::UnsupportedVersion { found: 1 })
        ));
    }

    #[test]
    fn test_missing_file_defaults() {
        let store = temp_store("missing");
        assert!(store.load_or_default(999, 1).unwrap().is_empty());
    }
}

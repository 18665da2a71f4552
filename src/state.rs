use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use converge::{ResourceRef, StateEntry, StateError, StateStore};

/// Highest state file version this build can read.
pub const STATE_VERSION: u32 = 1;

// ============================================================================
// State File Structure
// ============================================================================

/// On-disk layout of the recorded site state
#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    /// Format version, bumped on incompatible layout changes
    version: u32,

    /// Last time any entry was written or removed
    last_updated: DateTime<Utc>,

    /// Recorded entries keyed by resource address
    #[serde(default)]
    resources: BTreeMap<ResourceRef, StateEntry>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            last_updated: Utc::now(),
            resources: BTreeMap::new(),
        }
    }
}

// ============================================================================
// File Store
// ============================================================================

/// JSON state store, rewritten atomically after every recorded change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<StateFile, StateError> {
        if !self.path.exists() {
            log::debug!("state file {} does not exist, starting empty", self.path.display());
            return Ok(StateFile::default());
        }

        let content = fs::read_to_string(&self.path).map_err(|source| StateError::Read {
            path: self.path.clone(),
            source,
        })?;

        let file: StateFile = serde_json::from_str(&content)
            .map_err(|e| StateError::Corrupt(format!("{}: {e}", self.path.display())))?;

        if file.version > STATE_VERSION {
            return Err(StateError::Version {
                found: file.version,
                supported: STATE_VERSION,
            });
        }

        Ok(file)
    }

    /// Write via a sibling temp file and rename, so a crash mid-write
    /// never leaves a truncated state file behind.
    fn write(&self, file: &StateFile) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| StateError::Write {
                    path: self.path.clone(),
                    source,
                })?;
            }
        }

        let content = serde_json::to_string_pretty(file).map_err(|e| StateError::Write {
            path: self.path.clone(),
            source: io::Error::other(e),
        })?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(|source| StateError::Write {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| StateError::Write {
            path: self.path.clone(),
            source,
        })?;

        log::debug!("wrote {} entries to {}", file.resources.len(), self.path.display());
        Ok(())
    }
}

impl StateStore for FileStore {
    fn load(&self) -> Result<BTreeMap<ResourceRef, StateEntry>, StateError> {
        Ok(self.read()?.resources)
    }

    fn save(&mut self, entry: StateEntry) -> Result<(), StateError> {
        let mut file = self.read()?;
        file.resources.insert(entry.resource.clone(), entry);
        file.last_updated = Utc::now();
        self.write(&file)
    }

    fn remove(&mut self, address: &ResourceRef) -> Result<(), StateError> {
        let mut file = self.read()?;
        if file.resources.remove(address).is_none() {
            return Ok(());
        }
        file.last_updated = Utc::now();
        self.write(&file)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use converge::ObservedState;
    use serde_json::json;

    fn entry(kind: &str, name: &str) -> StateEntry {
        StateEntry {
            resource: ResourceRef::new(kind, name),
            observed: ObservedState::new(format!("arn:local:{kind}/{name}"))
                .attr("arn", json!(format!("arn:local:{kind}/{name}"))),
            dependencies: vec![],
        }
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("terral.state.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terral.state.json");

        let mut store = FileStore::new(&path);
        store.save(entry("object_store", "audio")).unwrap();
        store.save(entry("identity_role", "runtime")).unwrap();

        let reloaded = FileStore::new(&path).load().unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains_key(&ResourceRef::new("object_store", "audio")));

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"version\": 1"));
        assert!(raw.contains("last_updated"));
    }

    #[test]
    fn test_save_replaces_existing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path().join("terral.state.json"));

        store.save(entry("object_store", "audio")).unwrap();
        let mut updated = entry("object_store", "audio");
        updated
            .observed
            .attributes
            .insert("region".to_string(), json!("local-2"));
        store.save(updated).unwrap();

        let entries = store.load().unwrap();
        assert_eq!(entries.len(), 1);
        let observed = &entries[&ResourceRef::new("object_store", "audio")].observed;
        assert_eq!(observed.get("region"), Some(&json!("local-2")));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path().join("terral.state.json"));

        store.save(entry("object_store", "audio")).unwrap();
        let address = ResourceRef::new("object_store", "audio");
        store.remove(&address).unwrap();
        store.remove(&address).unwrap();

        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path().join("nested").join("deep").join("state.json"));
        store.save(entry("object_store", "audio")).unwrap();
        assert_eq!(store.load().unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terral.state.json");
        fs::write(&path, "{ not json").unwrap();

        let store = FileStore::new(&path);
        assert!(matches!(store.load(), Err(StateError::Corrupt(_))));
    }

    #[test]
    fn test_newer_version_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terral.state.json");
        fs::write(
            &path,
            r#"{"version": 99, "last_updated": "2026-01-01T00:00:00Z", "resources": {}}"#,
        )
        .unwrap();

        let store = FileStore::new(&path);
        assert!(matches!(
            store.load(),
            Err(StateError::Version {
                found: 99,
                supported: STATE_VERSION,
            })
        ));
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terral.state.json");
        let mut store = FileStore::new(&path);
        store.save(entry("object_store", "audio")).unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }
}

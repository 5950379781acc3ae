//! Store Registry
//!
//! Persists which uploaded file handles belong to which logical store.
//! The registry is a single pretty-printed JSON object keyed by store name,
//! rewritten atomically on every change.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

type Stores = BTreeMap<String, Vec<StoredFile>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store '{0}' not found")]
    NotFound(String),

    #[error("Store name must not be empty")]
    InvalidName,

    #[error("Store registry I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Store registry at {} is not valid JSON: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Custom metadata attached to an upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomMetadata {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_value: Option<f64>,
}

impl CustomMetadata {
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            string_value: Some(value.into()),
            numeric_value: None,
        }
    }

    pub fn numeric(key: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            string_value: None,
            numeric_value: Some(value),
        }
    }
}

/// A file tracked in a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFile {
    /// Remote file handle ("files/abc123")
    pub name: String,
    pub display_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    #[serde(default)]
    pub metadata: Vec<CustomMetadata>,
}

/// Per-store summary for listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSummary {
    pub name: String,
    pub file_count: usize,
    pub total_bytes: u64,
}

/// JSON-backed mapping of store name to its files
pub struct StoreRegistry {
    path: PathBuf,
    stores: RwLock<Stores>,
}

fn validate_name(name: &str) -> Result<&str, StoreError> {
    let name = name.trim();
    if name.is_empty() {
        Err(StoreError::InvalidName)
    } else {
        Ok(name)
    }
}

impl StoreRegistry {
    /// Load the registry from `path`; a missing file is an empty registry
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let stores = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => Stores::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| StoreError::Json {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Stores::new(),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.clone(),
                    source,
                })
            }
        };

        debug!(path = %path.display(), stores = stores.len(), "Loaded store registry");

        Ok(Self {
            path,
            stores: RwLock::new(stores),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> RwLockReadGuard<'_, Stores> {
        self.stores.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Stores> {
        self.stores.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write the registry atomically (temp file + rename)
    fn save(&self, stores: &Stores) -> Result<(), StoreError> {
        let io_err = |source: io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(io_err)?;

        let json = serde_json::to_vec_pretty(stores).map_err(|source| StoreError::Json {
            path: self.path.clone(),
            source,
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        debug!(path = %self.path.display(), "Saved store registry");
        Ok(())
    }

    /// Persist `next` and only then make it the in-memory state, so a failed
    /// write leaves both copies as they were
    fn commit(&self, stores: &mut Stores, next: Stores) -> Result<(), StoreError> {
        self.save(&next)?;
        *stores = next;
        Ok(())
    }

    /// Create an empty store; returns false if it already existed
    pub fn create_store(&self, name: &str) -> Result<bool, StoreError> {
        let name = validate_name(name)?;
        let mut stores = self.write();
        if stores.contains_key(name) {
            return Ok(false);
        }
        let mut next = stores.clone();
        next.insert(name.to_string(), Vec::new());
        self.commit(&mut stores, next)?;
        info!(store = name, "Created store");
        Ok(true)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name.trim())
    }

    pub fn list_stores(&self) -> Vec<StoreSummary> {
        self.read()
            .iter()
            .map(|(name, files)| StoreSummary {
                name: name.clone(),
                file_count: files.len(),
                total_bytes: files.iter().map(|f| f.size_bytes).sum(),
            })
            .collect()
    }

    /// Files of a store, in upload order
    pub fn list_files(&self, name: &str) -> Result<Vec<StoredFile>, StoreError> {
        self.read()
            .get(name.trim())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    /// Handles of a store, in upload order
    pub fn get_handles(&self, name: &str) -> Result<Vec<String>, StoreError> {
        self.read()
            .get(name.trim())
            .map(|files| files.iter().map(|f| f.name.clone()).collect())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    /// Track a file in a store, creating the store if needed.
    /// Re-adding a handle replaces its record in place.
    pub fn add_file(&self, store: &str, file: StoredFile) -> Result<(), StoreError> {
        let store = validate_name(store)?;
        let mut stores = self.write();
        let mut next = stores.clone();
        let files = next.entry(store.to_string()).or_default();
        match files.iter_mut().find(|f| f.name == file.name) {
            Some(existing) => *existing = file,
            None => files.push(file),
        }
        self.commit(&mut stores, next)
    }

    /// Add several records to a store at once, skipping handles it already has
    pub fn add_files(&self, store: &str, new_files: Vec<StoredFile>) -> Result<usize, StoreError> {
        let store = validate_name(store)?;
        let mut stores = self.write();
        let mut next = stores.clone();
        let files = next.entry(store.to_string()).or_default();
        let mut seen: HashSet<String> = files.iter().map(|f| f.name.clone()).collect();

        let mut added = 0;
        for file in new_files {
            if seen.insert(file.name.clone()) {
                files.push(file);
                added += 1;
            }
        }
        self.commit(&mut stores, next)?;
        Ok(added)
    }

    /// Remove a store, returning the files it tracked so the caller can
    /// clean them up remotely
    pub fn delete_store(&self, name: &str) -> Result<Vec<StoredFile>, StoreError> {
        let mut stores = self.write();
        let mut next = stores.clone();
        let files = next
            .remove(name.trim())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        self.commit(&mut stores, next)?;
        info!(store = name, files = files.len(), "Deleted store");
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn file(name: &str, size: u64) -> StoredFile {
        StoredFile {
            name: name.to_string(),
            display_name: format!("{}.txt", name.trim_start_matches("files/")),
            size_bytes: size,
            mime_type: "text/plain".to_string(),
            metadata: vec![],
        }
    }

    fn registry() -> (TempDir, StoreRegistry) {
        let dir = TempDir::new().unwrap();
        let registry = StoreRegistry::load(dir.path().join("data").join("stores.json")).unwrap();
        (dir, registry)
    }

    #[test]
    fn test_missing_file_is_empty_registry() {
        let (_dir, registry) = registry();
        assert!(registry.list_stores().is_empty());
        assert!(!registry.contains("docs"));
    }

    #[test]
    fn test_handles_keep_upload_order_and_persist() {
        let (_dir, registry) = registry();
        registry.create_store("docs").unwrap();
        registry.add_file("docs", file("files/b", 20)).unwrap();
        registry.add_file("docs", file("files/a", 10)).unwrap();

        assert_eq!(
            registry.get_handles("docs").unwrap(),
            vec!["files/b".to_string(), "files/a".to_string()]
        );

        let reloaded = StoreRegistry::load(registry.path()).unwrap();
        assert_eq!(reloaded.list_files("docs").unwrap(), registry.list_files("docs").unwrap());
        assert_eq!(
            reloaded.list_stores(),
            vec![StoreSummary {
                name: "docs".into(),
                file_count: 2,
                total_bytes: 30
            }]
        );
    }

    #[test]
    fn test_unknown_store_is_not_found() {
        let (_dir, registry) = registry();
        assert!(matches!(
            registry.get_handles("nope"),
            Err(StoreError::NotFound(name)) if name == "nope"
        ));
        assert!(matches!(registry.list_files("nope"), Err(StoreError::NotFound(_))));
        assert!(matches!(registry.delete_store("nope"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_create_store_is_idempotent() {
        let (_dir, registry) = registry();
        assert!(registry.create_store("docs").unwrap());
        registry.add_file("docs", file("files/a", 1)).unwrap();
        assert!(!registry.create_store("docs").unwrap());
        assert_eq!(registry.get_handles("docs").unwrap().len(), 1);
        assert!(matches!(registry.create_store("  "), Err(StoreError::InvalidName)));
    }

    #[test]
    fn test_add_file_creates_store_and_replaces_duplicates() {
        let (_dir, registry) = registry();
        registry.add_file("new", file("files/a", 1)).unwrap();
        registry.add_file("new", file("files/a", 5)).unwrap();

        let files = registry.list_files("new").unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size_bytes, 5);
    }

    #[test]
    fn test_add_files_skips_known_handles() {
        let (_dir, registry) = registry();
        registry.add_file("docs", file("files/a", 1)).unwrap();
        let added = registry
            .add_files("docs", vec![file("files/a", 1), file("files/b", 2), file("files/b", 2)])
            .unwrap();
        assert_eq!(added, 1);
        assert_eq!(registry.get_handles("docs").unwrap().len(), 2);
    }

    #[test]
    fn test_delete_store_returns_files() {
        let (_dir, registry) = registry();
        registry.add_file("docs", file("files/a", 1)).unwrap();
        let removed = registry.delete_store("docs").unwrap();
        assert_eq!(removed.len(), 1);
        assert!(!registry.contains("docs"));

        let reloaded = StoreRegistry::load(registry.path()).unwrap();
        assert!(!reloaded.contains("docs"));
    }

    #[test]
    fn test_reads_registry_written_by_hand() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stores.json");
        fs::write(
            &path,
            r#"{
              "manuals": [
                {
                  "name": "files/xyz",
                  "display_name": "guide.pdf",
                  "size_bytes": 2048,
                  "mime_type": "application/pdf",
                  "metadata": [{"key": "document_type", "string_value": "manual"}]
                },
                {
                  "name": "files/old",
                  "display_name": "legacy.txt",
                  "size_bytes": 10,
                  "mime_type": "text/plain"
                }
              ]
            }"#,
        )
        .unwrap();

        let registry = StoreRegistry::load(&path).unwrap();
        let files = registry.list_files("manuals").unwrap();
        assert_eq!(files[0].metadata, vec![CustomMetadata::string("document_type", "manual")]);
        assert!(files[1].metadata.is_empty());
    }

    #[test]
    fn test_failed_save_leaves_state_unchanged() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("data");
        let registry = StoreRegistry::load(data.join("stores.json")).unwrap();
        registry.add_file("kept", file("files/a", 1)).unwrap();

        // a regular file where the data directory should be makes every save fail
        fs::remove_dir_all(&data).unwrap();
        fs::write(&data, "blocker").unwrap();

        assert!(matches!(registry.create_store("docs"), Err(StoreError::Io { .. })));
        assert!(!registry.contains("docs"));
        assert!(registry.create_store("docs").is_err());

        assert!(registry.add_file("kept", file("files/b", 2)).is_err());
        assert!(registry.add_files("kept", vec![file("files/c", 3)]).is_err());
        assert_eq!(registry.get_handles("kept").unwrap(), vec!["files/a".to_string()]);

        assert!(registry.delete_store("kept").is_err());
        assert!(registry.contains("kept"));
    }

    #[test]
    fn test_corrupt_registry_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stores.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(StoreRegistry::load(&path), Err(StoreError::Json { .. })));
    }
}

//! Durable storage for workflow instances.
//!
//! One JSON document per instance with optimistic version control: every
//! save names the version it read and loses to any concurrent writer that
//! committed in between. Writers hold an exclusive advisory lock on a
//! sidecar lock file for the whole check-then-write; readers take the
//! shared lock. The document itself is replaced via temp file + rename, so
//! a reader observes either the old document or the new one, never a torn
//! write.

use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::errors::CoordinatorError;
use crate::instance::WorkflowInstance;

/// Durable document store for one instance per id.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the current document for an instance.
    async fn load(&self, id: &str) -> Result<WorkflowInstance, CoordinatorError>;

    /// Persists the instance if the stored version still matches
    /// `expected_version`. Returns the new version. The caller's reaction
    /// to a version conflict is reload-and-retry, never overwrite.
    async fn save(
        &self,
        instance: &WorkflowInstance,
        expected_version: u64,
    ) -> Result<u64, CoordinatorError>;
}

/// File-backed state store: `<root>/<id>.json` plus `<root>/<id>.lock`.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn document_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.json", id))
    }

    fn lock_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.lock", id))
    }

    fn open_lock(&self, id: &str) -> Result<File, CoordinatorError> {
        std::fs::create_dir_all(&self.root).map_err(storage_error)?;
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path(id))
            .map_err(storage_error)
    }

    fn read_document(path: &Path, id: &str) -> Result<WorkflowInstance, CoordinatorError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CoordinatorError::InstanceNotFound { id: id.to_string() })
            }
            Err(e) => return Err(storage_error(e)),
        };
        serde_json::from_str(&content).map_err(|e| CoordinatorError::Storage {
            message: format!("malformed document {}: {}", path.display(), e),
        })
    }

    fn save_locked(
        &self,
        instance: &WorkflowInstance,
        expected_version: u64,
    ) -> Result<u64, CoordinatorError> {
        let path = self.document_path(&instance.id);

        let stored_version = match Self::read_document(&path, &instance.id) {
            Ok(document) => document.version,
            Err(CoordinatorError::InstanceNotFound { .. }) => 0,
            Err(e) => return Err(e),
        };
        if stored_version != expected_version {
            return Err(CoordinatorError::VersionConflict {
                expected: expected_version,
                actual: stored_version,
            });
        }

        let mut persisted = instance.clone();
        persisted.version = expected_version + 1;
        let content =
            serde_json::to_string_pretty(&persisted).map_err(|e| CoordinatorError::Storage {
                message: format!("failed to serialize instance {}: {}", instance.id, e),
            })?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content).map_err(storage_error)?;
        std::fs::rename(&tmp_path, &path).map_err(storage_error)?;

        tracing::debug!(
            instance = %instance.id,
            version = persisted.version,
            "saved workflow document"
        );
        Ok(persisted.version)
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, id: &str) -> Result<WorkflowInstance, CoordinatorError> {
        let lock = self.open_lock(id)?;
        lock.lock_shared().map_err(storage_error)?;
        // Lock released when the handle drops.
        Self::read_document(&self.document_path(id), id)
    }

    async fn save(
        &self,
        instance: &WorkflowInstance,
        expected_version: u64,
    ) -> Result<u64, CoordinatorError> {
        let lock = self.open_lock(&instance.id)?;
        lock.lock_exclusive().map_err(storage_error)?;
        self.save_locked(instance, expected_version)
    }
}

fn storage_error(e: std::io::Error) -> CoordinatorError {
    CoordinatorError::Storage {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::WorkflowKind;
    use std::collections::BTreeMap;

    fn fresh_instance(id: &str) -> WorkflowInstance {
        WorkflowInstance::new(id, "A title", WorkflowKind::Feature, &BTreeMap::new())
    }

    #[tokio::test]
    async fn test_save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().to_path_buf());

        let instance = fresh_instance("dark-mode");
        let version = store.save(&instance, 0).await.unwrap();
        assert_eq!(version, 1);

        let loaded = store.load("dark-mode").await.unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.id, "dark-mode");
        assert_eq!(loaded.phases, instance.phases);
    }

    #[tokio::test]
    async fn test_load_missing_instance() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().to_path_buf());

        let err = store.load("ghost").await.unwrap_err();
        assert_eq!(
            err,
            CoordinatorError::InstanceNotFound {
                id: "ghost".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_stale_save_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().to_path_buf());

        let instance = fresh_instance("payments");
        store.save(&instance, 0).await.unwrap();

        // Two workers load version 1; the first save wins.
        let first = store.load("payments").await.unwrap();
        let second = store.load("payments").await.unwrap();
        assert_eq!(store.save(&first, first.version).await.unwrap(), 2);

        let err = store.save(&second, second.version).await.unwrap_err();
        assert_eq!(
            err,
            CoordinatorError::VersionConflict {
                expected: 1,
                actual: 2,
            }
        );

        // The losing writer reloads and retries - the standard reaction.
        let reloaded = store.load("payments").await.unwrap();
        assert_eq!(store.save(&reloaded, reloaded.version).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_versions_are_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().to_path_buf());

        let instance = fresh_instance("epic-1");
        let mut version = store.save(&instance, 0).await.unwrap();
        for _ in 0..5 {
            let current = store.load("epic-1").await.unwrap();
            version = store.save(&current, current.version).await.unwrap();
        }
        assert_eq!(version, 6);
    }

    #[tokio::test]
    async fn test_no_temp_file_survives_a_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().to_path_buf());
        store.save(&fresh_instance("tidy"), 0).await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "got: {:?}", leftovers);
    }

    #[tokio::test]
    async fn test_new_instance_must_be_saved_with_version_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().to_path_buf());

        let err = store.save(&fresh_instance("early"), 3).await.unwrap_err();
        assert_eq!(
            err,
            CoordinatorError::VersionConflict {
                expected: 3,
                actual: 0,
            }
        );
    }
}

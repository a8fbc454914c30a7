//! Durable storage port for the persisted subsets.
//!
//! Containers project their state to a serializable subset (`Persist`) and
//! hand it to a `StateStorage` backend under a store name. Projection is a pure
//! function so it can be tested without any backend.
//!
//! - `FileStorage`: one `<name>.json` per store, atomic replace.
//! - `MemoryStorage`: process-local map, used by tests and ephemeral runs.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::container::Container;
use crate::error::StoreError;

/// Current envelope version written by `write_persisted`.
pub const SNAPSHOT_VERSION: u32 = 0;

/// Key-value persistence medium keyed by store name.
pub trait StateStorage: Send + Sync {
    fn load(&self, name: &str) -> Result<Option<Value>, StoreError>;
    fn save(&self, name: &str, value: &Value) -> Result<(), StoreError>;
    fn remove(&self, name: &str) -> Result<(), StoreError>;
}

pub type SharedStorage = Arc<dyn StateStorage>;

/// Projection of a container state onto its durable fields.
pub trait Persist: Sized {
    /// Storage key for this container.
    const STORE_NAME: &'static str;

    type Persisted: Serialize + DeserializeOwned + PartialEq;

    /// Pure projection from full state to the persisted subset.
    fn persisted(&self) -> Self::Persisted;

    /// Build a fresh state from a persisted subset; everything outside the
    /// subset takes its default.
    fn rehydrate(persisted: Self::Persisted) -> Self;
}

/// On-disk wrapper around a persisted subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub state: T,
    #[serde(default)]
    pub version: u32,
}

/// Read and rehydrate a container state. Missing, unreadable or incompatible
/// snapshots yield `S::default()`.
pub fn read_persisted<S>(storage: &dyn StateStorage) -> S
where
    S: Persist + Default,
{
    match try_read_persisted::<S>(storage) {
        Ok(Some(state)) => state,
        Ok(None) => S::default(),
        Err(e) => {
            log::warn!(
                "Ignoring persisted state for '{}': {}",
                S::STORE_NAME,
                e
            );
            S::default()
        }
    }
}

fn try_read_persisted<S: Persist>(storage: &dyn StateStorage) -> Result<Option<S>, StoreError> {
    let Some(raw) = storage.load(S::STORE_NAME)? else {
        return Ok(None);
    };
    let envelope: Envelope<S::Persisted> = serde_json::from_value(raw)?;
    if envelope.version > SNAPSHOT_VERSION {
        return Err(StoreError::UnsupportedVersion {
            name: S::STORE_NAME.to_string(),
            version: envelope.version,
        });
    }
    Ok(Some(S::rehydrate(envelope.state)))
}

/// Write the persisted subset of `state`.
pub fn write_persisted<S: Persist>(storage: &dyn StateStorage, state: &S) -> Result<(), StoreError> {
    let envelope = Envelope {
        state: state.persisted(),
        version: SNAPSHOT_VERSION,
    };
    let value = serde_json::to_value(&envelope)?;
    storage.save(S::STORE_NAME, &value)
}

/// Write back only when the persisted projection changed. Failures are logged.
pub fn sync_persisted<S: Persist>(storage: &dyn StateStorage, before: &S, after: &S) {
    if before.persisted() == after.persisted() {
        return;
    }
    if let Err(e) = write_persisted(storage, after) {
        log::warn!("Failed to persist '{}': {}", S::STORE_NAME, e);
    }
}

/// Container whose persisted subset is written back after each transition.
///
/// The transition and the save run under one write lock, so storage receives
/// snapshots in the order they were published. Readers never take the lock.
pub struct PersistedContainer<S> {
    state: Container<S>,
    storage: SharedStorage,
    write: Mutex<()>,
}

impl<S: Persist + Default> PersistedContainer<S> {
    /// Rehydrate from `storage`, falling back to `S::default()`.
    pub fn open(storage: SharedStorage) -> Self {
        let initial: S = read_persisted(storage.as_ref());
        Self {
            state: Container::new(initial),
            storage,
            write: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Arc<S> {
        self.state.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<S>> {
        self.state.subscribe()
    }

    pub fn transition(&self, next: impl FnOnce(&S) -> S) -> Arc<S> {
        let _write = self.write.lock();
        let (before, after) = self.state.transition(next);
        sync_persisted(self.storage.as_ref(), before.as_ref(), after.as_ref());
        after
    }
}

// ============================================================================
// File backend
// ============================================================================

/// Stores each container snapshot as `<dir>/<name>.json`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Open a storage directory, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))
                    .map_err(|e| StoreError::io(&dir, e))?;
            }
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }
}

impl StateStorage for FileStorage {
    fn load(&self, name: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(name);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, name: &str, value: &Value) -> Result<(), StoreError> {
        let path = self.path_for(name);
        let content = serde_json::to_vec_pretty(value)?;
        atomic_write(&self.dir, &path, &content)
    }

    fn remove(&self, name: &str) -> Result<(), StoreError> {
        let path = self.path_for(name);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
        }
        Ok(())
    }
}

fn atomic_write(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    temp.write_all(bytes).map_err(|e| StoreError::io(path, e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| StoreError::io(path, e))?;
    temp.persist(path)
        .map_err(|err| StoreError::io(path, err.error))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| StoreError::io(path, e))?;
    }
    Ok(())
}

// ============================================================================
// Memory backend
// ============================================================================

/// In-process storage. Clones share the same map, so a "reload" in tests is a
/// new container built over a clone of the same `MemoryStorage`.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.entries.lock().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl StateStorage for MemoryStorage {
    fn load(&self, name: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.lock().get(name).cloned())
    }

    fn save(&self, name: &str, value: &Value) -> Result<(), StoreError> {
        self.entries.lock().insert(name.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Counter {
        kept: u32,
        scratch: u32,
    }

    impl Persist for Counter {
        const STORE_NAME: &'static str = "counter";
        type Persisted = u32;

        fn persisted(&self) -> u32 {
            self.kept
        }

        fn rehydrate(kept: u32) -> Self {
            Counter {
                kept,
                ..Counter::default()
            }
        }
    }

    #[test]
    fn test_file_storage_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::open(dir.path().join("state")).expect("open");

        let state = Counter { kept: 7, scratch: 3 };
        write_persisted(&storage, &state).expect("write");

        assert!(dir.path().join("state").join("counter.json").exists());
        let loaded: Counter = read_persisted(&storage);
        assert_eq!(loaded, Counter { kept: 7, scratch: 0 });
    }

    #[test]
    fn test_file_storage_remove_missing_is_ok() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::open(dir.path()).expect("open");
        storage.remove("nothing-here").expect("remove");
        assert!(storage.load("nothing-here").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_snapshot_falls_back_to_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::open(dir.path()).expect("open");
        std::fs::write(dir.path().join("counter.json"), "{ not json").unwrap();

        let loaded: Counter = read_persisted(&storage);
        assert_eq!(loaded, Counter::default());
    }

    #[test]
    fn test_newer_snapshot_version_is_ignored() {
        let storage = MemoryStorage::new();
        storage
            .save("counter", &serde_json::json!({ "state": 9, "version": 5 }))
            .unwrap();
        let loaded: Counter = read_persisted(&storage);
        assert_eq!(loaded.kept, 0);
    }

    #[test]
    fn test_sync_skips_unchanged_projection() {
        let storage = MemoryStorage::new();
        let before = Counter { kept: 1, scratch: 0 };
        let after = Counter { kept: 1, scratch: 5 };
        sync_persisted(&storage, &before, &after);
        assert!(storage.is_empty());

        let after = Counter { kept: 2, scratch: 5 };
        sync_persisted(&storage, &before, &after);
        assert_eq!(
            storage.get("counter"),
            Some(serde_json::json!({ "state": 2, "version": 0 }))
        );
    }
}

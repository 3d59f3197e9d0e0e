//! State store: last-applied records, one per resource identity.
//!
//! The store is shared by the applier's worker threads, so every
//! implementation is `Send + Sync` with interior locking. A run takes an
//! exclusive [`StateLock`] for its whole duration.

use crate::error::{Error, Result};
use crate::types::{Attributes, ResourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Current on-disk state format
pub const STATE_VERSION: u32 = 1;

/// Persisted record of one applied resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Provider-assigned identifier
    pub id: String,
    /// Resolved attributes sent to the provider
    pub attributes: Attributes,
    /// Outputs returned by the provider
    #[serde(default)]
    pub outputs: Attributes,
    /// Resources this one depended on when it was applied
    #[serde(default)]
    pub dependencies: Vec<ResourceId>,
    /// Old instance left behind by a create-before-destroy replacement
    /// whose destroy has not succeeded yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposed: Option<String>,
    /// Last time this record was written
    pub updated_at: DateTime<Utc>,
}

impl StateRecord {
    pub fn new(id: impl Into<String>, attributes: Attributes, outputs: Attributes) -> Self {
        Self {
            id: id.into(),
            attributes,
            outputs,
            dependencies: Vec::new(),
            deposed: None,
            updated_at: Utc::now(),
        }
    }
}

/// All records, keyed by identity
pub type Snapshot = BTreeMap<ResourceId, StateRecord>;

/// Last failure of a resource, kept until it applies successfully
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Failures, keyed by identity
pub type Failures = BTreeMap<ResourceId, FailureRecord>;

/// Storage for state records
pub trait StateStore: Send + Sync {
    /// Look a record up
    fn get(&self, id: &ResourceId) -> Result<Option<StateRecord>>;

    /// Insert or replace a record (durable when this returns)
    fn put(&self, id: &ResourceId, record: StateRecord) -> Result<()>;

    /// Remove a record (durable when this returns); absent is not an error
    fn delete(&self, id: &ResourceId) -> Result<()>;

    /// Copy of every record
    fn snapshot(&self) -> Result<Snapshot>;

    /// Take the single-writer lock for a run.
    ///
    /// Stores backed by shared storage reload it here, so snapshots taken
    /// after locking see every earlier commit.
    fn lock(&self) -> Result<StateLock>;

    /// Persist the error of a failed node
    fn record_failure(&self, id: &ResourceId, error: &str) -> Result<()>;

    /// Failures not yet cleared by a successful apply
    fn failures(&self) -> Result<Failures>;
}

/// Single-writer guard; released on drop
pub struct StateLock {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl StateLock {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for StateLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateLock").finish_non_exhaustive()
    }
}

fn acquire<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::Other("state store mutex poisoned".to_string()))
}

// ============================================================================
// In-memory store
// ============================================================================

/// Volatile store, used for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Snapshot>,
    failures: Mutex<Failures>,
    locked: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing snapshot
    pub fn with_records(records: Snapshot) -> Self {
        Self {
            records: Mutex::new(records),
            failures: Mutex::default(),
            locked: Arc::default(),
        }
    }
}

impl StateStore for MemoryStore {
    fn get(&self, id: &ResourceId) -> Result<Option<StateRecord>> {
        Ok(acquire(&self.records)?.get(id).cloned())
    }

    fn put(&self, id: &ResourceId, record: StateRecord) -> Result<()> {
        acquire(&self.records)?.insert(id.clone(), record);
        acquire(&self.failures)?.remove(id);
        Ok(())
    }

    fn delete(&self, id: &ResourceId) -> Result<()> {
        acquire(&self.records)?.remove(id);
        acquire(&self.failures)?.remove(id);
        Ok(())
    }

    fn snapshot(&self) -> Result<Snapshot> {
        Ok(acquire(&self.records)?.clone())
    }

    fn lock(&self) -> Result<StateLock> {
        if self.locked.swap(true, Ordering::SeqCst) {
            return Err(Error::StateLocked {
                path: PathBuf::from("<memory>"),
            });
        }
        let locked = Arc::clone(&self.locked);
        Ok(StateLock::new(move || locked.store(false, Ordering::SeqCst)))
    }

    fn record_failure(&self, id: &ResourceId, error: &str) -> Result<()> {
        acquire(&self.failures)?.insert(
            id.clone(),
            FailureRecord {
                error: error.to_string(),
                at: Utc::now(),
            },
        );
        Ok(())
    }

    fn failures(&self) -> Result<Failures> {
        Ok(acquire(&self.failures)?.clone())
    }
}

// ============================================================================
// File store
// ============================================================================

/// On-disk state document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    /// Incremented on every write
    pub serial: u64,
    #[serde(default)]
    pub resources: Snapshot,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: Failures,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            resources: Snapshot::new(),
            failures: Failures::new(),
        }
    }
}

/// JSON state file with a sidecar lock file.
///
/// Every `put`/`delete` rewrites the whole document through a temporary
/// file and a rename, so a crash never leaves a half-written state.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    state: Mutex<StateFile>,
}

impl FileStore {
    /// Open the state file, starting empty if it does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = Self::read(&path)?;
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    fn read(path: &Path) -> Result<StateFile> {
        if !path.exists() {
            log::debug!("State file {} does not exist, starting empty", path.display());
            return Ok(StateFile::default());
        }
        let content = fs::read_to_string(path)?;
        let state: StateFile =
            serde_json::from_str(&content).map_err(|e| Error::StateCorruption {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        if state.version > STATE_VERSION {
            return Err(Error::StateCorruption {
                path: path.to_path_buf(),
                message: format!("unsupported state version {}", state.version),
            });
        }
        log::debug!(
            "Loaded {} state records from {} (serial {})",
            state.resources.len(),
            path.display(),
            state.serial
        );
        Ok(state)
    }

    /// State file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock file location for a state file
    pub fn lock_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Remove a stale lock left behind by a crashed run
    pub fn force_unlock(path: &Path) -> Result<bool> {
        match fs::remove_file(Self::lock_path(path)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Current serial number
    pub fn serial(&self) -> Result<u64> {
        Ok(acquire(&self.state)?.serial)
    }

    fn modify(&self, change: impl FnOnce(&mut StateFile)) -> Result<()> {
        let mut state = acquire(&self.state)?;
        let mut next = state.clone();
        change(&mut next);
        next.serial += 1;
        self.persist(&next)?;
        *state = next;
        Ok(())
    }

    fn persist(&self, state: &StateFile) -> Result<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(state)?;
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let mut file = fs::File::create(&tmp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &self.path)?;
        log::trace!("Saved state to {} (serial {})", self.path.display(), state.serial);
        Ok(())
    }
}

impl StateStore for FileStore {
    fn get(&self, id: &ResourceId) -> Result<Option<StateRecord>> {
        Ok(acquire(&self.state)?.resources.get(id).cloned())
    }

    fn put(&self, id: &ResourceId, record: StateRecord) -> Result<()> {
        self.modify(|state| {
            state.resources.insert(id.clone(), record);
            state.failures.remove(id);
        })
    }

    fn delete(&self, id: &ResourceId) -> Result<()> {
        self.modify(|state| {
            state.resources.remove(id);
            state.failures.remove(id);
        })
    }

    fn snapshot(&self) -> Result<Snapshot> {
        Ok(acquire(&self.state)?.resources.clone())
    }

    fn lock(&self) -> Result<StateLock> {
        let lock_path = Self::lock_path(&self.path);
        if let Some(dir) = lock_path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::StateLocked { path: lock_path });
            }
            Err(e) => return Err(e.into()),
        };
        let guard = {
            let lock_path = lock_path.clone();
            StateLock::new(move || {
                if let Err(e) = fs::remove_file(&lock_path) {
                    log::warn!("Failed to release state lock {}: {}", lock_path.display(), e);
                }
            })
        };
        writeln!(file, "pid={} at={}", std::process::id(), Utc::now().to_rfc3339())?;

        // another run may have committed since open()
        let current = Self::read(&self.path)?;
        *acquire(&self.state)? = current;
        log::debug!("Acquired state lock {}", lock_path.display());
        Ok(guard)
    }

    fn record_failure(&self, id: &ResourceId, error: &str) -> Result<()> {
        self.modify(|state| {
            state.failures.insert(
                id.clone(),
                FailureRecord {
                    error: error.to_string(),
                    at: Utc::now(),
                },
            );
        })
    }

    fn failures(&self) -> Result<Failures> {
        Ok(acquire(&self.state)?.failures.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(id: &str) -> StateRecord {
        let mut attributes = Attributes::new();
        attributes.insert("cidr_block".into(), json!("10.0.0.0/16"));
        StateRecord::new(id, attributes.clone(), attributes)
    }

    #[test]
    fn test_memory_store_crud() {
        let store = MemoryStore::new();
        let id = ResourceId::new("aws_vpc", "main");
        assert!(store.get(&id).unwrap().is_none());

        store.put(&id, record("vpc-1")).unwrap();
        assert_eq!(store.get(&id).unwrap().unwrap().id, "vpc-1");

        store.delete(&id).unwrap();
        assert!(store.snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_memory_lock_is_exclusive() {
        let store = MemoryStore::new();
        let guard = store.lock().unwrap();
        assert!(matches!(store.lock(), Err(Error::StateLocked { .. })));
        drop(guard);
        assert!(store.lock().is_ok());
    }

    #[test]
    fn test_file_store_survives_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("terrace.state.json");
        let id = ResourceId::new("aws_vpc", "main");

        let store = FileStore::open(&path).unwrap();
        store.put(&id, record("vpc-1")).unwrap();
        assert_eq!(store.serial().unwrap(), 1);
        drop(store);

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get(&id).unwrap().unwrap().id, "vpc-1");
        reopened.delete(&id).unwrap();
        assert_eq!(reopened.serial().unwrap(), 2);
        assert!(FileStore::open(&path).unwrap().snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_file_lock_refuses_second_writer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let first = FileStore::open(&path).unwrap();
        let second = FileStore::open(&path).unwrap();

        let guard = first.lock().unwrap();
        assert!(matches!(second.lock(), Err(Error::StateLocked { .. })));
        drop(guard);
        assert!(!FileStore::lock_path(&path).exists());
        assert!(second.lock().is_ok());
    }

    #[test]
    fn test_lock_reloads_commits_from_other_runs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let a = FileStore::open(&path).unwrap();
        let b = FileStore::open(&path).unwrap();

        {
            let _guard = b.lock().unwrap();
            b.put(&ResourceId::new("res", "from_b"), record("b-1")).unwrap();
        }
        let _guard = a.lock().unwrap();
        assert!(a.get(&ResourceId::new("res", "from_b")).unwrap().is_some());
        a.put(&ResourceId::new("res", "from_a"), record("a-1")).unwrap();

        let on_disk = FileStore::open(&path).unwrap().snapshot().unwrap();
        let names: Vec<&str> = on_disk.keys().map(|id| id.name.as_str()).collect();
        assert_eq!(names, ["from_a", "from_b"]);
        assert_eq!(a.serial().unwrap(), 2);
    }

    #[test]
    fn test_lock_released_when_reload_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let store = FileStore::open(&path).unwrap();
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(store.lock(), Err(Error::StateCorruption { .. })));
        assert!(!FileStore::lock_path(&path).exists());
    }

    #[test]
    fn test_failure_cleared_by_success() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let id = ResourceId::new("aws_instance", "web");

        let store = FileStore::open(&path).unwrap();
        store.record_failure(&id, "quota exceeded").unwrap();
        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.failures().unwrap()[&id].error, "quota exceeded");

        reopened.put(&id, record("i-1")).unwrap();
        assert!(reopened.failures().unwrap().is_empty());
    }

    #[test]
    fn test_force_unlock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(FileStore::lock_path(&path), "stale").unwrap();
        assert!(FileStore::force_unlock(&path).unwrap());
        assert!(!FileStore::force_unlock(&path).unwrap());
    }

    #[test]
    fn test_corrupt_state_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            FileStore::open(&path),
            Err(Error::StateCorruption { .. })
        ));
    }

    #[test]
    fn test_future_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"version": 99, "serial": 1, "resources": {}}"#).unwrap();
        assert!(matches!(
            FileStore::open(&path),
            Err(Error::StateCorruption { .. })
        ));
    }
}

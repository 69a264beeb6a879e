//! Test harnesses

use crate::config::CoordinatorConfig;
use crate::coordinator::ReplicationCoordinator;
use crate::store::{JsonFileStore, MemoryStore};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Coordinator over two in-memory stores
pub type MemoryCoordinator<T> = ReplicationCoordinator<T, MemoryStore<T>, MemoryStore<T>>;

/// Coordinator over empty in-memory stores named `cloud` and `local`
pub fn memory_coordinator<T>(name: &str) -> MemoryCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    memory_coordinator_with(
        CoordinatorConfig::new(name),
        MemoryStore::new("cloud"),
        MemoryStore::new("local"),
    )
}

/// Coordinator over the given in-memory stores
///
/// # Panics
///
/// Panics if `config` is invalid.
pub fn memory_coordinator_with<T>(
    config: CoordinatorConfig,
    primary: MemoryStore<T>,
    secondary: MemoryStore<T>,
) -> MemoryCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    match ReplicationCoordinator::new(config, primary, secondary) {
        Ok(coordinator) => coordinator,
        Err(e) => panic!("invalid test coordinator configuration: {e}"),
    }
}

/// Temporary directory for file-backed stores, removed on drop
pub struct TestContext {
    dir: TempDir,
}

impl TestContext {
    /// Create a fresh context
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    pub fn new() -> Self {
        match TempDir::new() {
            Ok(dir) => Self { dir },
            Err(e) => panic!("failed to create test directory: {e}"),
        }
    }

    /// Context root
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of a store file inside the context
    pub fn store_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(format!("{name}.json"))
    }

    /// Open (or reopen) a file store inside the context
    ///
    /// # Panics
    ///
    /// Panics if the store file cannot be opened.
    pub fn file_store<T>(&self, name: &str) -> JsonFileStore<T>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        match JsonFileStore::open(self.store_path(name)) {
            Ok(store) => store,
            Err(e) => panic!("failed to open {name}: {e}"),
        }
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

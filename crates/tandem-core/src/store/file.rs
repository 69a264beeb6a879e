//! JSON file store handle
//!
//! Keeps the whole collection in memory and rewrites the backing file on
//! every mutation. Writes go to a temporary file in the same directory which
//! is then renamed over the target, so a crash never leaves a torn file.
//! With verification enabled (the default) the file is re-read after each
//! write and compared against what was meant to be stored; in-memory state
//! only advances once that check passes.

use crate::classify::StoreError;
use crate::query::Query;
use crate::record::{Key, Record};
use crate::store::{StoreHandle, StoreResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// File-backed store
pub struct JsonFileStore<T> {
    name: String,
    path: PathBuf,
    records: RwLock<BTreeMap<Key, Record<T>>>,
    verify_writes: bool,
}

impl<T> JsonFileStore<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Open the store at `path`, creating parent directories if needed
    ///
    /// A missing or empty file is an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut records = BTreeMap::new();

        if path.exists() {
            let bytes = fs::read(&path)?;
            if !bytes.is_empty() {
                let stored: Vec<Record<T>> = serde_json::from_slice(&bytes)?;
                for record in stored {
                    let key = record.key.ok_or_else(|| {
                        StoreError::validation(format!(
                            "{}: stored record {} has no key",
                            path.display(),
                            record.uid
                        ))
                    })?;
                    records.insert(key, record);
                }
            }
        } else if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        tracing::debug!("Opened {} with {} records", path.display(), records.len());

        Ok(Self {
            name,
            path,
            records: RwLock::new(records),
            verify_writes: true,
        })
    }

    /// Override the store name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Enable or disable the post-write verifying re-read
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify_writes = verify;
        self
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Check whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Apply `change` to a copy of the collection, persist it, then swap it in
    fn commit<R>(
        &self,
        change: impl FnOnce(&mut BTreeMap<Key, Record<T>>) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let mut records = self.records.write();
        let mut next = records.clone();
        let out = change(&mut next)?;

        self.persist(&next)?;
        if self.verify_writes {
            self.verify(&next)?;
        }

        *records = next;
        Ok(out)
    }

    fn persist(&self, records: &BTreeMap<Key, Record<T>>) -> Result<(), StoreError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        let values: Vec<&Record<T>> = records.values().collect();
        serde_json::to_writer_pretty(&mut tmp, &values)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    fn verify(&self, expected: &BTreeMap<Key, Record<T>>) -> Result<(), StoreError> {
        let on_disk: serde_json::Value = serde_json::from_slice(&fs::read(&self.path)?)?;
        let values: Vec<&Record<T>> = expected.values().collect();
        if on_disk != serde_json::to_value(&values)? {
            return Err(StoreError::conflict(format!(
                "{}: contents differ from what was written",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn missing(&self, key: Key) -> StoreError {
        StoreError::not_found(format!("{}: no record with key {}", self.name, key))
    }
}

#[async_trait]
impl<T> StoreHandle<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert(&self, mut record: Record<T>) -> StoreResult<Record<T>> {
        let stored = self.commit(|records| {
            let key = match record.key {
                Some(key) if records.contains_key(&key) => {
                    return Err(StoreError::constraint(format!(
                        "{}: key {} already exists",
                        self.name, key
                    )));
                }
                Some(key) => key,
                None => records
                    .keys()
                    .next_back()
                    .and_then(|k| k.checked_next())
                    .unwrap_or(Key::new(1)),
            };
            record.key = Some(key);
            records.insert(key, record.clone());
            Ok(record)
        })?;
        Ok(stored)
    }

    async fn update(&self, record: Record<T>) -> StoreResult<Record<T>> {
        let key = record
            .key
            .ok_or_else(|| StoreError::validation("update requires a keyed record"))?;
        let stored = self.commit(|records| match records.get_mut(&key) {
            Some(slot) => {
                *slot = record.clone();
                Ok(record)
            }
            None => Err(self.missing(key)),
        })?;
        Ok(stored)
    }

    async fn find_by_key(&self, key: Key) -> StoreResult<Record<T>> {
        let records = self.records.read();
        records
            .get(&key)
            .cloned()
            .ok_or_else(|| self.missing(key).into())
    }

    async fn query(&self, query: &Query<T>) -> StoreResult<Vec<Record<T>>> {
        let records = self.records.read();
        Ok(query.apply(records.values()))
    }

    async fn delete(&self, key: Key) -> StoreResult<()> {
        self.commit(|records| match records.remove(&key) {
            Some(_) => Ok(()),
            None => Err(self.missing(key)),
        })?;
        Ok(())
    }

    async fn max_key(&self) -> StoreResult<Option<Key>> {
        Ok(self.records.read().keys().next_back().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Origin;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    fn note(text: &str) -> Record<Note> {
        Record::new(Note { text: text.into() })
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("local").join("notes.json");

        let store = JsonFileStore::open(&path).unwrap();
        let mut local = note("offline").with_key(Key::new(1 << 48));
        local.origin = Origin::Local;
        store.insert(note("first")).await.unwrap();
        store.insert(local.clone()).await.unwrap();
        assert_eq!(store.name(), "notes");

        let reopened: JsonFileStore<Note> = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        let back = reopened.find_by_key(Key::new(1 << 48)).await.unwrap();
        assert_eq!(back, local);
        assert_eq!(reopened.max_key().await.unwrap(), Some(Key::new(1 << 48)));
    }

    #[tokio::test]
    async fn test_failed_insert_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.json");
        let store = JsonFileStore::open(&path).unwrap();

        let record = note("a").with_key(Key::new(3));
        store.insert(record.clone()).await.unwrap();
        let before = fs::read(&path).unwrap();

        let err = store.insert(record).await.unwrap_err();
        assert!(!err.is_connectivity());
        assert_eq!(fs::read(&path).unwrap(), before);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("notes.json")).unwrap();

        let mut stored = store.insert(note("draft")).await.unwrap();
        stored.body.text = "final".into();
        store.update(stored.clone()).await.unwrap();
        let key = stored.key.unwrap();
        assert_eq!(store.find_by_key(key).await.unwrap().body.text, "final");

        store.delete(key).await.unwrap();
        assert!(store.delete(key).await.unwrap_err().is_not_found());
        assert!(store.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_a_logic_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.json");
        fs::write(&path, b"{not json").unwrap();

        let err = match JsonFileStore::<Note>::open(&path) {
            Ok(_) => panic!("corrupt file opened"),
            Err(err) => err,
        };
        assert_eq!(crate::classify(&err), crate::FailureKind::Logic);
    }
}

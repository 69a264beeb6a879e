//! In-memory store handle
//!
//! `MemoryStore` backs tests and single-process deployments. It supports
//! fault injection (fail every call, a specific operation, or the next N
//! calls), optional per-call latency to widen race windows, and per-operation
//! call counters. A failing call never touches stored state.

use crate::classify::StoreError;
use crate::query::Query;
use crate::record::{Key, Record};
use crate::store::{StoreHandle, StoreOp, StoreResult};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Builds the error a fault rule raises
pub type ErrorFactory = Arc<dyn Fn() -> StoreError + Send + Sync>;

/// Injected failure
#[derive(Clone)]
pub struct FaultRule {
    op: Option<StoreOp>,
    remaining: Option<u32>,
    make: ErrorFactory,
}

impl FaultRule {
    /// Fail every call with the error built by `make`
    pub fn always(make: impl Fn() -> StoreError + Send + Sync + 'static) -> Self {
        Self {
            op: None,
            remaining: None,
            make: Arc::new(make),
        }
    }

    /// Only fail calls to `op`
    pub fn on(mut self, op: StoreOp) -> Self {
        self.op = Some(op);
        self
    }

    /// Only fail the next `n` matching calls
    pub fn times(mut self, n: u32) -> Self {
        self.remaining = Some(n);
        self
    }

    fn applies_to(&self, op: StoreOp) -> bool {
        self.op.is_none_or(|target| target == op)
    }
}

impl fmt::Debug for FaultRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultRule")
            .field("op", &self.op)
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}

/// In-memory store
pub struct MemoryStore<T> {
    name: String,
    records: RwLock<BTreeMap<Key, Record<T>>>,
    faults: Mutex<Vec<FaultRule>>,
    calls: Mutex<HashMap<StoreOp, u64>>,
    latency: Option<Duration>,
}

impl<T> MemoryStore<T> {
    /// Create an empty store
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: RwLock::new(BTreeMap::new()),
            faults: Mutex::new(Vec::new()),
            calls: Mutex::new(HashMap::new()),
            latency: None,
        }
    }

    /// Sleep for `latency` inside every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Seed the store; unkeyed records get the next free key
    pub fn with_records(self, seed: impl IntoIterator<Item = Record<T>>) -> Self {
        {
            let mut records = self.records.write();
            for mut record in seed {
                let key = record.key.unwrap_or_else(|| next_key(&records));
                record.key = Some(key);
                records.insert(key, record);
            }
        }
        self
    }

    /// Add a fault rule; rules are checked in insertion order
    pub fn inject(&self, rule: FaultRule) {
        self.faults.lock().push(rule);
    }

    /// Make every call fail as unreachable
    pub fn set_unreachable(&self) {
        let name = self.name.clone();
        self.inject(FaultRule::always(move || {
            StoreError::unreachable(format!("{name} is not reachable"))
        }));
    }

    /// Remove every fault rule
    pub fn heal(&self) {
        self.faults.lock().clear();
    }

    /// Calls made to `op`, including failed ones
    pub fn calls(&self, op: StoreOp) -> u64 {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    /// Calls made to any operation
    pub fn total_calls(&self) -> u64 {
        self.calls.lock().values().sum()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Check whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Peek at a record, bypassing faults and counters
    pub fn get(&self, key: Key) -> Option<Record<T>>
    where
        T: Clone,
    {
        self.records.read().get(&key).cloned()
    }

    /// Every stored record in key order, bypassing faults and counters
    pub fn snapshot(&self) -> Vec<Record<T>>
    where
        T: Clone,
    {
        self.records.read().values().cloned().collect()
    }

    /// Count the call and raise an injected fault, if one applies
    fn begin(&self, op: StoreOp) -> Result<(), StoreError> {
        *self.calls.lock().entry(op).or_insert(0) += 1;

        let mut faults = self.faults.lock();
        let Some(index) = faults.iter().position(|rule| rule.applies_to(op)) else {
            return Ok(());
        };
        let err = (faults[index].make)();
        if let Some(remaining) = faults[index].remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                faults.remove(index);
            }
        }
        Err(err)
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn missing(&self, key: Key) -> StoreError {
        StoreError::not_found(format!("{}: no record with key {}", self.name, key))
    }
}

fn next_key<T>(records: &BTreeMap<Key, Record<T>>) -> Key {
    records
        .keys()
        .next_back()
        .and_then(|k| k.checked_next())
        .unwrap_or(Key::new(1))
}

#[async_trait]
impl<T> StoreHandle<T> for MemoryStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert(&self, mut record: Record<T>) -> StoreResult<Record<T>> {
        self.begin(StoreOp::Insert)?;
        self.pause().await;

        let mut records = self.records.write();
        let key = match record.key {
            Some(key) if records.contains_key(&key) => {
                return Err(StoreError::constraint(format!(
                    "{}: key {} already exists",
                    self.name, key
                ))
                .into());
            }
            Some(key) => key,
            None => next_key(&records),
        };
        record.key = Some(key);
        records.insert(key, record.clone());
        Ok(record)
    }

    async fn update(&self, record: Record<T>) -> StoreResult<Record<T>> {
        self.begin(StoreOp::Update)?;
        self.pause().await;

        let key = record
            .key
            .ok_or_else(|| StoreError::validation("update requires a keyed record"))?;
        let mut records = self.records.write();
        match records.get_mut(&key) {
            Some(slot) => {
                *slot = record.clone();
                Ok(record)
            }
            None => Err(self.missing(key).into()),
        }
    }

    async fn find_by_key(&self, key: Key) -> StoreResult<Record<T>> {
        self.begin(StoreOp::FindByKey)?;
        self.pause().await;

        let records = self.records.read();
        records
            .get(&key)
            .cloned()
            .ok_or_else(|| self.missing(key).into())
    }

    async fn query(&self, query: &Query<T>) -> StoreResult<Vec<Record<T>>> {
        self.begin(StoreOp::Query)?;
        self.pause().await;

        let records = self.records.read();
        Ok(query.apply(records.values()))
    }

    async fn delete(&self, key: Key) -> StoreResult<()> {
        self.begin(StoreOp::Delete)?;
        self.pause().await;

        match self.records.write().remove(&key) {
            Some(_) => Ok(()),
            None => Err(self.missing(key).into()),
        }
    }

    async fn max_key(&self) -> StoreResult<Option<Key>> {
        self.begin(StoreOp::MaxKey)?;
        self.pause().await;

        Ok(self.records.read().keys().next_back().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::FailureKind;

    fn store() -> MemoryStore<String> {
        MemoryStore::new("local")
    }

    #[tokio::test]
    async fn test_insert_assigns_sequential_keys() {
        let store = store();
        let a = store.insert(Record::new("a".into())).await.unwrap();
        let b = store.insert(Record::new("b".into())).await.unwrap();
        assert_eq!(a.key, Some(Key::new(1)));
        assert_eq!(b.key, Some(Key::new(2)));
        assert_eq!(store.max_key().await.unwrap(), Some(Key::new(2)));
    }

    #[tokio::test]
    async fn test_insert_with_taken_key_is_constraint_violation() {
        let store = store();
        let record = Record::new("a".to_string()).with_key(Key::new(9));
        store.insert(record.clone()).await.unwrap();

        let err = store.insert(record).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Logic);
        assert!(matches!(err.error(), StoreError::ConstraintViolation(_)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_key() {
        let store = store();
        let record = Record::new("ghost".to_string()).with_key(Key::new(4));
        assert!(store.update(record).await.unwrap_err().is_not_found());
        assert!(store.delete(Key::new(4)).await.unwrap_err().is_not_found());
        assert!(store.find_by_key(Key::new(4)).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_unreachable_fails_every_call_without_mutation() {
        let store = store().with_records([Record::new("seed".to_string())]);
        store.set_unreachable();

        let err = store.insert(Record::new("x".into())).await.unwrap_err();
        assert!(err.is_connectivity());
        assert!(store.delete(Key::new(1)).await.unwrap_err().is_connectivity());
        assert_eq!(store.len(), 1);
        assert_eq!(store.total_calls(), 2);

        store.heal();
        assert!(store.find_by_key(Key::new(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_fault_on_single_op_for_n_calls() {
        let store = store();
        store.inject(
            FaultRule::always(|| StoreError::timeout("insert"))
                .on(StoreOp::Insert)
                .times(2),
        );

        assert!(store.query(&Query::all()).await.is_ok());
        assert!(store.insert(Record::new("1".into())).await.is_err());
        assert!(store.insert(Record::new("2".into())).await.is_err());
        assert!(store.insert(Record::new("3".into())).await.is_ok());
        assert_eq!(store.calls(StoreOp::Insert), 3);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_seeded_records_keep_their_keys() {
        let store = MemoryStore::new("cloud").with_records([
            Record::new(1u32).with_key(Key::new(40)),
            Record::new(2u32),
        ]);
        assert_eq!(store.get(Key::new(40)).map(|r| r.body), Some(1));
        assert_eq!(store.get(Key::new(41)).map(|r| r.body), Some(2));
    }
}

//! Store handles
//!
//! A [`StoreHandle`] is the coordinator's view of one datastore. Adapters
//! classify their own failures through [`ClassifiedError`] (usually just `?`
//! on a [`StoreError`](crate::classify::StoreError)) and must not leave a
//! half-applied change behind when they fail: an adapter whose backend cannot
//! guarantee that performs a verifying re-read before reporting success.
//!
//! Handles are not idempotent: `insert` twice creates two records. The
//! coordinator owns idempotency.

pub mod file;
pub mod memory;

pub use file::JsonFileStore;
pub use memory::{FaultRule, MemoryStore};

use crate::classify::ClassifiedError;
use crate::query::Query;
use crate::record::{Key, Record};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type returned by store handles
pub type StoreResult<T> = std::result::Result<T, ClassifiedError>;

/// Role a store plays behind a coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreRole {
    /// Authoritative store while reachable
    Primary,
    /// Resilience backstop
    Secondary,
}

impl fmt::Display for StoreRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// Store handle operations, used for fault injection and call accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `insert`
    Insert,
    /// `update`
    Update,
    /// `find_by_key`
    FindByKey,
    /// `query`
    Query,
    /// `delete`
    Delete,
    /// `max_key`
    MaxKey,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::FindByKey => "find_by_key",
            Self::Query => "query",
            Self::Delete => "delete",
            Self::MaxKey => "max_key",
        };
        write!(f, "{name}")
    }
}

/// One datastore, as seen by the coordinator
#[async_trait]
pub trait StoreHandle<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// Store name, used in logs and events
    fn name(&self) -> &str;

    /// Insert a record
    ///
    /// A record carrying a key is stored under that key and fails with a
    /// constraint violation if the key is taken. An unkeyed record gets the
    /// store's next key. Returns the stored record.
    async fn insert(&self, record: Record<T>) -> StoreResult<Record<T>>;

    /// Replace the record stored under `record.key`
    ///
    /// Fails with not-found if no such record exists.
    async fn update(&self, record: Record<T>) -> StoreResult<Record<T>>;

    /// Fetch one record; fails with not-found if absent
    async fn find_by_key(&self, key: Key) -> StoreResult<Record<T>>;

    /// Run a query
    async fn query(&self, query: &Query<T>) -> StoreResult<Vec<Record<T>>>;

    /// Delete one record; fails with not-found if absent
    async fn delete(&self, key: Key) -> StoreResult<()>;

    /// Highest key currently stored, used to mint locally-originated keys
    async fn max_key(&self) -> StoreResult<Option<Key>>;
}

#[async_trait]
impl<T, H> StoreHandle<T> for std::sync::Arc<H>
where
    T: Send + Sync + 'static,
    H: StoreHandle<T> + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn insert(&self, record: Record<T>) -> StoreResult<Record<T>> {
        (**self).insert(record).await
    }

    async fn update(&self, record: Record<T>) -> StoreResult<Record<T>> {
        (**self).update(record).await
    }

    async fn find_by_key(&self, key: Key) -> StoreResult<Record<T>> {
        (**self).find_by_key(key).await
    }

    async fn query(&self, query: &Query<T>) -> StoreResult<Vec<Record<T>>> {
        (**self).query(query).await
    }

    async fn delete(&self, key: Key) -> StoreResult<()> {
        (**self).delete(key).await
    }

    async fn max_key(&self) -> StoreResult<Option<Key>> {
        (**self).max_key().await
    }
}

//! Serialization gate
//!
//! Every operation routed through one coordinator passes the gate before it
//! touches a store. With a single shard the gate admits exactly one operation
//! at a time. With N shards, operations addressed to a key take the shard
//! `hash(key) mod N`, so operations on the same key are still totally
//! ordered, while keyless operations (queries, unkeyed writes, local key
//! allocation, reconciliation) take every shard in index order.
//!
//! Admission is FIFO: waiters on a shard are served in arrival order
//! (`tokio::sync::Mutex` is fair).

use crate::error::{Error, Result};
use crate::record::Key;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use xxhash_rust::xxh3::xxh3_64;

/// What an operation needs exclusive access to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateScope {
    /// One key
    Key(Key),
    /// The whole collection
    All,
}

/// Proof of admission; dropping it releases the gate
#[derive(Debug)]
pub struct GatePass {
    guards: Vec<OwnedMutexGuard<()>>,
}

impl GatePass {
    /// Number of shards held
    pub fn shards(&self) -> usize {
        self.guards.len()
    }
}

/// Sharded mutual-exclusion gate
#[derive(Debug, Clone)]
pub struct Gate {
    shards: Arc<[Arc<Mutex<()>>]>,
    timeout: Option<Duration>,
}

impl Gate {
    /// Create a gate with `shards` shards (at least one)
    pub fn new(shards: usize) -> Self {
        let shards: Vec<Arc<Mutex<()>>> =
            (0..shards.max(1)).map(|_| Arc::new(Mutex::new(()))).collect();
        Self {
            shards: shards.into(),
            timeout: None,
        }
    }

    /// Fail acquisition with [`Error::GateTimeout`] after `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard index guarding `key`
    pub fn shard_for(&self, key: Key) -> usize {
        (xxh3_64(&key.get().to_le_bytes()) % self.shards.len() as u64) as usize
    }

    /// Wait for admission
    pub async fn acquire(&self, scope: GateScope) -> Result<GatePass> {
        match self.timeout {
            None => Ok(self.lock(scope).await),
            Some(timeout) => tokio::time::timeout(timeout, self.lock(scope))
                .await
                .map_err(|_| Error::GateTimeout(timeout)),
        }
    }

    async fn lock(&self, scope: GateScope) -> GatePass {
        let guards = match scope {
            GateScope::Key(key) => {
                vec![self.shards[self.shard_for(key)].clone().lock_owned().await]
            }
            GateScope::All => {
                let mut guards = Vec::with_capacity(self.shards.len());
                for shard in self.shards.iter() {
                    guards.push(shard.clone().lock_owned().await);
                }
                guards
            }
        };
        GatePass { guards }
    }

    /// Check whether no shard is currently held
    pub fn is_idle(&self) -> bool {
        self.shards.iter().all(|shard| shard.try_lock().is_ok())
    }
}

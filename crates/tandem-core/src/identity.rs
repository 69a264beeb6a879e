//! Key resolution for the secondary store
//!
//! The two stores number their records independently. Keys the primary
//! assigned are reused verbatim in the secondary. Records written while the
//! primary was unreachable get a key minted by the secondary, taken from a
//! reserved range starting at `local_key_floor` so it can never collide with
//! a key the primary assigns later. Such records are marked
//! [`Origin::Local`] until reconciliation re-keys them.
//!
//! Allocation reads the secondary's current maximum key, so callers must hold
//! the coordinator gate across allocation and the write that uses the key.

use crate::classify::StoreError;
use crate::record::{Key, Origin, Record};
use crate::store::{StoreHandle, StoreResult};

/// First key of the locally-originated range unless configured otherwise
pub const DEFAULT_LOCAL_KEY_FLOOR: u64 = 1 << 48;

/// Key chosen for a secondary write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedKey {
    /// Key to store the record under
    pub key: Key,
    /// Origin to stamp on the record
    pub origin: Origin,
    /// Whether the key was freshly minted by the secondary
    pub allocated: bool,
}

/// Assigns and checks secondary-store keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityReconciler {
    local_key_floor: Key,
}

impl Default for IdentityReconciler {
    fn default() -> Self {
        Self::new(DEFAULT_LOCAL_KEY_FLOOR)
    }
}

impl IdentityReconciler {
    /// Create a reconciler minting local keys from `local_key_floor` upwards
    pub fn new(local_key_floor: u64) -> Self {
        Self {
            local_key_floor: Key::new(local_key_floor),
        }
    }

    /// First key of the local range
    pub fn local_key_floor(&self) -> Key {
        self.local_key_floor
    }

    /// Check whether `key` belongs to the locally-originated range
    pub fn is_local(&self, key: Key) -> bool {
        key >= self.local_key_floor
    }

    /// Resolve the key a record is stored under in the secondary
    ///
    /// A primary-assigned key is reused verbatim. A record without one gets a
    /// freshly allocated local key.
    pub async fn resolve_secondary_key<T, S>(
        &self,
        record: &Record<T>,
        secondary: &S,
    ) -> StoreResult<ResolvedKey>
    where
        T: Send + Sync + 'static,
        S: StoreHandle<T> + ?Sized,
    {
        if let Some(key) = record.key {
            let origin = if self.is_local(key) {
                Origin::Local
            } else {
                Origin::Primary
            };
            return Ok(ResolvedKey {
                key,
                origin,
                allocated: false,
            });
        }

        let key = self.allocate_local(secondary).await?;
        Ok(ResolvedKey {
            key,
            origin: Origin::Local,
            allocated: true,
        })
    }

    /// Mint the next local key: one greater than the secondary's current
    /// maximum, and never below the floor
    pub async fn allocate_local<T, S>(&self, secondary: &S) -> StoreResult<Key>
    where
        T: Send + Sync + 'static,
        S: StoreHandle<T> + ?Sized,
    {
        let max = secondary.max_key().await?;
        let key = match max {
            Some(max) if self.is_local(max) => max.checked_next().ok_or_else(|| {
                StoreError::validation(format!(
                    "local key space of {} is exhausted",
                    secondary.name()
                ))
            })?,
            _ => self.local_key_floor,
        };
        tracing::debug!("Allocated local key {} in {}", key, secondary.name());
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_primary_key_is_reused() {
        let reconciler = IdentityReconciler::default();
        let secondary: MemoryStore<u32> = MemoryStore::new("local");
        let record = Record::new(1).with_key(Key::new(42));

        let resolved = reconciler
            .resolve_secondary_key(&record, &secondary)
            .await
            .unwrap();
        assert_eq!(
            resolved,
            ResolvedKey {
                key: Key::new(42),
                origin: Origin::Primary,
                allocated: false
            }
        );
        assert_eq!(secondary.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_allocation_starts_at_floor_above_primary_keys() {
        let reconciler = IdentityReconciler::new(1_000);
        let secondary = MemoryStore::new("local")
            .with_records((1..=5u64).map(|k| Record::new(k).with_key(Key::new(k))));

        let resolved = reconciler
            .resolve_secondary_key(&Record::new(6), &secondary)
            .await
            .unwrap();
        assert_eq!(resolved.key, Key::new(1_000));
        assert_eq!(resolved.origin, Origin::Local);
        assert!(resolved.allocated);
    }

    #[tokio::test]
    async fn test_allocation_continues_local_range() {
        let reconciler = IdentityReconciler::new(1_000);
        let secondary = MemoryStore::new("local").with_records([
            Record::new(0u32).with_key(Key::new(3)),
            Record::new(0u32).with_key(Key::new(1_004)),
        ]);
        let key = reconciler.allocate_local(&secondary).await.unwrap();
        assert_eq!(key, Key::new(1_005));
    }

    #[tokio::test]
    async fn test_exhausted_local_range_is_logic_failure() {
        let reconciler = IdentityReconciler::new(10);
        let secondary =
            MemoryStore::new("local").with_records([Record::new(0u32).with_key(Key::new(u64::MAX))]);
        let err = reconciler.allocate_local(&secondary).await.unwrap_err();
        assert!(!err.is_connectivity());
    }

    #[tokio::test]
    async fn test_unreachable_secondary_fails_allocation() {
        let reconciler = IdentityReconciler::default();
        let secondary: MemoryStore<u32> = MemoryStore::new("local");
        secondary.set_unreachable();
        let err = reconciler.allocate_local(&secondary).await.unwrap_err();
        assert!(err.is_connectivity());
    }

    proptest! {
        #[test]
        fn prop_allocated_key_is_local_and_fresh(
            floor in 1u64..1_000_000,
            keys in proptest::collection::btree_set(0u64..2_000_000, 0..20),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let reconciler = IdentityReconciler::new(floor);
            let secondary = MemoryStore::new("local")
                .with_records(keys.iter().map(|&k| Record::new(k).with_key(Key::new(k))));

            let key = rt.block_on(reconciler.allocate_local(&secondary)).unwrap();
            prop_assert!(reconciler.is_local(key));
            prop_assert!(!keys.contains(&key.get()));
        }
    }
}

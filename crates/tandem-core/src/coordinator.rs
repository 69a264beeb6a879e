//! Replication coordinator
//!
//! Runs one logical operation at a time (per gate shard) against a primary
//! and a secondary store:
//!
//! ```text
//! Idle ─► GateAcquired ─► PrimaryAttempted ─┬─► Done               (read succeeded, or logic failure)
//!                                           ├─► SecondaryAttempted  (write replication, or connectivity failure)
//!                                           └─────────────────────► Done
//! ```
//!
//! Reads are served by the primary and fall back to the secondary only on a
//! connectivity failure. Writes, mutations and deletes that succeed on the
//! primary are replicated to the secondary on a best-effort basis; a
//! secondary failure there is a degraded replication, reported through the
//! event channel, never to the caller. When the primary is unreachable the
//! secondary is authoritative, and the change is queued in the outbox for
//! reconciliation.
//!
//! Once admitted through the gate an operation runs on its own task, so a
//! caller that stops waiting does not abort a half-finished operation.

use crate::classify::{ClassifiedError, FailureKind, StoreError};
use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::events::{CoordinatorStats, HealthReport, ReplicationEvent};
use crate::gate::{Gate, GateScope};
use crate::identity::IdentityReconciler;
use crate::operation::{Operation, OperationKind, Output, Patch, ReadFilter};
use crate::outbox::{ChangeKind, DeadLetter, Outbox, OutboxEntry};
use crate::outcome::{Attempt, ReplicationOutcome};
use crate::query::Query;
use crate::record::{Key, Origin, Record};
use crate::store::{StoreHandle, StoreResult, StoreRole};
use chrono::Utc;
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Coordinates one record collection across a primary and a secondary store
///
/// Cloning is cheap; clones share the gate, stores and outbox.
pub struct ReplicationCoordinator<T, P, S> {
    pub(crate) inner: Arc<Inner<T, P, S>>,
}

impl<T, P, S> Clone for ReplicationCoordinator<T, P, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct Inner<T, P, S> {
    pub(crate) config: CoordinatorConfig,
    pub(crate) primary: P,
    pub(crate) secondary: S,
    pub(crate) gate: Gate,
    pub(crate) identity: IdentityReconciler,
    pub(crate) outbox: Mutex<Outbox>,
    pub(crate) stats: Mutex<CoordinatorStats>,
    events: broadcast::Sender<ReplicationEvent>,
    primary_reachable: AtomicBool,
    secondary_reachable: AtomicBool,
    _record: PhantomData<fn() -> T>,
}

impl<T, P, S> ReplicationCoordinator<T, P, S>
where
    T: Clone + Send + Sync + 'static,
    P: StoreHandle<T> + 'static,
    S: StoreHandle<T> + 'static,
{
    /// Create a coordinator owning both stores
    pub fn new(config: CoordinatorConfig, primary: P, secondary: S) -> Result<Self> {
        config.validate().map_err(Error::Config)?;

        let gate = Gate::new(config.gate_shards).with_timeout(config.gate_timeout());
        let identity = IdentityReconciler::new(config.local_key_floor);
        let (events, _) = broadcast::channel(config.event_capacity);

        tracing::info!(
            "Coordinator {} ready (primary: {}, secondary: {}, gate shards: {})",
            config.name,
            primary.name(),
            secondary.name(),
            gate.shard_count()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                primary,
                secondary,
                gate,
                identity,
                outbox: Mutex::new(Outbox::new()),
                stats: Mutex::new(CoordinatorStats::default()),
                events,
                primary_reachable: AtomicBool::new(true),
                secondary_reachable: AtomicBool::new(true),
                _record: PhantomData,
            }),
        })
    }

    /// Execute one operation and return what happened at each store
    ///
    /// Errors only when the operation never ran (gate timeout) or its task
    /// died; store failures are reported inside the outcome.
    pub async fn execute(&self, operation: Operation<T>) -> Result<ReplicationOutcome<Output<T>>> {
        let scope = match operation.key() {
            Some(key) => GateScope::Key(key),
            None => GateScope::All,
        };
        let pass = self.inner.gate.acquire(scope).await?;

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _pass = pass;
            inner.dispatch(operation).await
        })
        .await
        .map_err(|e| Error::internal(format!("operation task failed: {e}")))
    }

    /// Fetch one record
    pub async fn get(&self, key: Key) -> Result<Record<T>> {
        let output = self.execute(Operation::read_key(key)).await?.into_result()?;
        single(output)
    }

    /// Run a query
    pub async fn query(&self, query: Query<T>) -> Result<Vec<Record<T>>> {
        let output = self.execute(Operation::read_query(query)).await?.into_result()?;
        Ok(output.into_records())
    }

    /// Insert an unkeyed record or replace a keyed one; returns the stored
    /// record with its key
    pub async fn write(&self, record: Record<T>) -> Result<Record<T>> {
        let output = self.execute(Operation::write(record)).await?.into_result()?;
        single(output)
    }

    /// Read-modify-write the record under `key`
    pub async fn mutate(
        &self,
        key: Key,
        patch: impl Fn(&mut T) -> std::result::Result<(), StoreError> + Send + Sync + 'static,
    ) -> Result<Record<T>> {
        let output = self.execute(Operation::mutate(key, patch)).await?.into_result()?;
        single(output)
    }

    /// Delete the record under `key`
    pub async fn delete(&self, key: Key) -> Result<()> {
        self.execute(Operation::delete(key)).await?.into_result()?;
        Ok(())
    }

    /// Subscribe to replication events
    pub fn subscribe(&self) -> broadcast::Receiver<ReplicationEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of the running counters
    pub fn stats(&self) -> CoordinatorStats {
        self.inner.stats.lock().clone()
    }

    /// Current health
    pub fn health(&self) -> HealthReport {
        let (depth, dead) = {
            let outbox = self.inner.outbox.lock();
            (outbox.len(), outbox.dead_letters().len())
        };
        HealthReport::evaluate(
            self.inner.primary_reachable.load(Ordering::SeqCst),
            self.inner.secondary_reachable.load(Ordering::SeqCst),
            depth,
            dead,
        )
    }

    /// Number of changes waiting for the primary
    pub fn outbox_len(&self) -> usize {
        self.inner.outbox.lock().len()
    }

    /// Changes waiting for the primary, oldest first
    pub fn pending_changes(&self) -> Vec<OutboxEntry> {
        self.inner.outbox.lock().entries().cloned().collect()
    }

    /// Changes the primary rejected during reconciliation
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.outbox.lock().dead_letters().to_vec()
    }

    /// Remove and return the parked changes, e.g. after handling them by hand
    pub fn take_dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.outbox.lock().take_dead_letters()
    }

    /// Queue the parked changes for the next reconciliation pass
    pub fn requeue_dead_letters(&self) -> usize {
        let queued = self.inner.outbox.lock().requeue_dead_letters();
        tracing::info!("{}: requeued {} dead-lettered changes", self.inner.config.name, queued);
        queued
    }

    /// Primary store
    pub fn primary(&self) -> &P {
        &self.inner.primary
    }

    /// Secondary store
    pub fn secondary(&self) -> &S {
        &self.inner.secondary
    }

    /// Configuration
    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Key reconciler
    pub fn identity(&self) -> &IdentityReconciler {
        &self.inner.identity
    }
}

fn single<T>(output: Output<T>) -> Result<Record<T>> {
    output
        .into_record()
        .ok_or_else(|| Error::internal("operation produced no record"))
}

impl<T, P, S> Inner<T, P, S>
where
    T: Clone + Send + Sync + 'static,
    P: StoreHandle<T> + 'static,
    S: StoreHandle<T> + 'static,
{
    async fn dispatch(&self, operation: Operation<T>) -> ReplicationOutcome<Output<T>> {
        let kind = operation.kind();
        let key = operation.key();
        tracing::debug!("{}: {} {:?}", self.config.name, kind, key);

        let outcome = match operation {
            Operation::Read(ReadFilter::Key(key)) => self.read_by_key(key).await,
            Operation::Read(ReadFilter::Query(query)) => self.read_query(&query).await,
            Operation::Write(record) => self.write(record).await,
            Operation::Mutate(key, patch) => self.mutate(key, &patch).await,
            Operation::Delete(key) => self.delete(key).await,
        };

        self.observe(kind, key, &outcome);
        outcome
    }

    async fn read_by_key(&self, key: Key) -> ReplicationOutcome<Output<T>> {
        if self.identity.is_local(key) {
            let secondary = Attempt::from_result(self.secondary.find_by_key(key).await);
            return ReplicationOutcome::new(Attempt::Skipped, secondary).map(Output::Record);
        }

        let outcome = match self.primary.find_by_key(key).await {
            Ok(record) => ReplicationOutcome::new(Attempt::Success(record), Attempt::Skipped),
            Err(err) if err.is_connectivity() => {
                self.log_failover(OperationKind::Read, &err);
                let secondary = Attempt::from_result(self.secondary.find_by_key(key).await);
                ReplicationOutcome::new(Attempt::Failed(err), secondary)
            }
            Err(err) => ReplicationOutcome::new(Attempt::Failed(err), Attempt::Skipped),
        };
        outcome.map(Output::Record)
    }

    async fn read_query(&self, query: &Query<T>) -> ReplicationOutcome<Output<T>> {
        let outcome = match self.primary.query(query).await {
            Ok(records) => ReplicationOutcome::new(Attempt::Success(records), Attempt::Skipped),
            Err(err) if err.is_connectivity() => {
                self.log_failover(OperationKind::Read, &err);
                let secondary = Attempt::from_result(self.secondary.query(query).await);
                ReplicationOutcome::new(Attempt::Failed(err), secondary)
            }
            Err(err) => ReplicationOutcome::new(Attempt::Failed(err), Attempt::Skipped),
        };
        outcome.map(Output::Records)
    }

    async fn write(&self, mut record: Record<T>) -> ReplicationOutcome<Output<T>> {
        if let Some(key) = record.key.filter(|k| self.identity.is_local(*k)) {
            record.origin = Origin::Local;
            let secondary = self.secondary.update(record).await;
            if let Ok(stored) = &secondary {
                self.enqueue(key, Some(stored.uid), ChangeKind::Update);
            }
            return ReplicationOutcome::new(Attempt::Skipped, Attempt::from_result(secondary))
                .map(Output::Record);
        }

        record.origin = Origin::Primary;
        let primary = match record.key {
            Some(_) => self.primary.update(record.clone()).await,
            None => self.primary.insert(record.clone()).await,
        };

        let outcome = match primary {
            Ok(stored) => {
                let secondary = self.replicate(stored.clone()).await;
                ReplicationOutcome::new(Attempt::Success(stored), secondary)
            }
            Err(err) if err.is_connectivity() => {
                self.log_failover(OperationKind::Write, &err);
                let secondary = self.write_without_primary(record).await;
                ReplicationOutcome::new(Attempt::Failed(err), Attempt::from_result(secondary))
            }
            Err(err) => ReplicationOutcome::new(Attempt::Failed(err), Attempt::Skipped),
        };
        outcome.map(Output::Record)
    }

    /// Secondary-authoritative write while the primary is unreachable
    async fn write_without_primary(&self, mut record: Record<T>) -> StoreResult<Record<T>> {
        if let Some(key) = record.key {
            let stored = self.upsert_secondary(record).await?;
            self.enqueue(key, Some(stored.uid), ChangeKind::Update);
            return Ok(stored);
        }

        let resolved = self
            .identity
            .resolve_secondary_key(&record, &self.secondary)
            .await?;
        record.key = Some(resolved.key);
        record.origin = resolved.origin;

        let stored = self.secondary.insert(record).await?;
        self.enqueue(resolved.key, Some(stored.uid), ChangeKind::Insert);
        self.stats.lock().local_keys_allocated += 1;
        tracing::info!(
            "{}: stored locally-originated record {} under key {}",
            self.config.name,
            stored.uid,
            resolved.key
        );
        self.emit(ReplicationEvent::LocallyOriginated {
            key: resolved.key,
            uid: stored.uid,
            at: Utc::now(),
        });
        Ok(stored)
    }

    async fn mutate(&self, key: Key, patch: &Patch<T>) -> ReplicationOutcome<Output<T>> {
        if self.identity.is_local(key) {
            let secondary = apply_patch(&self.secondary, key, patch).await;
            if let Ok(stored) = &secondary {
                self.enqueue(key, Some(stored.uid), ChangeKind::Update);
            }
            return ReplicationOutcome::new(Attempt::Skipped, Attempt::from_result(secondary))
                .map(Output::Record);
        }

        let outcome = match apply_patch(&self.primary, key, patch).await {
            Ok(updated) => {
                let secondary = self.replicate(updated.clone()).await;
                ReplicationOutcome::new(Attempt::Success(updated), secondary)
            }
            Err(err) if err.is_connectivity() => {
                self.log_failover(OperationKind::Mutate, &err);
                let secondary = apply_patch(&self.secondary, key, patch).await;
                if let Ok(stored) = &secondary {
                    self.enqueue(key, Some(stored.uid), ChangeKind::Update);
                }
                ReplicationOutcome::new(Attempt::Failed(err), Attempt::from_result(secondary))
            }
            Err(err) => ReplicationOutcome::new(Attempt::Failed(err), Attempt::Skipped),
        };
        outcome.map(Output::Record)
    }

    async fn delete(&self, key: Key) -> ReplicationOutcome<Output<T>> {
        if self.identity.is_local(key) {
            let secondary = self.secondary.delete(key).await;
            if secondary.is_ok() {
                self.enqueue(key, None, ChangeKind::Delete);
            }
            return ReplicationOutcome::new(Attempt::Skipped, Attempt::from_result(secondary))
                .map(|()| Output::Deleted(key));
        }

        let outcome = match self.primary.delete(key).await {
            Ok(()) => {
                let secondary = match self.secondary.delete(key).await {
                    Err(err) if err.is_not_found() => Ok(()),
                    other => other,
                };
                ReplicationOutcome::new(Attempt::Success(()), Attempt::from_result(secondary))
            }
            Err(err) if err.is_connectivity() => {
                self.log_failover(OperationKind::Delete, &err);
                let secondary = self.secondary.delete(key).await;
                if secondary.is_ok() {
                    self.enqueue(key, None, ChangeKind::Delete);
                }
                ReplicationOutcome::new(Attempt::Failed(err), Attempt::from_result(secondary))
            }
            Err(err) => ReplicationOutcome::new(Attempt::Failed(err), Attempt::Skipped),
        };
        outcome.map(|()| Output::Deleted(key))
    }

    /// Copy a record the primary accepted into the secondary
    async fn replicate(&self, record: Record<T>) -> Attempt<Record<T>> {
        // a primary key in the local range would overwrite a locally-originated record
        if let Some(key) = record.key.filter(|k| self.identity.is_local(*k)) {
            tracing::warn!(
                "{}: primary {} assigned key {} inside the local key range (floor {})",
                self.config.name,
                self.primary.name(),
                key,
                self.identity.local_key_floor()
            );
            return Attempt::Failed(
                StoreError::conflict(format!(
                    "primary key {} collides with the local key range starting at {}",
                    key,
                    self.identity.local_key_floor()
                ))
                .into(),
            );
        }

        let resolved = match self
            .identity
            .resolve_secondary_key(&record, &self.secondary)
            .await
        {
            Ok(resolved) => resolved,
            Err(err) => return Attempt::Failed(err),
        };

        let mut record = record;
        record.key = Some(resolved.key);
        record.origin = resolved.origin;
        Attempt::from_result(self.upsert_secondary(record).await)
    }

    /// Update the secondary copy, inserting it if missing
    pub(crate) async fn upsert_secondary(&self, record: Record<T>) -> StoreResult<Record<T>> {
        match self.secondary.update(record.clone()).await {
            Err(err) if err.is_not_found() => self.secondary.insert(record).await,
            other => other,
        }
    }

    pub(crate) fn enqueue(&self, key: Key, uid: Option<Uuid>, change: ChangeKind) {
        let queued = self.outbox.lock().record(key, uid, change);
        tracing::debug!(
            "{}: outbox {:?} for key {} ({})",
            self.config.name,
            change,
            key,
            if queued { "queued" } else { "compacted" }
        );
    }

    pub(crate) fn emit(&self, event: ReplicationEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn note_reachability<V>(&self, role: StoreRole, attempt: &Attempt<V>) {
        let reachable = match attempt {
            Attempt::Skipped => return,
            Attempt::Success(_) => true,
            Attempt::Failed(err) => !err.is_connectivity(),
        };
        self.set_reachable(role, reachable);
    }

    pub(crate) fn set_reachable(&self, role: StoreRole, reachable: bool) {
        let flag = match role {
            StoreRole::Primary => &self.primary_reachable,
            StoreRole::Secondary => &self.secondary_reachable,
        };
        flag.store(reachable, Ordering::SeqCst);
    }

    fn log_failover(&self, kind: OperationKind, err: &ClassifiedError) {
        tracing::warn!(
            "{}: primary {} unreachable during {}, failing over to {}: {}",
            self.config.name,
            self.primary.name(),
            kind,
            self.secondary.name(),
            err
        );
    }

    /// Update counters, reachability and the event channel after an operation
    fn observe(&self, kind: OperationKind, key: Option<Key>, outcome: &ReplicationOutcome<Output<T>>) {
        self.note_reachability(StoreRole::Primary, &outcome.primary);
        self.note_reachability(StoreRole::Secondary, &outcome.secondary);

        let mut events = Vec::new();
        {
            let mut stats = self.stats.lock();
            match kind {
                OperationKind::Read => stats.reads += 1,
                OperationKind::Write => stats.writes += 1,
                OperationKind::Mutate => stats.mutates += 1,
                OperationKind::Delete => stats.deletes += 1,
            }

            match (&outcome.primary, &outcome.secondary) {
                (Attempt::Success(_), Attempt::Failed(err)) => {
                    stats.degraded_replications += 1;
                    tracing::warn!(
                        "{}: degraded replication on {} {:?}: secondary {} failed: {}",
                        self.config.name,
                        kind,
                        key,
                        self.secondary.name(),
                        err
                    );
                    events.push(ReplicationEvent::DegradedReplication {
                        operation: kind,
                        key,
                        stale: StoreRole::Secondary,
                        detail: err.to_string(),
                        at: Utc::now(),
                    });
                }
                (Attempt::Failed(primary), Attempt::Success(_)) if primary.is_connectivity() => {
                    stats.failovers += 1;
                    events.push(ReplicationEvent::Failover {
                        operation: kind,
                        key,
                        detail: primary.to_string(),
                        at: Utc::now(),
                    });
                }
                (Attempt::Failed(primary), Attempt::Failed(secondary))
                    if primary.is_connectivity() && secondary.is_connectivity() =>
                {
                    stats.combined_failures += 1;
                    tracing::error!(
                        "{}: {} failed on both stores (primary: {}; secondary: {})",
                        self.config.name,
                        kind,
                        primary,
                        secondary
                    );
                    events.push(ReplicationEvent::CombinedFailure {
                        operation: kind,
                        detail: format!("primary: {primary}; secondary: {secondary}"),
                        at: Utc::now(),
                    });
                }
                _ => {}
            }

            if surfaced_failure(outcome) == Some(FailureKind::Logic) {
                stats.logic_failures += 1;
            }
        }

        for event in events {
            self.emit(event);
        }
    }
}

/// Failure kind the caller will see, if the operation fails
fn surfaced_failure<V>(outcome: &ReplicationOutcome<V>) -> Option<FailureKind> {
    match (&outcome.primary, &outcome.secondary) {
        (Attempt::Success(_), _) => None,
        (Attempt::Failed(err), _) if !err.is_connectivity() => Some(FailureKind::Logic),
        (_, Attempt::Success(_)) => None,
        (_, Attempt::Failed(err)) => Some(err.kind()),
        (Attempt::Failed(err), Attempt::Skipped) => Some(err.kind()),
        (Attempt::Skipped, Attempt::Skipped) => None,
    }
}

/// Read, patch and write back one record in one store
async fn apply_patch<T, H>(store: &H, key: Key, patch: &Patch<T>) -> StoreResult<Record<T>>
where
    T: Send + Sync + 'static,
    H: StoreHandle<T> + ?Sized,
{
    let mut record = store.find_by_key(key).await?;
    patch(&mut record.body)?;
    store.update(record).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreOp};
    use crate::testing::{StockItem, init_tracing};

    type Coordinator = ReplicationCoordinator<StockItem, MemoryStore<StockItem>, MemoryStore<StockItem>>;

    fn coordinator() -> Coordinator {
        init_tracing();
        ReplicationCoordinator::new(
            CoordinatorConfig::new("inventory"),
            MemoryStore::new("cloud"),
            MemoryStore::new("local"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let result = ReplicationCoordinator::<StockItem, _, _>::new(
            CoordinatorConfig::default().with_gate_shards(0),
            MemoryStore::new("cloud"),
            MemoryStore::new("local"),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_write_reaches_both_stores_under_primary_key() {
        let coord = coordinator();
        let stored = coord.write(Record::new(StockItem::new("gauze", 10))).await.unwrap();

        let key = stored.key.unwrap();
        assert_eq!(key, Key::new(1));
        assert_eq!(coord.primary().get(key).unwrap().body.stock, 10);
        let copy = coord.secondary().get(key).unwrap();
        assert_eq!(copy.uid, stored.uid);
        assert_eq!(copy.origin, Origin::Primary);
        assert_eq!(coord.outbox_len(), 0);
    }

    #[tokio::test]
    async fn test_primary_logic_failure_skips_secondary() {
        let coord = coordinator();
        let outcome = coord
            .execute(Operation::write(
                Record::new(StockItem::new("ghost", 1)).with_key(Key::new(99)),
            ))
            .await
            .unwrap();

        assert!(outcome.secondary.is_skipped());
        assert_eq!(coord.secondary().total_calls(), 0);
        let err = outcome.into_result().unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(coord.stats().logic_failures, 1);
    }

    #[tokio::test]
    async fn test_mutate_applies_patch_on_both_stores() {
        let coord = coordinator();
        let key = coord
            .write(Record::new(StockItem::new("saline", 5)))
            .await
            .unwrap()
            .key
            .unwrap();

        let updated = coord.mutate(key, |item| item.take(2)).await.unwrap();
        assert_eq!(updated.body.stock, 3);
        assert_eq!(coord.secondary().get(key).unwrap().body.stock, 3);

        let err = coord.mutate(key, |item| item.take(10)).await.unwrap_err();
        assert!(matches!(err, Error::Logic { role: StoreRole::Primary, .. }));
        assert_eq!(coord.primary().get(key).unwrap().body.stock, 3);
    }

    #[tokio::test]
    async fn test_mutate_repairs_missing_secondary_copy() {
        let coord = coordinator();
        let seeded = Record::new(StockItem::new("swab", 4)).with_key(Key::new(7));
        coord.primary().insert(seeded).await.unwrap();

        coord.mutate(Key::new(7), |item| item.take(1)).await.unwrap();
        assert_eq!(coord.secondary().get(Key::new(7)).unwrap().body.stock, 3);
        assert_eq!(coord.stats().degraded_replications, 0);
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_secondary_copy() {
        let coord = coordinator();
        coord
            .primary()
            .insert(Record::new(StockItem::new("tape", 1)).with_key(Key::new(3)))
            .await
            .unwrap();

        coord.delete(Key::new(3)).await.unwrap();
        assert!(coord.primary().is_empty());
        assert_eq!(coord.stats().degraded_replications, 0);
    }

    #[tokio::test]
    async fn test_local_key_operations_skip_primary() {
        let coord = coordinator();
        coord.primary().set_unreachable();
        let local = coord.write(Record::new(StockItem::new("mask", 50))).await.unwrap();
        let key = local.key.unwrap();
        assert!(coord.identity().is_local(key));

        coord.primary().heal();
        let before = coord.primary().total_calls();

        assert_eq!(coord.get(key).await.unwrap().body.stock, 50);
        coord.mutate(key, |item| item.take(5)).await.unwrap();
        assert_eq!(coord.secondary().get(key).unwrap().body.stock, 45);
        assert_eq!(coord.primary().total_calls(), before);
        // the insert entry absorbs the update
        assert_eq!(coord.outbox_len(), 1);

        coord.delete(key).await.unwrap();
        assert_eq!(coord.outbox_len(), 0);
        assert!(coord.secondary().is_empty());
    }

    #[tokio::test]
    async fn test_failover_query_reads_secondary() {
        let coord = coordinator();
        for (name, stock) in [("a", 1), ("b", 2), ("c", 3)] {
            coord.write(Record::new(StockItem::new(name, stock))).await.unwrap();
        }
        coord.primary().set_unreachable();

        let low = coord
            .query(Query::all().filter(|item: &StockItem| item.stock < 3))
            .await
            .unwrap();
        assert_eq!(low.len(), 2);
        assert_eq!(coord.secondary().calls(StoreOp::Query), 1);
        assert_eq!(coord.stats().failovers, 1);
        assert!(!coord.health().primary_reachable);
    }

    #[tokio::test]
    async fn test_surfaced_failure_table() {
        let down = || Attempt::<()>::Failed(StoreError::unreachable("x").into());
        let rejected = || Attempt::<()>::Failed(StoreError::validation("x").into());

        let cases = [
            (ReplicationOutcome::new(Attempt::Success(()), down()), None),
            (ReplicationOutcome::new(rejected(), Attempt::Skipped), Some(FailureKind::Logic)),
            (ReplicationOutcome::new(down(), rejected()), Some(FailureKind::Logic)),
            (ReplicationOutcome::new(down(), down()), Some(FailureKind::Connectivity)),
            (ReplicationOutcome::new(down(), Attempt::Success(())), None),
            (ReplicationOutcome::new(Attempt::Skipped, rejected()), Some(FailureKind::Logic)),
        ];
        for (outcome, expected) in cases {
            assert_eq!(surfaced_failure(&outcome), expected, "{outcome:?}");
        }
    }
}

//! Reconciliation
//!
//! Replays the outbox against the primary once it is reachable again:
//!
//! - **Insert** (locally-originated record): look the record up in the
//!   primary by `uid`; insert it if absent, otherwise push the local body over
//!   the existing copy. Then re-key the secondary copy under the primary's key
//!   (origin becomes `Primary`) and drop the local key.
//! - **Update**: push the current secondary copy to the primary, inserting
//!   it under its key if the primary no longer holds it.
//! - **Delete**: delete from the primary; already gone is fine.
//!
//! Entries are replayed oldest first, under the whole gate. A connectivity
//! failure ends the pass and keeps the entry for the next one; an insert
//! interrupted half-way is safe to replay because of the `uid` lookup. A
//! logic failure parks the entry in the dead letters.

use crate::backoff::Backoff;
use crate::classify::{ClassifiedError, StoreError};
use crate::coordinator::{Inner, ReplicationCoordinator};
use crate::error::{Error, Result};
use crate::events::ReplicationEvent;
use crate::gate::GateScope;
use crate::outbox::{ChangeKind, OutboxEntry};
use crate::query::Query;
use crate::record::{Key, Origin, Record};
use crate::store::{StoreHandle, StoreResult, StoreRole};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Result of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Entries successfully replayed (including re-keyed inserts)
    pub replayed: usize,
    /// `(local key, primary key)` for every re-keyed record
    pub rekeyed: Vec<(Key, Key)>,
    /// Locally-originated records the primary already held
    pub deduplicated: usize,
    /// Entries parked after a primary rejection
    pub dead_lettered: usize,
    /// Entries still pending after the pass
    pub remaining: usize,
    /// Whether a connectivity failure ended the pass early
    pub interrupted: bool,
}

impl ReconcileReport {
    /// Check whether the outbox was fully drained
    pub fn is_complete(&self) -> bool {
        !self.interrupted && self.remaining == 0
    }
}

/// Background reconciler; dropping the handle also stops it
#[derive(Debug)]
pub struct ReconcilerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Signal shutdown and wait for the current pass to finish
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!("Reconciler task ended abnormally: {}", e);
        }
    }

    /// Check whether the task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

enum Replayed {
    Applied,
    Rekeyed {
        local: Key,
        primary: Key,
        deduplicated: bool,
    },
    Dropped,
}

struct ReplayError {
    role: StoreRole,
    error: ClassifiedError,
}

fn at(role: StoreRole) -> impl FnOnce(ClassifiedError) -> ReplayError {
    move |error| ReplayError { role, error }
}

impl<T, P, S> ReplicationCoordinator<T, P, S>
where
    T: Clone + Send + Sync + 'static,
    P: StoreHandle<T> + 'static,
    S: StoreHandle<T> + 'static,
{
    /// Run one reconciliation pass over up to `reconcile_batch` entries
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let pass = self.inner.gate.acquire(GateScope::All).await?;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _pass = pass;
            inner.reconcile_pass().await
        })
        .await
        .map_err(|e| Error::internal(format!("reconciliation task failed: {e}")))
    }

    /// Queue every locally-originated record found in the secondary
    ///
    /// Recovers the outbox after a restart. Returns the number of records
    /// queued; records that already have a pending entry are skipped.
    pub async fn rebuild_outbox(&self) -> Result<usize> {
        let _pass = self.inner.gate.acquire(GateScope::All).await?;

        let local = self
            .inner
            .secondary
            .query(&Query::all().with_origin(Origin::Local))
            .await
            .map_err(|source| {
                let role = StoreRole::Secondary;
                if source.is_connectivity() {
                    Error::Unavailable { role, source }
                } else {
                    Error::Logic { role, source }
                }
            })?;

        let mut queued = 0;
        {
            let mut outbox = self.inner.outbox.lock();
            for record in local {
                let Some(key) = record.key else { continue };
                if !outbox.contains_key(key) && outbox.record(key, Some(record.uid), ChangeKind::Insert)
                {
                    queued += 1;
                }
            }
        }

        tracing::info!(
            "{}: rebuilt outbox with {} locally-originated records",
            self.inner.config.name,
            queued
        );
        Ok(queued)
    }

    /// Run reconciliation in the background every `reconcile_interval`
    ///
    /// Passes that end on a connectivity failure are retried with
    /// exponential backoff. Passes are skipped while the outbox is empty.
    pub fn spawn_reconciler(&self) -> ReconcilerHandle {
        let coordinator = self.clone();
        let (shutdown, mut stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let interval = coordinator.config().reconcile_interval();
            let mut backoff = Backoff::new(coordinator.config().retry.clone());
            let mut delay = interval;

            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = tokio::time::sleep(delay) => {}
                }

                if coordinator.outbox_len() == 0 {
                    delay = interval;
                    continue;
                }

                match coordinator.reconcile().await {
                    Ok(report) if !report.interrupted => {
                        backoff.reset();
                        delay = if report.remaining > 0 {
                            Duration::ZERO
                        } else {
                            interval
                        };
                    }
                    Ok(report) => {
                        delay = backoff.next_delay();
                        if backoff.exhausted() {
                            tracing::warn!(
                                "{}: reconciliation interrupted {} times in a row, {} changes pending",
                                coordinator.config().name,
                                backoff.attempts(),
                                report.remaining
                            );
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            "{}: reconciliation pass failed: {}",
                            coordinator.config().name,
                            e
                        );
                        delay = backoff.next_delay();
                    }
                }
            }

            tracing::info!("{}: reconciler stopped", coordinator.config().name);
        });

        ReconcilerHandle {
            shutdown: Some(shutdown),
            task,
        }
    }
}

impl<T, P, S> Inner<T, P, S>
where
    T: Clone + Send + Sync + 'static,
    P: StoreHandle<T> + 'static,
    S: StoreHandle<T> + 'static,
{
    async fn reconcile_pass(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for _ in 0..self.config.reconcile_batch {
            let Some(entry) = self.outbox.lock().front().cloned() else {
                break;
            };

            match self.replay(&entry).await {
                Ok(replayed) => {
                    self.outbox.lock().complete(entry.seq);
                    self.note_replayed(&entry, replayed, &mut report);
                }
                Err(ReplayError { role, error }) if error.is_connectivity() => {
                    self.set_reachable(role, false);
                    report.interrupted = true;
                    tracing::info!(
                        "{}: reconciliation paused, {} unreachable: {}",
                        self.config.name,
                        role,
                        error
                    );
                    break;
                }
                Err(ReplayError { role, error }) => {
                    tracing::warn!(
                        "{}: {} rejected pending {:?} for key {}: {}",
                        self.config.name,
                        role,
                        entry.change,
                        entry.key,
                        error
                    );
                    self.outbox.lock().dead_letter(entry.seq, error.to_string());
                    self.stats.lock().dead_lettered += 1;
                    report.dead_lettered += 1;
                    self.emit(ReplicationEvent::DeadLettered {
                        key: entry.key,
                        detail: error.to_string(),
                        at: Utc::now(),
                    });
                }
            }
        }

        report.remaining = self.outbox.lock().len();
        if report.replayed > 0 || report.dead_lettered > 0 {
            tracing::info!(
                "{}: reconciled {} changes ({} re-keyed, {} dead-lettered, {} remaining)",
                self.config.name,
                report.replayed,
                report.rekeyed.len(),
                report.dead_lettered,
                report.remaining
            );
        }
        report
    }

    fn note_replayed(&self, entry: &OutboxEntry, replayed: Replayed, report: &mut ReconcileReport) {
        match replayed {
            Replayed::Applied => {
                report.replayed += 1;
                self.stats.lock().reconciled += 1;
            }
            Replayed::Rekeyed {
                local,
                primary,
                deduplicated,
            } => {
                report.replayed += 1;
                report.rekeyed.push((local, primary));
                {
                    let mut stats = self.stats.lock();
                    stats.reconciled += 1;
                    if deduplicated {
                        stats.deduplicated += 1;
                    }
                }
                if deduplicated {
                    report.deduplicated += 1;
                }
                if let Some(uid) = entry.uid {
                    self.emit(ReplicationEvent::Reconciled {
                        local_key: local,
                        primary_key: primary,
                        uid,
                        at: Utc::now(),
                    });
                }
            }
            Replayed::Dropped => {
                tracing::debug!(
                    "{}: dropped stale pending {:?} for key {}",
                    self.config.name,
                    entry.change,
                    entry.key
                );
            }
        }
    }

    async fn replay(&self, entry: &OutboxEntry) -> std::result::Result<Replayed, ReplayError> {
        match entry.change {
            ChangeKind::Insert => self.replay_insert(entry.key).await,
            ChangeKind::Update => {
                if self.identity.is_local(entry.key) {
                    return Ok(Replayed::Dropped);
                }
                let Some(record) = self.secondary_copy(entry.key).await? else {
                    return Ok(Replayed::Dropped);
                };
                let pushed = match self.primary.update(record.clone()).await {
                    Err(e) if e.is_not_found() => {
                        tracing::debug!(
                            "{}: primary no longer holds key {}, re-inserting",
                            self.config.name,
                            entry.key
                        );
                        self.primary.insert(record).await
                    }
                    other => other,
                };
                pushed.map_err(at(StoreRole::Primary))?;
                self.set_reachable(StoreRole::Primary, true);
                Ok(Replayed::Applied)
            }
            ChangeKind::Delete => {
                if self.identity.is_local(entry.key) {
                    return Ok(Replayed::Dropped);
                }
                match self.primary.delete(entry.key).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(at(StoreRole::Primary)(e)),
                }
                self.set_reachable(StoreRole::Primary, true);
                Ok(Replayed::Applied)
            }
        }
    }

    async fn replay_insert(&self, local: Key) -> std::result::Result<Replayed, ReplayError> {
        let Some(record) = self.secondary_copy(local).await? else {
            return Ok(Replayed::Dropped);
        };
        if !record.is_locally_originated() {
            return Ok(Replayed::Dropped);
        }

        let existing = self
            .primary
            .query(&Query::all().with_uid(record.uid).limit(1))
            .await
            .map_err(at(StoreRole::Primary))?
            .into_iter()
            .next();
        let deduplicated = existing.is_some();

        let mut promoted = record.clone();
        promoted.origin = Origin::Primary;
        let stored = match existing {
            Some(existing) => {
                promoted.key = existing.key;
                self.primary.update(promoted).await
            }
            None => {
                promoted.key = None;
                self.primary.insert(promoted).await
            }
        }
        .map_err(at(StoreRole::Primary))?;
        self.set_reachable(StoreRole::Primary, true);

        let primary = stored
            .key
            .ok_or_else(|| ClassifiedError::from(StoreError::validation("primary returned an unkeyed record")))
            .map_err(at(StoreRole::Primary))?;

        self.rekey_secondary(record, primary).await?;

        Ok(Replayed::Rekeyed {
            local,
            primary,
            deduplicated,
        })
    }

    /// Store the secondary copy under the primary key and drop the local key
    async fn rekey_secondary(&self, mut record: Record<T>, primary: Key) -> std::result::Result<(), ReplayError> {
        let local = record.key;
        if let Some(occupant) = self.secondary_copy(primary).await? {
            if occupant.uid != record.uid {
                return Err(at(StoreRole::Secondary)(
                    StoreError::conflict(format!(
                        "secondary key {} already holds record {}",
                        primary, occupant.uid
                    ))
                    .into(),
                ));
            }
        }
        record.key = Some(primary);
        record.origin = Origin::Primary;
        self.upsert_secondary(record)
            .await
            .map_err(at(StoreRole::Secondary))?;

        if let Some(local) = local.filter(|k| *k != primary) {
            match self.secondary.delete(local).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(at(StoreRole::Secondary)(e)),
            }
        }
        Ok(())
    }

    async fn secondary_copy(&self, key: Key) -> std::result::Result<Option<Record<T>>, ReplayError> {
        let found: StoreResult<Record<T>> = self.secondary.find_by_key(key).await;
        match found {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(at(StoreRole::Secondary)(e)),
        }
    }
}

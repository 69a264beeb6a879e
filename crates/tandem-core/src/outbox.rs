//! Changelog of work the primary missed
//!
//! When the primary is unreachable the secondary serves writes alone. Each
//! such change is appended here and replayed against the primary by the
//! reconciliation pass, in order. Entries for the same key are compacted on
//! the way in: an update behind a pending insert or update of the same key
//! is redundant (replay reads the current secondary copy), an update after a
//! pending delete replaces the delete (the record exists again), and deleting
//! a record the primary never saw cancels its pending changes outright.

use crate::record::Key;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use uuid::Uuid;

/// Kind of pending change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Locally-originated record the primary has never seen
    Insert,
    /// Secondary copy changed; push it to the primary
    Update,
    /// Record deleted from the secondary only
    Delete,
}

/// One pending change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboxEntry {
    /// Sequence number, increasing in enqueue order
    pub seq: u64,
    /// Secondary key of the changed record
    pub key: Key,
    /// Record uid, when known
    pub uid: Option<Uuid>,
    /// Change kind
    pub change: ChangeKind,
    /// When the change was recorded
    pub enqueued_at: DateTime<Utc>,
}

/// A change the primary rejected during reconciliation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetter {
    /// The rejected change
    pub entry: OutboxEntry,
    /// Primary's rejection
    pub reason: String,
}

/// Ordered pending changes plus dead letters
#[derive(Debug, Default)]
pub struct Outbox {
    entries: VecDeque<OutboxEntry>,
    dead: Vec<DeadLetter>,
    next_seq: u64,
}

impl Outbox {
    /// Create an empty outbox
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change, compacting against pending entries for the same key
    ///
    /// Returns `false` if the change was absorbed by a pending entry.
    pub fn record(&mut self, key: Key, uid: Option<Uuid>, change: ChangeKind) -> bool {
        match change {
            ChangeKind::Insert => {}
            ChangeKind::Update => {
                if self
                    .entries
                    .iter()
                    .any(|e| e.key == key && e.change != ChangeKind::Delete)
                {
                    return false;
                }
                self.entries
                    .retain(|e| !(e.key == key && e.change == ChangeKind::Delete));
            }
            ChangeKind::Delete => {
                let never_reached_primary = self
                    .entries
                    .iter()
                    .any(|e| e.key == key && e.change == ChangeKind::Insert);
                if never_reached_primary {
                    self.entries.retain(|e| e.key != key);
                    return false;
                }
                self.entries
                    .retain(|e| !(e.key == key && e.change == ChangeKind::Update));
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_back(OutboxEntry {
            seq,
            key,
            uid,
            change,
            enqueued_at: Utc::now(),
        });
        true
    }

    /// Oldest pending change
    pub fn front(&self) -> Option<&OutboxEntry> {
        self.entries.front()
    }

    /// Remove the oldest pending change if it is still `seq`
    pub fn complete(&mut self, seq: u64) -> Option<OutboxEntry> {
        if self.entries.front().is_some_and(|e| e.seq == seq) {
            self.entries.pop_front()
        } else {
            None
        }
    }

    /// Move the oldest pending change, if it is still `seq`, to the dead
    /// letters
    pub fn dead_letter(&mut self, seq: u64, reason: impl Into<String>) -> bool {
        match self.complete(seq) {
            Some(entry) => {
                self.dead.push(DeadLetter {
                    entry,
                    reason: reason.into(),
                });
                true
            }
            None => false,
        }
    }

    /// Check whether a change for `key` is pending
    pub fn contains_key(&self, key: Key) -> bool {
        self.entries.iter().any(|e| e.key == key)
    }

    /// Pending changes, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &OutboxEntry> {
        self.entries.iter()
    }

    /// Parked changes
    pub fn dead_letters(&self) -> &[DeadLetter] {
        &self.dead
    }

    /// Remove and return every parked change
    pub fn take_dead_letters(&mut self) -> Vec<DeadLetter> {
        std::mem::take(&mut self.dead)
    }

    /// Queue every parked change again, oldest first; returns how many were
    /// queued (the rest were absorbed by pending entries)
    pub fn requeue_dead_letters(&mut self) -> usize {
        let mut queued = 0;
        for dead in self.take_dead_letters() {
            if self.record(dead.entry.key, dead.entry.uid, dead.entry.change) {
                queued += 1;
            }
        }
        queued
    }

    /// Number of pending changes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

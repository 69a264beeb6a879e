//! Replication side channel
//!
//! Failover and degraded replication never fail an operation; they are
//! reported here instead, as broadcast [`ReplicationEvent`]s, running
//! [`CoordinatorStats`] counters, and a [`HealthReport`].

use crate::operation::OperationKind;
use crate::record::Key;
use crate::store::StoreRole;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Something worth knowing about replication
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplicationEvent {
    /// The primary was unreachable and the secondary served the operation
    Failover {
        /// Operation kind
        operation: OperationKind,
        /// Addressed key, if any
        key: Option<Key>,
        /// Primary failure
        detail: String,
        /// When it happened
        at: DateTime<Utc>,
    },
    /// One store applied a change the other did not
    DegradedReplication {
        /// Operation kind
        operation: OperationKind,
        /// Addressed key, if any
        key: Option<Key>,
        /// Store whose copy is now missing or stale
        stale: StoreRole,
        /// Failure that caused the divergence
        detail: String,
        /// When it happened
        at: DateTime<Utc>,
    },
    /// The secondary minted a key for a record the primary never saw
    LocallyOriginated {
        /// Local key
        key: Key,
        /// Record uid
        uid: Uuid,
        /// When it happened
        at: DateTime<Utc>,
    },
    /// A locally-originated record reached the primary and was re-keyed
    Reconciled {
        /// Key the secondary had minted
        local_key: Key,
        /// Key the primary assigned (or already held, when deduplicated)
        primary_key: Key,
        /// Record uid
        uid: Uuid,
        /// When it happened
        at: DateTime<Utc>,
    },
    /// A pending change was rejected by the primary and parked
    DeadLettered {
        /// Key of the change
        key: Key,
        /// Primary rejection
        detail: String,
        /// When it happened
        at: DateTime<Utc>,
    },
    /// Both stores were unreachable
    CombinedFailure {
        /// Operation kind
        operation: OperationKind,
        /// Both failures
        detail: String,
        /// When it happened
        at: DateTime<Utc>,
    },
}

impl ReplicationEvent {
    /// Event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Failover { .. } => "failover",
            Self::DegradedReplication { .. } => "degraded_replication",
            Self::LocallyOriginated { .. } => "locally_originated",
            Self::Reconciled { .. } => "reconciled",
            Self::DeadLettered { .. } => "dead_lettered",
            Self::CombinedFailure { .. } => "combined_failure",
        }
    }

    /// When the event happened
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Failover { at, .. }
            | Self::DegradedReplication { at, .. }
            | Self::LocallyOriginated { at, .. }
            | Self::Reconciled { at, .. }
            | Self::DeadLettered { at, .. }
            | Self::CombinedFailure { at, .. } => *at,
        }
    }
}

/// Running counters of one coordinator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    /// Read operations executed
    pub reads: u64,
    /// Write operations executed
    pub writes: u64,
    /// Mutate operations executed
    pub mutates: u64,
    /// Delete operations executed
    pub deletes: u64,
    /// Operations served by the secondary after a primary connectivity failure
    pub failovers: u64,
    /// Changes applied by only one store
    pub degraded_replications: u64,
    /// Keys minted by the secondary
    pub local_keys_allocated: u64,
    /// Operations where both stores were unreachable
    pub combined_failures: u64,
    /// Operations surfaced to the caller as logic failures
    pub logic_failures: u64,
    /// Pending changes replayed against the primary
    pub reconciled: u64,
    /// Locally-originated records already present in the primary
    pub deduplicated: u64,
    /// Pending changes rejected by the primary
    pub dead_lettered: u64,
}

impl CoordinatorStats {
    /// Total operations executed
    pub fn operations(&self) -> u64 {
        self.reads + self.writes + self.mutates + self.deletes
    }
}

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Both stores reachable and in sync
    Healthy,
    /// Serving, but one store is unreachable or changes are pending
    Degraded,
    /// Neither store reachable
    Unhealthy,
}

/// Point-in-time health of one coordinator
///
/// Reachability is the last one observed by an operation, not a probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Overall status
    pub status: HealthStatus,
    /// Primary reachable on its last call
    pub primary_reachable: bool,
    /// Secondary reachable on its last call
    pub secondary_reachable: bool,
    /// Changes waiting to be replayed against the primary
    pub outbox_depth: usize,
    /// Changes the primary rejected during reconciliation
    pub dead_letters: usize,
}

impl HealthReport {
    /// Derive the status from its inputs
    pub fn evaluate(
        primary_reachable: bool,
        secondary_reachable: bool,
        outbox_depth: usize,
        dead_letters: usize,
    ) -> Self {
        let status = if !primary_reachable && !secondary_reachable {
            HealthStatus::Unhealthy
        } else if !primary_reachable || !secondary_reachable || outbox_depth > 0 || dead_letters > 0
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        Self {
            status,
            primary_reachable,
            secondary_reachable,
            outbox_depth,
            dead_letters,
        }
    }
}

//! Tandem Core - Primary/Secondary Replication and Failover
//!
//! This crate keeps two independently keyed datastores approximately in sync
//! for a single entity collection:
//! - A **primary** store (remote, authoritative while reachable)
//! - A **secondary** store (local, the resilience backstop)
//!
//! Every logical operation goes through one [`ReplicationCoordinator`], which
//! serializes it behind a gate, attempts the primary, fails over to the
//! secondary on connectivity failures only, and replicates writes to the
//! secondary on a best-effort basis.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │          Application services                │
//! │  (billing, audit log, lab results, stock...) │
//! └──────────────┬───────────────────────────────┘
//!                │ execute(Operation)
//! ┌──────────────┴───────────────────────────────┐
//! │        ReplicationCoordinator                │
//! │  Gate ─► primary ─► secondary ─► Outcome     │
//! │  IdentityReconciler · Outbox · Events        │
//! └───────┬──────────────────────────┬───────────┘
//!         │ StoreHandle              │ StoreHandle
//! ┌───────┴────────┐        ┌────────┴─────────┐
//! │ Primary store  │        │ Secondary store  │
//! └────────────────┘        └──────────────────┘
//! ```
//!
//! # Failure model
//!
//! Errors raised by a store are classified once by [`classify()`] into
//! [`FailureKind::Connectivity`] or [`FailureKind::Logic`]. Only connectivity
//! failures trigger failover; logic failures are surfaced unchanged.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod classify;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod gate;
pub mod identity;
pub mod operation;
pub mod outbox;
pub mod outcome;
pub mod query;
pub mod record;
mod reconcile;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use classify::{ClassifiedError, FailureKind, StoreError, classify};
pub use config::CoordinatorConfig;
pub use coordinator::ReplicationCoordinator;
pub use error::{Error, Result};
pub use events::{CoordinatorStats, HealthReport, HealthStatus, ReplicationEvent};
pub use identity::IdentityReconciler;
pub use operation::{Operation, Output, Patch, ReadFilter};
pub use outcome::{Attempt, ReplicationOutcome};
pub use query::Query;
pub use reconcile::{ReconcileReport, ReconcilerHandle};
pub use record::{Key, Origin, Record};
pub use store::{StoreHandle, StoreResult, StoreRole};

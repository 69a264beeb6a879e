//! Testing infrastructure for Tandem Core
//!
//! Shared by unit tests and the integration tests under `tests/`; other
//! crates enable it with the `testing` feature.
//!
//! - **Fixtures**: small record bodies modelled on the services that sit on
//!   top of the coordinator (stock items, audit entries, lab results)
//! - **Harnesses**: coordinators over in-memory stores, and a [`TestContext`]
//!   owning a temporary directory for file-backed stores
//! - **Tracing**: [`init_tracing`] installs a test-friendly subscriber once
//!
//! # Usage
//!
//! ```rust,no_run
//! use tandem_core::testing::{StockItem, init_tracing, memory_coordinator};
//! use tandem_core::Record;
//!
//! # async fn example() -> tandem_core::Result<()> {
//! init_tracing();
//! let coordinator = memory_coordinator::<StockItem>("inventory");
//! let stored = coordinator.write(Record::new(StockItem::new("gauze", 10))).await?;
//! assert!(stored.key.is_some());
//! # Ok(())
//! # }
//! ```

mod context;
mod fixtures;

pub use context::{MemoryCoordinator, TestContext, memory_coordinator, memory_coordinator_with};
pub use fixtures::{AuditEntry, LabResult, StockItem};

use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static TRACING: Once = Once::new();

/// Install a tracing subscriber writing through the test harness
///
/// Honours `RUST_LOG`; defaults to warnings from this crate. Safe to call
/// from every test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "tandem_core=warn".into());
        // another subscriber may already be installed by the host binary
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

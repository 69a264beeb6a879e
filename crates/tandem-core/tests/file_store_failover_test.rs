//! Failover onto a file-backed secondary and recovery across a restart

use std::sync::Arc;

use tandem_core::store::{JsonFileStore, MemoryStore};
use tandem_core::testing::{StockItem, TestContext, init_tracing};
use tandem_core::{
    CoordinatorConfig, Key, Origin, Query, Record, ReplicationCoordinator, StoreHandle,
};

type FileCoordinator =
    ReplicationCoordinator<StockItem, Arc<MemoryStore<StockItem>>, JsonFileStore<StockItem>>;

fn coordinator(primary: &Arc<MemoryStore<StockItem>>, secondary: JsonFileStore<StockItem>) -> FileCoordinator {
    ReplicationCoordinator::new(
        CoordinatorConfig::new("inventory"),
        Arc::clone(primary),
        secondary,
    )
    .unwrap()
}

fn item(name: &str, stock: u32) -> Record<StockItem> {
    Record::new(StockItem::new(name, stock))
}

#[tokio::test]
async fn test_replicated_writes_reach_disk() {
    init_tracing();
    let ctx = TestContext::new();
    let primary = Arc::new(MemoryStore::new("cloud"));
    let coord = coordinator(&primary, ctx.file_store("local"));

    let stored = coord.write(item("gauze", 4)).await.unwrap();
    coord.mutate(stored.key.unwrap(), |s| s.take(1)).await.unwrap();
    drop(coord);

    let reopened: JsonFileStore<StockItem> = ctx.file_store("local");
    let on_disk = reopened.find_by_key(stored.key.unwrap()).await.unwrap();
    assert_eq!(on_disk.uid, stored.uid);
    assert_eq!(on_disk.body.stock, 3);
    assert_eq!(on_disk.origin, Origin::Primary);
}

#[tokio::test]
async fn test_outage_writes_survive_restart_and_reconcile() {
    init_tracing();
    let ctx = TestContext::new();
    let primary = Arc::new(MemoryStore::new("cloud"));

    let coord = coordinator(&primary, ctx.file_store("local"));
    let kept = coord.write(item("gown", 2)).await.unwrap();
    primary.set_unreachable();
    let first = coord.write(item("mask", 10)).await.unwrap();
    let second = coord.write(item("swab", 20)).await.unwrap();
    assert!(coord.identity().is_local(first.key.unwrap()));
    assert_eq!(second.key.unwrap().get(), first.key.unwrap().get() + 1);
    assert_eq!(coord.outbox_len(), 2);
    drop(coord);

    // the outbox is gone with the process, the local rows are not
    primary.heal();
    let coord = coordinator(&primary, ctx.file_store("local"));
    let local = coord
        .secondary()
        .query(&Query::all().with_origin(Origin::Local))
        .await
        .unwrap();
    assert_eq!(local.len(), 2);
    assert_eq!(coord.rebuild_outbox().await.unwrap(), 2);

    let report = coord.reconcile().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(
        report.rekeyed,
        vec![
            (first.key.unwrap(), Key::new(2)),
            (second.key.unwrap(), Key::new(3)),
        ]
    );
    drop(coord);

    let reopened: JsonFileStore<StockItem> = ctx.file_store("local");
    assert_eq!(reopened.len(), 3);
    for (key, uid) in [
        (kept.key.unwrap(), kept.uid),
        (Key::new(2), first.uid),
        (Key::new(3), second.uid),
    ] {
        let record = reopened.find_by_key(key).await.unwrap();
        assert_eq!(record.uid, uid);
        assert_eq!(record.origin, Origin::Primary);
        assert_eq!(primary.get(key).unwrap().uid, uid);
    }
}

#[tokio::test]
async fn test_unwritable_secondary_is_degraded_not_failed() {
    init_tracing();
    let ctx = TestContext::new();
    let primary = Arc::new(MemoryStore::new("cloud"));
    let secondary: JsonFileStore<StockItem> = ctx.file_store("local");
    let path = secondary.path().to_path_buf();
    let coord = coordinator(&primary, secondary);

    // a directory where the store file should be makes every rename fail
    std::fs::create_dir_all(&path).unwrap();
    let stored = coord.write(item("gauze", 1)).await.unwrap();
    assert_eq!(stored.key, Some(Key::new(1)));
    assert_eq!(primary.len(), 1);
    assert_eq!(coord.secondary().len(), 0);
    assert_eq!(coord.stats().degraded_replications, 1);
}

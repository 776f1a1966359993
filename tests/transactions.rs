//! Transaction lifecycle: commit listeners, rollback and settings

mod common;

use berth::{ChangeTracker, Entity, OrmCode, OrmError, TransactionConfig, TransactionSettings};
use common::{orm_for, seeded_store};
use std::sync::{Arc, Mutex};

#[test]
fn test_listeners_see_the_changes() {
    let store = seeded_store();
    let (orm, driver) = orm_for(&store);
    let seen_before: Arc<Mutex<Option<ChangeTracker>>> = Arc::default();
    let seen_detached: Arc<Mutex<Option<ChangeTracker>>> = Arc::default();

    let before = Arc::clone(&seen_before);
    let detached = Arc::clone(&seen_detached);
    let config = TransactionConfig::new()
        .before_commit(move |changes, session| {
            // listeners may still query inside the transaction
            session.count("Port", None)?;
            *before.lock().expect("before") = Some(changes.clone());
            Ok(())
        })
        .after_commit_detached(move |changes| {
            *detached.lock().expect("detached") = Some(changes.clone());
        });

    orm.in_transaction_with(config, |db| -> Result<(), OrmError> {
        db.save_one("Port", &Entity::new("Port").with("name", "Hamburg"))?;
        db.delete_by_ids("LoadOrder", &["102"])?;
        Ok(())
    })
    .expect("transaction");

    let before = seen_before.lock().expect("before").clone().expect("before_commit ran");
    assert_eq!(before.inserted("Port").map(|ids| ids.len()), Some(1));
    assert!(before.deleted("LoadOrder").is_some_and(|ids| ids.contains("102")));
    assert_eq!(seen_detached.lock().expect("detached").clone(), Some(before));
    assert_eq!(driver.statement_count(), 3);
    assert_eq!(driver.commits(), 1);
}

#[test]
fn test_failed_statement_rolls_back_with_queries() {
    let store = seeded_store();
    let (orm, driver) = orm_for(&store);
    store.fail_when("\"captain\"");

    let err = orm
        .in_transaction(|db| {
            let mut ship = db.find_one("Ship", "1")?;
            ship.one(db, "captain").map(|c| c.is_some())
        })
        .unwrap_err();

    assert_eq!(err.code(), OrmCode::Driver);
    assert_eq!(err.queries().len(), 2);
    assert!(err.queries()[1].query.contains("\"captain\""));
    assert_eq!(driver.rollbacks(), 1);
    assert_eq!(driver.commits(), 0);
}

#[test]
fn test_cache_miss_warning_does_not_fail_the_commit() {
    let store = seeded_store();
    let (orm, driver) = orm_for(&store);
    let orm = orm.with_settings(TransactionSettings {
        relation_cache_miss_warning: 0,
        warn_on_cache_misses: true,
    });

    let misses = orm
        .in_transaction(|db| {
            let mut ship = db.find_one("Ship", "1")?;
            ship.many(db, "calls")?;
            ship.one(db, "homePort")?;
            Ok(db.relation_cache_misses())
        })
        .expect("warning only");
    assert_eq!(misses, 2);
    assert_eq!(driver.commits(), 1);
}

#[test]
fn test_read_only_transaction() {
    let store = seeded_store();
    let (orm, driver) = orm_for(&store);

    let count = orm
        .in_transaction_with(TransactionConfig::new().read_only(true), |db| db.count("Ship", None))
        .expect("read-only count");
    assert_eq!(count, 2);
    assert_eq!(driver.read_only_begins(), 1);
    assert!(driver.recorded().iter().all(|s| s.read_only));
}

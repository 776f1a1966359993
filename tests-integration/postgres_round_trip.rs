//! Integration tests against a real PostgreSQL database
//!
//! Set `TEST_DATABASE_URL` to run them; without it every test returns early.
//!
//! Test flow:
//! 1. Recreate two small tables
//! 2. Insert a dock and its vessels
//! 3. Walk the relations in a fresh transaction and count statements
//! 4. Delete and check the change set

use berth::config::DatabaseConfig;
use berth::schema::{EntityDef, FieldDef, FieldType, RelationDecl, Schema};
use berth::{Entity, FieldValue, Orm, OrmCode, OrmError, PgDriver, SqlStatement};
use std::env;
use std::sync::Arc;

fn test_orm() -> Option<Orm> {
    let url = env::var("TEST_DATABASE_URL").ok()?;
    let schema = Schema::builder()
        .entity(
            EntityDef::new("BerthItDock")
                .field("id", FieldDef::id())
                .field("name", FieldDef::new(FieldType::Text, false))
                .one_to_many("vessels", RelationDecl::to("BerthItVessel").inverse("dock")),
        )
        .entity(
            EntityDef::new("BerthItVessel")
                .field("id", FieldDef::id())
                .field("name", FieldDef::new(FieldType::Text, false))
                .field("tonnage", FieldDef::new(FieldType::Integer, true))
                .many_to_one("dock", RelationDecl::to("BerthItDock")),
        )
        .build()
        .expect("schema");
    let driver = PgDriver::new(DatabaseConfig::with_url(url));
    Some(Orm::new(Arc::new(driver), schema))
}

fn recreate_tables(orm: &Orm) -> Result<(), OrmError> {
    orm.in_transaction(|db| {
        for sql in [
            "DROP TABLE IF EXISTS berth_it_vessel",
            "DROP TABLE IF EXISTS berth_it_dock",
            "CREATE TABLE berth_it_dock (id BIGSERIAL PRIMARY KEY, name TEXT NOT NULL)",
            "CREATE TABLE berth_it_vessel (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                tonnage BIGINT,
                dock_id BIGINT NOT NULL REFERENCES berth_it_dock (id)
            )",
        ] {
            db.native_query(&SqlStatement::new(sql))?;
        }
        Ok(())
    })
}

#[test]
fn test_round_trip() {
    let Some(orm) = test_orm() else {
        eprintln!("TEST_DATABASE_URL not set, skipping");
        return;
    };
    recreate_tables(&orm).expect("tables");

    let dock_id = orm
        .in_transaction(|db| {
            let dock = db.save_one("BerthItDock", &Entity::new("BerthItDock").with("name", "North"))?;
            let vessels: Vec<Entity> = ["Aurora", "Borealis", "Cygnus"]
                .iter()
                .map(|name| {
                    let mut vessel = Entity::new("BerthItVessel").with("name", *name);
                    vessel.set_one("dock", Some(dock.clone()));
                    vessel
                })
                .collect();
            let saved = db.save_many("BerthItVessel", &vessels)?;
            assert_eq!(saved.len(), 3);
            assert_eq!(db.transaction_statistics().len(), 2);
            Ok(dock.id().map(str::to_string).unwrap_or_default())
        })
        .expect("inserts");

    let (names, statements) = orm
        .in_transaction(|db| {
            let mut dock = db.find_one("BerthItDock", &dock_id)?;
            let mut names = Vec::new();
            for vessel in dock.many(db, "vessels")?.iter_mut() {
                let owner = vessel.one(db, "dock")?.and_then(|d| d.id().map(str::to_string));
                assert_eq!(owner.as_deref(), Some(dock_id.as_str()));
                if let Some(FieldValue::Text(name)) = vessel.get("name") {
                    names.push(name.clone());
                }
            }
            Ok((names, db.transaction_statistics().len()))
        })
        .expect("walk");
    assert_eq!(names.len(), 3);
    // the dock, its vessels, and one shared lookup of the owning dock
    assert_eq!(statements, 3);

    let changes = orm
        .in_transaction(|db| {
            let count = db.count("BerthItVessel", None)?;
            assert_eq!(count, 3);
            let vessels = db.find_many("BerthItVessel", &Default::default())?;
            let ids: Vec<&str> = vessels.iter().filter_map(Entity::id).collect();
            db.delete_by_ids("BerthItVessel", &ids)?;
            Ok(db.changes())
        })
        .expect("delete");
    assert_eq!(changes.deleted("BerthItVessel").map(|ids| ids.len()), Some(3));

    let err = orm
        .in_transaction(|db| db.find_one("BerthItVessel", "1"))
        .unwrap_err();
    assert_eq!(err.code(), OrmCode::EntityNotFound);
}

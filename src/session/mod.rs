//! Transaction-scoped database access
//!
//! A [`Session`] is handed to the body of [`crate::Orm::in_transaction`]. It
//! owns the transaction's entity cache, both relation caches, the change
//! tracker and the statement log; all of them are dropped with it.
//!
//! A session is `Sync`: coroutines spawned inside a transaction body may share
//! one `&Session`. Relation fetches for the same (entity type, relation) pair
//! are then still issued once.

mod find;
mod resolve;
mod save;

pub use find::FindManyAndCount;

use crate::cache::{
    lock, ChangeTracker, EntityCache, InverseBatch, OwnedBatch, RelationCache, SaveOutcome,
};
use crate::entity::Entity;
use crate::error::{ErrorContext, OrmCode, OrmError};
use crate::executor::{RawRow, TransactionControls};
use crate::query::row::id_of;
use crate::query::value_conversion::value_to_json;
use crate::query::SqlStatement;
use crate::schema::{EntitySchema, Schema};
use crate::value::FieldValue;
use may::sync::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// One executed statement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryStat {
    pub query: String,
    pub params: Vec<serde_json::Value>,
    pub duration: Duration,
}

impl QueryStat {
    pub fn new(query: impl Into<String>, params: Vec<serde_json::Value>, duration: Duration) -> Self {
        Self {
            query: query.into(),
            params,
            duration,
        }
    }
}

/// Snapshot of the statements executed so far in a transaction
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransactionStatistics {
    pub queries: Vec<QueryStat>,
}

impl TransactionStatistics {
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn total_duration(&self) -> Duration {
        self.queries.iter().map(|q| q.duration).sum()
    }
}

pub struct Session {
    id: u64,
    schema: Arc<Schema>,
    controls: Mutex<Option<Box<dyn TransactionControls>>>,
    active: AtomicBool,
    entities: Mutex<EntityCache>,
    owned: RelationCache<OwnedBatch>,
    inverse: RelationCache<InverseBatch>,
    changes: Mutex<ChangeTracker>,
    stats: Mutex<Vec<QueryStat>>,
    relation_cache_misses: AtomicUsize,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .field("relation_cache_misses", &self.relation_cache_misses())
            .finish()
    }
}

fn inactive(operation: &str, entity: Option<&str>) -> OrmError {
    let mut context = ErrorContext::new(operation);
    if let Some(entity) = entity {
        context = context.entity(entity);
    }
    OrmError::new(OrmCode::InactiveTransaction, context)
}

/// Encode a string id as a parameter for `entity`'s id column
pub(crate) fn encode_id(entity: &EntitySchema, id: &str) -> Result<sea_query::Value, OrmError> {
    entity
        .id_field()
        .def
        .field_type
        .encode(&FieldValue::from(id))
        .map_err(|detail| {
            OrmError::new(
                OrmCode::ValueConversion,
                ErrorContext::new("encode-id").entity(entity.name()).field("id"),
            )
            .with_detail(detail)
        })
}

impl Session {
    pub(crate) fn new(id: u64, schema: Arc<Schema>, controls: Box<dyn TransactionControls>) -> Self {
        Self {
            id,
            schema,
            controls: Mutex::new(Some(controls)),
            active: AtomicBool::new(true),
            entities: Mutex::new(EntityCache::new()),
            owned: RelationCache::new(),
            inverse: RelationCache::new(),
            changes: Mutex::new(ChangeTracker::new()),
            stats: Mutex::new(Vec::new()),
            relation_cache_misses: AtomicUsize::new(0),
        }
    }

    /// Process-unique transaction id
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn transaction_statistics(&self) -> TransactionStatistics {
        TransactionStatistics {
            queries: self.queries(),
        }
    }

    /// Inserted, updated and deleted ids so far
    pub fn changes(&self) -> ChangeTracker {
        lock(&self.changes).clone()
    }

    /// Relation fetches that could not be served from the relation caches
    pub fn relation_cache_misses(&self) -> usize {
        self.relation_cache_misses.load(Ordering::Relaxed)
    }

    /// Run a hand-written statement and return its raw rows
    ///
    /// Rows are not merged into the entity cache.
    pub fn native_query(&self, statement: &SqlStatement) -> Result<Vec<RawRow>, OrmError> {
        self.execute("nativeQuery", None, statement)
    }

    pub(crate) fn queries(&self) -> Vec<QueryStat> {
        lock(&self.stats).clone()
    }

    pub(crate) fn ensure_active(&self, operation: &str, entity: &str) -> Result<(), OrmError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(inactive(operation, Some(entity)))
        }
    }

    /// End the session and hand back its transaction, once
    pub(crate) fn take_controls(&self) -> Option<Box<dyn TransactionControls>> {
        self.active.store(false, Ordering::Release);
        lock(&self.controls).take()
    }

    pub(crate) fn wait_for_all_resolved(&self) {
        self.owned.wait_for_all_resolved();
        self.inverse.wait_for_all_resolved();
    }

    pub(crate) fn execute(
        &self,
        operation: &str,
        entity: Option<&str>,
        statement: &SqlStatement,
    ) -> Result<Vec<RawRow>, OrmError> {
        let controls = lock(&self.controls);
        let Some(controls) = controls.as_ref().filter(|_| self.is_active()) else {
            return Err(inactive(operation, entity));
        };

        log::debug!("[tx {}] {}", self.id, statement.sql);
        let params = statement.values.iter().map(value_to_json).collect();
        let start = Instant::now();
        let result = controls.query(&statement.sql, &statement.values);
        lock(&self.stats).push(QueryStat::new(statement.sql.clone(), params, start.elapsed()));

        result.map_err(|err| {
            let error = OrmError::driver(operation, err);
            match entity {
                Some(entity) => error.with_entity(entity),
                None => error,
            }
        })
    }

    /// Store fetched rows; new ids make every relation cached for the type stale
    pub(crate) fn merge_rows(&self, entity: &str, rows: &[RawRow]) -> Result<Vec<String>, OrmError> {
        let mut ids = Vec::with_capacity(rows.len());
        let mut any_new = false;
        {
            let mut cache = lock(&self.entities);
            for row in rows {
                let id = id_of(row).ok_or_else(|| {
                    OrmError::new(
                        OrmCode::NullOutputField,
                        ErrorContext::new("merge-rows").entity(entity).field("id"),
                    )
                })?;
                if cache.save(entity, &id, row.clone()) == SaveOutcome::New {
                    any_new = true;
                }
                ids.push(id);
            }
        }
        if any_new {
            self.owned.invalidate_for_entity(entity);
            self.inverse.invalidate_for_entity(entity);
        }
        Ok(ids)
    }

    /// Clear relation entries that may miss rows of `mutated` after a write
    pub(crate) fn invalidate_after_write(&self, mutated: &str) {
        let schema = &self.schema;
        let affected =
            |source: &str, relation: &str| schema.relation_affected_by(source, relation, mutated);
        self.owned.invalidate_by_condition(affected);
        self.inverse.invalidate_by_condition(affected);
    }

    pub(crate) fn wrap(&self, entity: &EntitySchema, row: &RawRow) -> Result<Entity, OrmError> {
        Entity::from_row(entity, row, self.id)
    }

    pub(crate) fn wrap_all(&self, entity: &EntitySchema, rows: &[RawRow]) -> Result<Vec<Entity>, OrmError> {
        rows.iter().map(|row| self.wrap(entity, row)).collect()
    }

    pub(crate) fn record_relation_access(&self, served_from_cache: bool) {
        if served_from_cache {
            #[cfg(feature = "metrics")]
            METRICS.record_relation_cache_hit();
        } else {
            self.relation_cache_misses.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "metrics")]
            METRICS.record_relation_fetch();
        }
    }

    pub(crate) fn record_changes<F>(&self, update: F)
    where
        F: FnOnce(&mut ChangeTracker),
    {
        update(&mut lock(&self.changes));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Driver;
    use crate::mock::MockDriver;
    use crate::schema::{EntityDef, FieldDef, RelationDecl};
    use serde_json::json;

    fn session(driver: &MockDriver) -> Session {
        let schema = Schema::builder()
            .entity(
                EntityDef::new("Ship")
                    .field("id", FieldDef::id())
                    .one_to_many("calls", RelationDecl::to("Call").inverse("ship")),
            )
            .entity(
                EntityDef::new("Call")
                    .field("id", FieldDef::id())
                    .many_to_one("ship", RelationDecl::to("Ship")),
            )
            .build()
            .expect("schema");
        Session::new(1, schema, driver.begin(false).expect("begin"))
    }

    fn row(value: serde_json::Value) -> RawRow {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn test_execute_records_statistics() {
        let driver = MockDriver::empty();
        let session = session(&driver);
        session
            .native_query(&SqlStatement::new("select $1").bind(5i64))
            .expect("query");
        let stats = session.transaction_statistics();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats.queries[0].params, vec![json!(5)]);
    }

    #[test]
    fn test_inactive_session_rejects_statements() {
        let driver = MockDriver::empty();
        let session = session(&driver);
        assert!(session.take_controls().is_some());
        let err = session.native_query(&SqlStatement::new("select 1")).unwrap_err();
        assert_eq!(err.code(), OrmCode::InactiveTransaction);
        assert_eq!(driver.statement_count(), 0);
        assert!(session.take_controls().is_none());
    }

    #[test]
    fn test_merging_new_rows_invalidates_source_entries() {
        let driver = MockDriver::empty();
        let session = session(&driver);
        let _ = session.owned.get_or_fetch("Call", "ship", || Ok(OwnedBatch::default()));
        let _ = session.inverse.get_or_fetch("Ship", "calls", || Ok(InverseBatch::default()));

        session.merge_rows("Call", &[row(json!({"id": 1}))]).expect("merge");
        assert!(session.owned.find("Call", "ship").is_none());
        assert!(session.inverse.find("Ship", "calls").is_some());

        // a known row is an update and invalidates nothing
        let _ = session.owned.get_or_fetch("Call", "ship", || Ok(OwnedBatch::default()));
        session.merge_rows("Call", &[row(json!({"id": 1}))]).expect("merge");
        assert!(session.owned.find("Call", "ship").is_some());
    }

    #[test]
    fn test_invalidate_after_write_matches_targets() {
        let driver = MockDriver::empty();
        let session = session(&driver);
        let _ = session.inverse.get_or_fetch("Ship", "calls", || Ok(InverseBatch::default()));
        session.invalidate_after_write("Call");
        assert!(session.inverse.find("Ship", "calls").is_none());
    }

    #[test]
    fn test_merge_rejects_rows_without_id() {
        let driver = MockDriver::empty();
        let session = session(&driver);
        let err = session.merge_rows("Call", &[row(json!({"name": "x"}))]).unwrap_err();
        assert_eq!(err.code(), OrmCode::NullOutputField);
    }
}

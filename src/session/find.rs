use super::{encode_id, Session};
use crate::cache::lock;
use crate::entity::Entity;
use crate::error::{ErrorContext, OrmCode, OrmError};
use crate::executor::RawRow;
use crate::query::row::id_of;
use crate::query::statement::{self, COUNT_ALIAS};
use crate::query::FindManyOptions;
use sea_query::Condition;
use serde_json::Value as Json;
use std::collections::{BTreeMap, BTreeSet};

/// One page of results plus the size of the whole filtered set
#[derive(Debug, Clone)]
pub struct FindManyAndCount {
    pub results: Vec<Entity>,
    pub total: i64,
}

impl Session {
    /// Fetch one entity by id
    ///
    /// A row already loaded in this transaction is served from the entity
    /// cache without a statement.
    ///
    /// # Errors
    ///
    /// `ORM-1200` when no row exists, `ORM-1201` when more than one does.
    pub fn find_one(&self, entity: &str, id: &str) -> Result<Entity, OrmError> {
        self.find_one_or_null(entity, id)?.ok_or_else(|| {
            OrmError::new(OrmCode::EntityNotFound, ErrorContext::new("findOne").entity(entity))
                .with_detail(format!("id {id}"))
        })
    }

    /// Like [`Session::find_one`] but `None` when no row exists
    pub fn find_one_or_null(&self, entity: &str, id: &str) -> Result<Option<Entity>, OrmError> {
        const OP: &str = "findOneOrNull";
        self.ensure_active(OP, entity)?;
        let schema = self.schema.entity(entity)?;
        let cached = lock(&self.entities).get(entity, id);
        if let Some(row) = cached {
            log::trace!("findOneOrNull on {entity} {id} served from cache");
            return self.wrap(schema, &row).map(Some);
        }
        let stmt = statement::select_where_in(schema.table(), "id", vec![encode_id(schema, id)?]);
        let rows = self.execute(OP, Some(entity), &stmt)?;
        match rows.as_slice() {
            [] => Ok(None),
            [row] => {
                self.merge_rows(entity, &rows)?;
                self.wrap(schema, row).map(Some)
            }
            _ => Err(OrmError::new(
                OrmCode::MultipleRows,
                ErrorContext::new(OP).entity(entity),
            )
            .with_detail(format!("{} rows for id {id}", rows.len()))),
        }
    }

    /// Fetch entities by id, in the order of `ids`
    ///
    /// An empty `ids` returns immediately. When every id is already cached in
    /// this transaction, no statement is issued.
    ///
    /// # Errors
    ///
    /// `ORM-1202` when the database does not return exactly one row per
    /// distinct id.
    pub fn find_by_ids<S: AsRef<str>>(&self, entity: &str, ids: &[S]) -> Result<Vec<Entity>, OrmError> {
        const OP: &str = "findByIds";
        self.ensure_active(OP, entity)?;
        let schema = self.schema.entity(entity)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen = BTreeSet::new();
        let distinct: Vec<&str> = ids
            .iter()
            .map(AsRef::as_ref)
            .filter(|id| seen.insert(*id))
            .collect();

        let cached: Option<Vec<_>> = {
            let cache = lock(&self.entities);
            ids.iter().map(|id| cache.get(entity, id.as_ref())).collect()
        };
        if let Some(rows) = cached {
            log::trace!("findByIds on {entity} served from cache");
            return rows.iter().map(|row| self.wrap(schema, row)).collect();
        }

        let values = distinct
            .iter()
            .map(|id| encode_id(schema, id))
            .collect::<Result<Vec<_>, _>>()?;
        let rows = self.execute(
            OP,
            Some(entity),
            &statement::select_where_in(schema.table(), "id", values),
        )?;
        if rows.len() != distinct.len() {
            return Err(OrmError::new(
                OrmCode::RowCountMismatch,
                ErrorContext::new(OP).entity(entity),
            )
            .with_detail(format!("expected {} rows, got {}", distinct.len(), rows.len())));
        }
        self.merge_rows(entity, &rows)?;

        let by_id: BTreeMap<String, &RawRow> = rows
            .iter()
            .filter_map(|row| id_of(row).map(|id| (id, row)))
            .collect();
        ids.iter()
            .map(|id| {
                let row = by_id.get(id.as_ref()).ok_or_else(|| {
                    OrmError::new(OrmCode::RowCountMismatch, ErrorContext::new(OP).entity(entity))
                        .with_detail(format!("no row for id {}", id.as_ref()))
                })?;
                self.wrap(schema, row)
            })
            .collect()
    }

    /// Fetch every entity matching `options`
    ///
    /// # Errors
    ///
    /// `ORM-1205` when an offset or limit is given without an order.
    pub fn find_many(&self, entity: &str, options: &FindManyOptions) -> Result<Vec<Entity>, OrmError> {
        const OP: &str = "findMany";
        self.ensure_active(OP, entity)?;
        let schema = self.schema.entity(entity)?;
        if options.is_paginated() && options.order_by.is_empty() {
            return Err(OrmError::new(
                OrmCode::PaginationWithoutOrder,
                ErrorContext::new(OP).entity(entity),
            ));
        }
        let rows = self.execute(OP, Some(entity), &statement::select_many(schema.table(), options))?;
        self.merge_rows(entity, &rows)?;
        self.wrap_all(schema, &rows)
    }

    /// Number of rows matching `filter`
    pub fn count(&self, entity: &str, filter: Option<&Condition>) -> Result<i64, OrmError> {
        const OP: &str = "count";
        self.ensure_active(OP, entity)?;
        let schema = self.schema.entity(entity)?;
        let rows = self.execute(OP, Some(entity), &statement::count(schema.table(), filter))?;
        let amount = rows.first().and_then(|row| row.get(COUNT_ALIAS));
        let parsed = match amount {
            Some(Json::Number(n)) => n.as_i64(),
            Some(Json::String(s)) => s.parse().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| {
            OrmError::new(OrmCode::ValueConversion, ErrorContext::new(OP).entity(entity))
                .with_detail(format!("unreadable count {amount:?}"))
        })
    }

    /// [`Session::find_many`] plus the [`Session::count`] of the same filter,
    /// ignoring offset and limit
    pub fn find_many_and_count(
        &self,
        entity: &str,
        options: &FindManyOptions,
    ) -> Result<FindManyAndCount, OrmError> {
        let results = self.find_many(entity, options)?;
        let total = self.count(entity, options.filter.as_ref())?;
        Ok(FindManyAndCount { results, total })
    }
}

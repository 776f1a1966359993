use super::{encode_id, Session};
use crate::cache::lock;
use crate::entity::{Entity, Relation, RelationValue};
use crate::error::{ErrorContext, OrmCode, OrmError};
use crate::executor::RawRow;
use crate::query::row::id_of;
use crate::query::statement::{self, iden};
use crate::schema::{EntitySchema, RelationDef, RelationKind};
use crate::value::FieldValue;
use sea_query::{Condition, Expr, ExprTrait, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Column layout of a written batch
struct ColumnPlan {
    name: String,
    /// Typed null used when a row carries no value for the column
    null: Value,
    /// Omitted from an insert when null in every row
    optional: bool,
}

/// One entity flattened to column values
struct WriteRow {
    position: usize,
    id: Option<Value>,
    values: BTreeMap<String, Value>,
    /// Columns holding a non-null value
    set: BTreeSet<String>,
}

fn save_context(entity: &str) -> ErrorContext {
    ErrorContext::new("saveMany").entity(entity)
}

impl Session {
    /// Insert or update one entity and return it as stored
    pub fn save_one(&self, entity: &str, value: &Entity) -> Result<Entity, OrmError> {
        self.save_many(entity, std::slice::from_ref(value))?
            .pop()
            .ok_or_else(|| OrmError::new(OrmCode::SaveFailed, ErrorContext::new("saveOne").entity(entity)))
    }

    /// Insert entities without an id and update the others
    ///
    /// Inserts go out as one multi-row statement; updates are one statement
    /// per entity. Owned relations still unresolved from a fetch are left
    /// untouched; an owned relation missing from the entity counts as null.
    /// The result follows the order of `values`.
    ///
    /// # Errors
    ///
    /// `ORM-1301` to `ORM-1306` for invalid input, raised before any statement
    /// is issued; `ORM-1300` when the database returns fewer rows than written.
    pub fn save_many(&self, entity: &str, values: &[Entity]) -> Result<Vec<Entity>, OrmError> {
        const OP: &str = "saveMany";
        self.ensure_active(OP, entity)?;
        let schema = self.schema.entity(entity)?;
        if values.is_empty() {
            return Ok(Vec::new());
        }

        let mut columns: Vec<ColumnPlan> = Vec::new();
        for field in schema.fields().iter().filter(|f| f.name != "id") {
            let null = field.def.field_type.encode(&FieldValue::Null).map_err(|detail| {
                OrmError::new(OrmCode::ValueConversion, save_context(entity).field(&field.name))
                    .with_detail(detail)
            })?;
            columns.push(ColumnPlan {
                name: field.column.clone(),
                null,
                optional: field.def.nullable_on_input,
            });
        }
        for relation in schema.owned_relations() {
            let target = self.schema.entity(&relation.target)?;
            let null = target
                .id_field()
                .def
                .field_type
                .encode(&FieldValue::Null)
                .unwrap_or(Value::BigInt(None));
            columns.push(ColumnPlan {
                name: relation.column.clone(),
                null,
                optional: relation.nullable,
            });
        }

        let rows = values
            .iter()
            .enumerate()
            .map(|(position, value)| self.flatten(schema, position, value))
            .collect::<Result<Vec<_>, _>>()?;
        let (inserts, updates): (Vec<WriteRow>, Vec<WriteRow>) =
            rows.into_iter().partition(|row| row.id.is_none());

        let mut saved: Vec<Option<Entity>> = values.iter().map(|_| None).collect();

        if !inserts.is_empty() {
            let returned = self.insert_rows(schema, &columns, &inserts)?;
            let ids = self.store_written(schema, &returned)?;
            self.record_changes(|changes| changes.add_inserted_entities(entity, ids));
            for (row, raw) in inserts.iter().zip(&returned) {
                saved[row.position] = Some(self.wrap(schema, raw)?);
            }
        }

        if !updates.is_empty() {
            let mut returned = Vec::with_capacity(updates.len());
            for row in &updates {
                let sets = columns
                    .iter()
                    .filter_map(|c| row.values.get(&c.name).map(|v| (c.name.clone(), v.clone())))
                    .collect();
                let id = row.id.clone().unwrap_or(Value::BigInt(None));
                let stmt = statement::update_row(schema.table(), id, sets);
                let mut rows = self.execute(OP, Some(entity), &stmt)?;
                let raw = rows.pop().ok_or_else(|| {
                    OrmError::new(OrmCode::SaveFailed, ErrorContext::new(OP).entity(entity))
                        .with_detail("update returned no row")
                })?;
                returned.push(raw);
            }
            let ids = self.store_written(schema, &returned)?;
            self.record_changes(|changes| changes.add_updated_entities(entity, ids));
            for (row, raw) in updates.iter().zip(&returned) {
                saved[row.position] = Some(self.wrap(schema, raw)?);
            }
        }

        saved
            .into_iter()
            .map(|entity_out| {
                entity_out.ok_or_else(|| OrmError::new(OrmCode::SaveFailed, ErrorContext::new(OP).entity(entity)))
            })
            .collect()
    }

    /// Delete rows by id; unknown ids are ignored
    pub fn delete_by_ids<S: AsRef<str>>(&self, entity: &str, ids: &[S]) -> Result<Vec<String>, OrmError> {
        self.ensure_active("deleteByIds", entity)?;
        let schema = self.schema.entity(entity)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let values = ids
            .iter()
            .map(|id| encode_id(schema, id.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        self.delete_many(entity, Condition::all().add(Expr::col(iden("id")).is_in(values)))
    }

    /// Delete every row matching `filter` and return the deleted ids
    ///
    /// Deleted rows leave the entity cache, so relations resolved later in
    /// the transaction no longer yield them.
    pub fn delete_many(&self, entity: &str, filter: Condition) -> Result<Vec<String>, OrmError> {
        const OP: &str = "deleteMany";
        self.ensure_active(OP, entity)?;
        let schema = self.schema.entity(entity)?;
        let rows = self.execute(OP, Some(entity), &statement::delete_where(schema.table(), filter))?;
        let ids: Vec<String> = rows.iter().filter_map(id_of).collect();
        {
            let mut cache = lock(&self.entities);
            for id in &ids {
                cache.remove(entity, id);
            }
        }
        log::debug!("[tx {}] deleted {} {entity} row(s)", self.id, ids.len());
        self.record_changes(|changes| changes.add_deleted_entities(entity, ids.iter().cloned()));
        Ok(ids)
    }

    fn flatten(&self, schema: &EntitySchema, position: usize, value: &Entity) -> Result<WriteRow, OrmError> {
        let entity = schema.name();
        if value.entity_type() != entity {
            return Err(OrmError::new(OrmCode::WrongEntityType, save_context(entity))
                .with_detail(format!("got {}", value.entity_type())));
        }

        let mut id = None;
        let mut values = BTreeMap::new();
        let mut set = BTreeSet::new();
        for field in schema.fields() {
            let field_value = value.get(&field.name).cloned().unwrap_or(FieldValue::Null);
            if field_value.is_null() {
                if field.name == "id" {
                    continue;
                }
                if !field.def.nullable_on_input {
                    return Err(OrmError::new(
                        OrmCode::NullInputField,
                        save_context(entity).field(&field.name),
                    ));
                }
            }
            let encoded = field.def.field_type.encode(&field_value).map_err(|detail| {
                OrmError::new(
                    OrmCode::ValueConversion,
                    save_context(entity).field(&field.name),
                )
                .with_detail(detail)
            })?;
            if field.name == "id" {
                id = Some(encoded);
            } else {
                if !field_value.is_null() {
                    set.insert(field.column.clone());
                }
                values.insert(field.column.clone(), encoded);
            }
        }

        for relation in schema.owned_relations() {
            // an untouched lazy relation is left as stored; an absent one is null
            let target = match value.relation(&relation.name) {
                Some(Relation::Unresolved(_)) => continue,
                None => None,
                Some(Relation::Resolved(RelationValue::One(target))) => target.as_deref(),
                Some(Relation::Resolved(RelationValue::Many(_))) => {
                    return Err(OrmError::new(
                        OrmCode::RelationCardinalityMismatch,
                        save_context(entity).relation(&relation.name),
                    ));
                }
            };
            if target.is_some() {
                set.insert(relation.column.clone());
            }
            values.insert(relation.column.clone(), self.foreign_key_value(schema, relation, target)?);
        }

        Ok(WriteRow {
            position,
            id,
            values,
            set,
        })
    }

    fn foreign_key_value(
        &self,
        schema: &EntitySchema,
        relation: &RelationDef,
        target: Option<&Entity>,
    ) -> Result<Value, OrmError> {
        let one_to_one = relation.kind == RelationKind::OneToOneOwned;
        let context = || save_context(schema.name()).relation(&relation.name);
        let target_schema = self.schema.entity(&relation.target)?;
        match target {
            None if relation.nullable => target_schema
                .id_field()
                .def
                .field_type
                .encode(&FieldValue::Null)
                .map_err(|detail| OrmError::new(OrmCode::ValueConversion, context()).with_detail(detail)),
            None => {
                let code = if one_to_one { OrmCode::NullOneToOneOwned } else { OrmCode::NullManyToOne };
                Err(OrmError::new(code, context()))
            }
            Some(target) => match target.id() {
                Some(id) => encode_id(target_schema, id),
                None => {
                    let code = if one_to_one { OrmCode::UnsavedOneToOneOwned } else { OrmCode::UnsavedManyToOne };
                    Err(OrmError::new(code, context()))
                }
            },
        }
    }

    fn insert_rows(
        &self,
        schema: &EntitySchema,
        columns: &[ColumnPlan],
        rows: &[WriteRow],
    ) -> Result<Vec<RawRow>, OrmError> {
        const OP: &str = "saveMany";
        let entity = schema.name();
        let used: Vec<&ColumnPlan> = columns
            .iter()
            .filter(|c| {
                let present = rows.iter().any(|r| r.set.contains(&c.name));
                let mentioned = rows.iter().any(|r| r.values.contains_key(&c.name));
                present || (mentioned && !c.optional)
            })
            .collect();

        let returned = if used.is_empty() {
            let mut returned = Vec::with_capacity(rows.len());
            for _ in rows {
                returned.extend(self.execute(OP, Some(entity), &statement::insert_default(schema.table()))?);
            }
            returned
        } else {
            let names: Vec<String> = used.iter().map(|c| c.name.clone()).collect();
            let values = rows
                .iter()
                .map(|row| {
                    used.iter()
                        .map(|c| row.values.get(&c.name).cloned().unwrap_or_else(|| c.null.clone()))
                        .collect()
                })
                .collect();
            let stmt = statement::insert_rows(schema.table(), &names, values).map_err(|err| {
                OrmError::new(OrmCode::SaveFailed, ErrorContext::new(OP).entity(entity))
                    .with_detail(err.to_string())
            })?;
            self.execute(OP, Some(entity), &stmt)?
        };

        if returned.len() < rows.len() {
            return Err(OrmError::new(OrmCode::SaveFailed, ErrorContext::new(OP).entity(entity))
                .with_detail(format!("wrote {} rows, got {} back", rows.len(), returned.len())));
        }
        Ok(returned)
    }

    /// Merge written rows and clear relation entries that may now be stale
    fn store_written(&self, schema: &EntitySchema, rows: &[RawRow]) -> Result<Vec<String>, OrmError> {
        let ids = self.merge_rows(schema.name(), rows)?;
        self.invalidate_after_write(schema.name());
        log::debug!("[tx {}] wrote {} {} row(s)", self.id, ids.len(), schema.name());
        Ok(ids)
    }
}

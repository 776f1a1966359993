//! Batched relation resolution
//!
//! Resolving one relation fetches it for every cached entity of the source
//! type in a single statement. The result is kept in the owned or inverse
//! relation cache, so siblings resolving the same relation afterwards are
//! answered from memory.

use super::{encode_id, Session};
use crate::cache::{lock, InverseBatch, OwnedBatch};
use crate::entity::{Entity, LazyRelation, RelationValue};
use crate::error::{ErrorContext, OrmCode, OrmError};
use crate::query::row::{id_of, id_string};
use crate::query::statement;
use crate::schema::{EntitySchema, RelationDef, RelationKind};
use std::collections::{BTreeMap, BTreeSet};

impl Session {
    pub(crate) fn resolve_relation(&self, lazy: &LazyRelation) -> Result<RelationValue, OrmError> {
        let context = || {
            ErrorContext::new("resolve-relation")
                .entity(&lazy.entity)
                .relation(&lazy.relation)
        };
        if lazy.transaction_id != self.id || !self.is_active() {
            return Err(OrmError::new(OrmCode::InactiveTransaction, context()));
        }

        let source = self.schema.entity(&lazy.entity)?;
        let relation = source.relation(&lazy.relation)?;
        let target = self.schema.entity(&relation.target)?;

        #[cfg(feature = "tracing")]
        let _span = crate::tracing_helpers::relation_fetch_span(&lazy.entity, &lazy.relation).entered();

        match relation.kind {
            RelationKind::OneToOneOwned | RelationKind::ManyToOne => {
                let Some(foreign_key) = lazy.foreign_key.as_deref() else {
                    return Ok(RelationValue::One(None));
                };
                let (outcome, hit) = self.owned.get_or_fetch(&lazy.entity, &lazy.relation, || {
                    self.fetch_owned(source, relation)
                });
                self.record_relation_access(hit);
                outcome?;

                let row = lock(&self.entities).get(&relation.target, foreign_key);
                match row {
                    Some(row) => Ok(RelationValue::One(Some(Box::new(self.wrap(target, &row)?)))),
                    None if relation.nullable => Ok(RelationValue::One(None)),
                    None => {
                        let code = if relation.kind == RelationKind::OneToOneOwned {
                            OrmCode::OneToOneOwnedMissingInCache
                        } else {
                            OrmCode::ManyToOneMissingInCache
                        };
                        Err(OrmError::new(code, context())
                            .with_detail(format!("{} {foreign_key}", relation.target)))
                    }
                }
            }
            RelationKind::OneToOneInverse | RelationKind::OneToMany => {
                let (outcome, hit) = self.inverse.get_or_fetch(&lazy.entity, &lazy.relation, || {
                    self.fetch_inverse(source, relation)
                });
                self.record_relation_access(hit);
                let batch = outcome?;

                // rows deleted since the fetch drop out here
                let rows: Vec<_> = {
                    let cache = lock(&self.entities);
                    batch
                        .targets_of(&lazy.source_id)
                        .iter()
                        .filter_map(|id| cache.get(&relation.target, id))
                        .collect()
                };
                let mut targets = rows
                    .iter()
                    .map(|row| self.wrap(target, row))
                    .collect::<Result<Vec<Entity>, _>>()?;

                if relation.kind == RelationKind::OneToMany {
                    return Ok(RelationValue::Many(targets));
                }
                match targets.len() {
                    0 if relation.nullable => Ok(RelationValue::One(None)),
                    0 => Err(OrmError::new(OrmCode::OneToOneInverseMissing, context())),
                    1 => Ok(RelationValue::One(targets.pop().map(Box::new))),
                    n => Err(OrmError::new(OrmCode::OneToOneInverseMultiple, context())
                        .with_detail(format!("{n} rows point at {} {}", lazy.entity, lazy.source_id))),
                }
            }
        }
    }

    /// Load the targets of every cached source row's foreign key
    fn fetch_owned(&self, source: &EntitySchema, relation: &RelationDef) -> Result<OwnedBatch, OrmError> {
        let target = self.schema.entity(&relation.target)?;
        let foreign_keys: BTreeSet<String> = lock(&self.entities)
            .all_of_type(source.name())
            .iter()
            .filter_map(|row| row.get(&relation.column).and_then(id_string))
            .collect();
        if foreign_keys.is_empty() {
            return Ok(OwnedBatch::default());
        }
        log::debug!(
            "[tx {}] fetching {}.{} for {} key(s)",
            self.id,
            source.name(),
            relation.name,
            foreign_keys.len()
        );

        let values = foreign_keys
            .iter()
            .map(|fk| encode_id(target, fk))
            .collect::<Result<Vec<_>, _>>()?;
        let stmt = statement::select_where_in(target.table(), "id", values);
        let rows = self.execute("fetch-owned-relation", Some(source.name()), &stmt)?;
        let ids = self.merge_rows(target.name(), &rows)?;
        Ok(OwnedBatch { ids })
    }

    /// Load every target row pointing at a cached source row
    fn fetch_inverse(&self, source: &EntitySchema, relation: &RelationDef) -> Result<InverseBatch, OrmError> {
        let target = self.schema.entity(&relation.target)?;
        let source_ids: BTreeSet<String> = lock(&self.entities)
            .all_of_type(source.name())
            .iter()
            .filter_map(|row| id_of(row))
            .collect();
        if source_ids.is_empty() {
            return Ok(InverseBatch::default());
        }
        log::debug!(
            "[tx {}] fetching {}.{} for {} source(s)",
            self.id,
            source.name(),
            relation.name,
            source_ids.len()
        );

        let values = source_ids
            .iter()
            .map(|id| encode_id(source, id))
            .collect::<Result<Vec<_>, _>>()?;
        let stmt = statement::select_where_in(target.table(), &relation.column, values);
        let rows = self.execute("fetch-inverse-relation", Some(source.name()), &stmt)?;
        let ids = self.merge_rows(target.name(), &rows)?;

        let mut by_source: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (row, id) in rows.iter().zip(&ids) {
            if let Some(owner) = row.get(&relation.column).and_then(id_string) {
                by_source.entry(owner).or_default().push(id.clone());
            }
        }
        Ok(InverseBatch { ids, by_source })
    }
}

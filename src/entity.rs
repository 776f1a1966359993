//! Output objects
//!
//! An [`Entity`] is one row wrapped for the application: typed fields plus one
//! [`Relation`] per declared relation. A relation starts out
//! [`Relation::Unresolved`] and only touches the database when
//! [`Entity::resolve`] is called with the session that produced it.
//!
//! ```no_run
//! # use berth::{Entity, Orm, OrmError};
//! # fn demo(orm: &Orm) -> Result<(), OrmError> {
//! orm.in_transaction(|db| {
//!     let mut ship = db.find_one("Ship", "1")?;
//!     for call in ship.many(db, "calls")? {
//!         let orders = call.many(db, "loadOrders")?;
//!         println!("{} load orders", orders.len());
//!     }
//!     Ok(())
//! })
//! # }
//! ```

use crate::error::{ErrorContext, OrmCode, OrmError};
use crate::executor::RawRow;
use crate::query::row::id_string;
use crate::schema::{EntitySchema, RelationKind};
use crate::session::Session;
use crate::value::FieldValue;
use serde_json::Value as Json;
use std::collections::BTreeMap;

/// Everything needed to resolve a relation later
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LazyRelation {
    pub(crate) transaction_id: u64,
    pub(crate) entity: String,
    pub(crate) source_id: String,
    pub(crate) relation: String,
    /// Target id for owned relations
    pub(crate) foreign_key: Option<String>,
}

impl LazyRelation {
    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn foreign_key(&self) -> Option<&str> {
        self.foreign_key.as_deref()
    }
}

/// Resolved relation contents
#[derive(Debug, Clone, PartialEq)]
pub enum RelationValue {
    One(Option<Box<Entity>>),
    Many(Vec<Entity>),
}

impl RelationValue {
    fn to_json(&self) -> Json {
        match self {
            RelationValue::One(None) => Json::Null,
            RelationValue::One(Some(entity)) => entity.to_json(),
            RelationValue::Many(entities) => {
                Json::Array(entities.iter().map(Entity::to_json).collect())
            }
        }
    }
}

/// A relation property: untouched, or resolved/assigned
#[derive(Debug, Clone, PartialEq)]
pub enum Relation {
    Unresolved(LazyRelation),
    Resolved(RelationValue),
}

/// A wrapped row
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    entity_type: String,
    fields: BTreeMap<String, FieldValue>,
    relations: BTreeMap<String, Relation>,
}

fn member_error(code: OrmCode, entity: &str, relation: &str) -> OrmError {
    OrmError::new(
        code,
        ErrorContext::new("resolve-relation")
            .entity(entity)
            .relation(relation),
    )
}

impl Entity {
    /// A new, unsaved entity of type `entity_type`
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            fields: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    /// Builder form of [`Entity::set`]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(field, value);
        self
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Id as a string; `None` for an entity that was never saved
    pub fn id(&self) -> Option<&str> {
        self.fields.get("id").and_then(FieldValue::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Set a field; an integer `id` is stored in its string form
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        let field = field.into();
        let value = match value.into() {
            FieldValue::Integer(id) if field == "id" => FieldValue::Text(id.to_string()),
            other => other,
        };
        self.fields.insert(field, value);
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.get(name)
    }

    /// Whether `name` was resolved or assigned; `false` for unknown names
    pub fn is_resolved(&self, name: &str) -> bool {
        matches!(self.relations.get(name), Some(Relation::Resolved(_)))
    }

    /// Assign a relation; saving writes it for owned relations
    pub fn set_relation(&mut self, name: impl Into<String>, value: RelationValue) {
        self.relations.insert(name.into(), Relation::Resolved(value));
    }

    pub fn set_one(&mut self, name: impl Into<String>, target: Option<Entity>) {
        self.set_relation(name, RelationValue::One(target.map(Box::new)));
    }

    /// Resolve `name` through `session`, memoizing the result on this entity
    ///
    /// # Errors
    ///
    /// `ORM-1000` when `session` is not the live transaction this entity came
    /// from, `ORM-1406` for a name that is not a loaded relation, plus any
    /// cardinality, nullability or driver error raised by the fetch.
    pub fn resolve(&mut self, session: &Session, name: &str) -> Result<&mut RelationValue, OrmError> {
        let entity_type = self.entity_type.clone();
        let relation = self
            .relations
            .get_mut(name)
            .ok_or_else(|| member_error(OrmCode::UnknownMember, &entity_type, name))?;
        if let Relation::Unresolved(lazy) = &*relation {
            let value = session.resolve_relation(lazy)?;
            *relation = Relation::Resolved(value);
        }
        match relation {
            Relation::Resolved(value) => Ok(value),
            Relation::Unresolved(_) => Err(member_error(
                OrmCode::RelationFetchAbandoned,
                &entity_type,
                name,
            )),
        }
    }

    /// Resolve a one-to-one or many-to-one relation
    pub fn one(&mut self, session: &Session, name: &str) -> Result<Option<&mut Entity>, OrmError> {
        let entity_type = self.entity_type.clone();
        match self.resolve(session, name)? {
            RelationValue::One(target) => Ok(target.as_deref_mut()),
            RelationValue::Many(_) => Err(member_error(
                OrmCode::RelationCardinalityMismatch,
                &entity_type,
                name,
            )
            .with_detail("relation holds many entities")),
        }
    }

    /// Resolve a one-to-many relation
    pub fn many(&mut self, session: &Session, name: &str) -> Result<&mut [Entity], OrmError> {
        let entity_type = self.entity_type.clone();
        match self.resolve(session, name)? {
            RelationValue::Many(targets) => Ok(targets.as_mut_slice()),
            RelationValue::One(_) => Err(member_error(
                OrmCode::RelationCardinalityMismatch,
                &entity_type,
                name,
            )
            .with_detail("relation holds at most one entity")),
        }
    }

    /// Resolve dotted relation paths such as `"calls.loadOrders"`
    ///
    /// Every segment is resolved on every entity reached by the segment before.
    pub fn resolve_paths(&mut self, session: &Session, paths: &[&str]) -> Result<(), OrmError> {
        for path in paths {
            let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
            self.resolve_segments(session, &segments)?;
        }
        Ok(())
    }

    fn resolve_segments(&mut self, session: &Session, segments: &[&str]) -> Result<(), OrmError> {
        let Some((first, rest)) = segments.split_first() else {
            return Ok(());
        };
        match self.resolve(session, first)? {
            RelationValue::One(Some(target)) => target.resolve_segments(session, rest),
            RelationValue::One(None) => Ok(()),
            RelationValue::Many(targets) => targets
                .iter_mut()
                .try_for_each(|target| target.resolve_segments(session, rest)),
        }
    }

    /// JSON view: fields, plus resolved relations nested in place
    pub fn to_json(&self) -> Json {
        let mut out = serde_json::Map::new();
        for (name, value) in &self.fields {
            out.insert(name.clone(), value.to_json());
        }
        for (name, relation) in &self.relations {
            if let Relation::Resolved(value) = relation {
                out.insert(name.clone(), value.to_json());
            }
        }
        Json::Object(out)
    }

    /// Wrap a raw row of `schema`
    ///
    /// Owned relations with a null foreign key resolve to nothing right away;
    /// for a required relation that is an error.
    pub(crate) fn from_row(
        schema: &EntitySchema,
        row: &RawRow,
        transaction_id: u64,
    ) -> Result<Self, OrmError> {
        let context = || ErrorContext::new("wrap-row").entity(schema.name());

        let mut fields = BTreeMap::new();
        for field in schema.fields() {
            let value = match row.get(&field.column) {
                None | Some(Json::Null) => {
                    if !field.def.nullable_on_output {
                        return Err(OrmError::new(
                            OrmCode::NullOutputField,
                            context().field(&field.name),
                        ));
                    }
                    FieldValue::Null
                }
                Some(raw) => field.def.field_type.decode(raw).map_err(|detail| {
                    OrmError::new(OrmCode::ValueConversion, context().field(&field.name))
                        .with_detail(detail)
                })?,
            };
            fields.insert(field.name.clone(), value);
        }

        let source_id = fields
            .get("id")
            .and_then(FieldValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| OrmError::new(OrmCode::NullOutputField, context().field("id")))?;

        let mut relations = BTreeMap::new();
        for relation in schema.relations() {
            let foreign_key = if relation.kind.is_owned() {
                match row.get(&relation.column).and_then(id_string) {
                    Some(fk) => Some(fk),
                    None => {
                        if !relation.nullable {
                            let code = match relation.kind {
                                RelationKind::OneToOneOwned => OrmCode::OneToOneOwnedNullColumn,
                                _ => OrmCode::ManyToOneNullColumn,
                            };
                            return Err(OrmError::new(code, context().relation(&relation.name)));
                        }
                        relations.insert(
                            relation.name.clone(),
                            Relation::Resolved(RelationValue::One(None)),
                        );
                        continue;
                    }
                }
            } else {
                None
            };
            relations.insert(
                relation.name.clone(),
                Relation::Unresolved(LazyRelation {
                    transaction_id,
                    entity: schema.name().to_string(),
                    source_id: source_id.clone(),
                    relation: relation.name.clone(),
                    foreign_key,
                }),
            );
        }

        Ok(Self {
            entity_type: schema.name().to_string(),
            fields,
            relations,
        })
    }
}

//! Entity definitions
//!
//! A [`Schema`] is built once from [`EntityDef`]s, validated, and then shared
//! read-only by every transaction through an `Arc`.
//!
//! ```
//! use berth::schema::{EntityDef, FieldDef, FieldType, RelationDecl, Schema};
//!
//! let schema = Schema::builder()
//!     .entity(
//!         EntityDef::new("Ship")
//!             .field("id", FieldDef::id())
//!             .field("name", FieldDef::new(FieldType::Text, false))
//!             .one_to_many("calls", RelationDecl::to("Call").inverse("ship")),
//!     )
//!     .entity(
//!         EntityDef::new("Call")
//!             .field("id", FieldDef::id())
//!             .many_to_one("ship", RelationDecl::to("Ship")),
//!     )
//!     .build()
//!     .expect("valid schema");
//!
//! assert_eq!(schema.entity("Call").unwrap().table(), "call");
//! ```

mod check;
pub mod field;
pub mod naming;
pub mod relation;

pub use field::{FieldConverter, FieldDef, FieldType};
pub use relation::{RelationDecl, RelationDef, RelationKind};

use crate::error::{ErrorContext, OrmCode, OrmError};
use naming::camel_to_snake;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One declared member of an entity, in declaration order
#[derive(Debug, Clone)]
pub(crate) enum Member {
    Field(FieldDef),
    Relation(RelationKind, RelationDecl),
}

/// Entity definition as written by the user
#[derive(Debug, Clone)]
pub struct EntityDef {
    pub(crate) name: String,
    pub(crate) members: Vec<(String, Member)>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, def: FieldDef) -> Self {
        self.members.push((name.into(), Member::Field(def)));
        self
    }

    pub fn one_to_one_owned(self, name: impl Into<String>, decl: RelationDecl) -> Self {
        self.relation(name, RelationKind::OneToOneOwned, decl)
    }

    pub fn one_to_one_inverse(self, name: impl Into<String>, decl: RelationDecl) -> Self {
        self.relation(name, RelationKind::OneToOneInverse, decl)
    }

    pub fn many_to_one(self, name: impl Into<String>, decl: RelationDecl) -> Self {
        self.relation(name, RelationKind::ManyToOne, decl)
    }

    pub fn one_to_many(self, name: impl Into<String>, decl: RelationDecl) -> Self {
        self.relation(name, RelationKind::OneToMany, decl)
    }

    fn relation(mut self, name: impl Into<String>, kind: RelationKind, decl: RelationDecl) -> Self {
        self.members.push((name.into(), Member::Relation(kind, decl)));
        self
    }

    pub(crate) fn relations_of(&self, kind: RelationKind) -> impl Iterator<Item = (&str, &RelationDecl)> {
        self.members.iter().filter_map(move |(name, member)| match member {
            Member::Relation(k, decl) if *k == kind => Some((name.as_str(), decl)),
            _ => None,
        })
    }
}

/// Validated scalar field
#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub name: String,
    pub column: String,
    pub def: FieldDef,
}

/// Validated entity
#[derive(Debug, Clone)]
pub struct EntitySchema {
    name: String,
    table: String,
    fields: Vec<FieldSchema>,
    relations: BTreeMap<String, RelationDef>,
}

impl EntitySchema {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Fields in declaration order
    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Field whose column is `column`
    pub fn field_by_column(&self, column: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.column == column)
    }

    /// The `id` field; its presence is checked at build time
    pub fn id_field(&self) -> &FieldSchema {
        // index 0 after validation; see `Schema::builder().build()`
        &self.fields[0]
    }

    pub fn relations(&self) -> impl Iterator<Item = &RelationDef> {
        self.relations.values()
    }

    pub fn relation(&self, name: &str) -> Result<&RelationDef, OrmError> {
        self.relations.get(name).ok_or_else(|| {
            OrmError::new(
                OrmCode::UnknownMember,
                ErrorContext::new("lookup-relation")
                    .entity(&self.name)
                    .relation(name),
            )
        })
    }

    /// Owned relations, i.e. the ones with a foreign key column on this table
    pub fn owned_relations(&self) -> impl Iterator<Item = &RelationDef> {
        self.relations.values().filter(|r| r.kind.is_owned())
    }
}

/// Validated, immutable set of entity definitions
#[derive(Debug)]
pub struct Schema {
    entities: BTreeMap<String, EntitySchema>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn entity(&self, name: &str) -> Result<&EntitySchema, OrmError> {
        self.entities.get(name).ok_or_else(|| {
            OrmError::new(OrmCode::UnknownEntity, ErrorContext::new("lookup-entity").entity(name))
        })
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntitySchema> {
        self.entities.values()
    }

    /// Whether a relation cache entry keyed by (`source`, `relation`) may be
    /// stale after rows of `mutated` were inserted or updated
    pub fn relation_affected_by(&self, source: &str, relation: &str, mutated: &str) -> bool {
        if source == mutated {
            return true;
        }
        self.entities
            .get(source)
            .and_then(|e| e.relations.get(relation))
            .is_some_and(|r| r.target == mutated)
    }
}

/// Collects entity definitions; [`SchemaBuilder::build`] validates them
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntityDef>,
}

impl SchemaBuilder {
    pub fn entity(mut self, def: EntityDef) -> Self {
        self.entities.push(def);
        self
    }

    /// Validate and freeze the definitions
    ///
    /// # Errors
    ///
    /// Returns the first `ORM-14xx` schema error found.
    pub fn build(self) -> Result<Arc<Schema>, OrmError> {
        check::check_entity_definitions(&self.entities)?;

        let mut entities = BTreeMap::new();
        for def in self.entities {
            let mut fields = Vec::new();
            let mut relations = BTreeMap::new();
            for (name, member) in &def.members {
                match member {
                    Member::Field(field) => fields.push(FieldSchema {
                        name: name.clone(),
                        column: camel_to_snake(name),
                        def: field.clone(),
                    }),
                    Member::Relation(kind, decl) => {
                        relations.insert(name.clone(), RelationDef::from_decl(name, *kind, decl));
                    }
                }
            }
            // keep `id` first so `id_field` is a plain index
            if let Some(pos) = fields.iter().position(|f| f.name == "id") {
                let id = fields.remove(pos);
                fields.insert(0, id);
            }
            let table = camel_to_snake(&def.name);
            entities.insert(
                def.name.clone(),
                EntitySchema {
                    name: def.name,
                    table,
                    fields,
                    relations,
                },
            );
        }

        log::debug!("schema validated with {} entities", entities.len());
        Ok(Arc::new(Schema { entities }))
    }
}

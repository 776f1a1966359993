//! Relation declarations

use super::naming::foreign_key_column;

/// The four relation shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// This entity holds the foreign key; at most one target
    OneToOneOwned,
    /// Read-only mirror of a remote `OneToOneOwned`
    OneToOneInverse,
    /// This entity holds the foreign key; many sources may share a target
    ManyToOne,
    /// Read-only mirror of a remote `ManyToOne`
    OneToMany,
}

impl RelationKind {
    /// Whether the foreign key lives on the source entity
    pub fn is_owned(self) -> bool {
        matches!(self, RelationKind::OneToOneOwned | RelationKind::ManyToOne)
    }

    pub fn is_many(self) -> bool {
        matches!(self, RelationKind::OneToMany)
    }

    pub fn name(self) -> &'static str {
        match self {
            RelationKind::OneToOneOwned => "one-to-one-owned",
            RelationKind::OneToOneInverse => "one-to-one-inverse",
            RelationKind::ManyToOne => "many-to-one",
            RelationKind::OneToMany => "one-to-many",
        }
    }
}

/// A relation as written in an entity definition
///
/// `nullable` and `inverse` remember whether they were given at all so the
/// schema checks can reject them where they do not belong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDecl {
    pub target: String,
    pub nullable: Option<bool>,
    pub inverse: Option<String>,
}

impl RelationDecl {
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            nullable: None,
            inverse: None,
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    pub fn inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }
}

/// A validated relation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDef {
    pub name: String,
    pub kind: RelationKind,
    pub target: String,
    pub nullable: bool,
    /// Name of the owning relation on the target, for inverse kinds
    pub inverse: Option<String>,
    /// Foreign key column: on the source table for owned kinds, on the target
    /// table for inverse kinds
    pub column: String,
}

impl RelationDef {
    pub(crate) fn from_decl(name: &str, kind: RelationKind, decl: &RelationDecl) -> Self {
        let column = match (&decl.inverse, kind.is_owned()) {
            (Some(inverse), false) => foreign_key_column(inverse),
            _ => foreign_key_column(name),
        };
        let nullable = match kind {
            RelationKind::OneToMany => false,
            // the owning row may not exist yet, so the inverse side defaults to nullable
            RelationKind::OneToOneInverse => decl.nullable.unwrap_or(true),
            RelationKind::OneToOneOwned | RelationKind::ManyToOne => {
                decl.nullable.unwrap_or(false)
            }
        };
        Self {
            name: name.to_string(),
            kind,
            target: decl.target.clone(),
            nullable,
            inverse: decl.inverse.clone(),
            column,
        }
    }
}

//! ORM error type
//!
//! Every failure surfaced to a transaction body is an [`OrmError`]: a stable
//! [`OrmCode`], the context it was raised in, and the statements executed so
//! far in the transaction. Errors are `Clone` because the result of one
//! batched relation fetch is shared by every accessor that waited on it.

use crate::executor::DriverError;
use crate::session::QueryStat;
use std::fmt;
use std::sync::Arc;

/// Broad category of an [`OrmError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Database work attempted outside an active transaction
    InactiveTransaction,
    /// A required row is missing from the transaction cache after its relation was fetched
    CacheConsistency,
    /// More than one row where exactly one was expected
    CardinalityViolation,
    /// A non-nullable field or relation yielded no value
    NullabilityViolation,
    /// No row exists for the requested id
    NotFound,
    /// An id-based batch fetch returned a different number of rows than ids requested
    RowCountMismatch,
    /// Input rejected before any write was issued
    SaveValidation,
    /// A value could not be converted between its column and field form,
    /// in either direction
    Conversion,
    /// Entity definitions are inconsistent
    Schema,
    /// The API was used with names or shapes the schema does not know
    Usage,
    /// The underlying driver failed
    Driver,
}

/// Stable error codes, rendered as `ORM-xxxx`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrmCode {
    InactiveTransaction,
    RelationFetchAbandoned,

    OneToOneOwnedMissingInCache,
    OneToOneOwnedNullColumn,
    OneToOneInverseMultiple,
    OneToOneInverseMissing,
    ManyToOneMissingInCache,
    ManyToOneNullColumn,

    EntityNotFound,
    MultipleRows,
    RowCountMismatch,
    NullOutputField,
    ValueConversion,
    PaginationWithoutOrder,

    SaveFailed,
    NullInputField,
    NullOneToOneOwned,
    UnsavedOneToOneOwned,
    NullManyToOne,
    UnsavedManyToOne,
    WrongEntityType,

    ConflictingNames,
    UnknownRelationTarget,
    OneToManyWithoutManyToOne,
    OneToOneInverseWithoutOwned,
    MissingIdField,
    UnknownEntity,
    UnknownMember,
    RelationCardinalityMismatch,
    OneToManyNullable,
    OneToOneOwnedInverse,
    ManyToOneInverse,

    Driver,
}

impl OrmCode {
    /// Numeric part of the code
    pub fn number(self) -> u16 {
        match self {
            OrmCode::InactiveTransaction => 1000,
            OrmCode::RelationFetchAbandoned => 1001,
            OrmCode::OneToOneOwnedMissingInCache => 1101,
            OrmCode::OneToOneOwnedNullColumn => 1102,
            OrmCode::OneToOneInverseMultiple => 1110,
            OrmCode::OneToOneInverseMissing => 1111,
            OrmCode::ManyToOneMissingInCache => 1121,
            OrmCode::ManyToOneNullColumn => 1122,
            OrmCode::EntityNotFound => 1200,
            OrmCode::MultipleRows => 1201,
            OrmCode::RowCountMismatch => 1202,
            OrmCode::NullOutputField => 1203,
            OrmCode::ValueConversion => 1204,
            OrmCode::PaginationWithoutOrder => 1205,
            OrmCode::SaveFailed => 1300,
            OrmCode::NullInputField => 1301,
            OrmCode::NullOneToOneOwned => 1302,
            OrmCode::UnsavedOneToOneOwned => 1303,
            OrmCode::NullManyToOne => 1304,
            OrmCode::UnsavedManyToOne => 1305,
            OrmCode::WrongEntityType => 1306,
            OrmCode::ConflictingNames => 1400,
            OrmCode::UnknownRelationTarget => 1401,
            OrmCode::OneToManyWithoutManyToOne => 1402,
            OrmCode::OneToOneInverseWithoutOwned => 1403,
            OrmCode::MissingIdField => 1404,
            OrmCode::UnknownEntity => 1405,
            OrmCode::UnknownMember => 1406,
            OrmCode::RelationCardinalityMismatch => 1407,
            OrmCode::OneToManyNullable => 1410,
            OrmCode::OneToOneOwnedInverse => 1411,
            OrmCode::ManyToOneInverse => 1412,
            OrmCode::Driver => 1500,
        }
    }

    pub fn kind(self) -> ErrorKind {
        match self {
            OrmCode::InactiveTransaction => ErrorKind::InactiveTransaction,
            OrmCode::RelationFetchAbandoned
            | OrmCode::OneToOneOwnedMissingInCache
            | OrmCode::ManyToOneMissingInCache => ErrorKind::CacheConsistency,
            OrmCode::OneToOneInverseMultiple | OrmCode::MultipleRows => {
                ErrorKind::CardinalityViolation
            }
            OrmCode::OneToOneOwnedNullColumn
            | OrmCode::OneToOneInverseMissing
            | OrmCode::ManyToOneNullColumn
            | OrmCode::NullOutputField => ErrorKind::NullabilityViolation,
            OrmCode::EntityNotFound => ErrorKind::NotFound,
            OrmCode::RowCountMismatch | OrmCode::SaveFailed => ErrorKind::RowCountMismatch,
            OrmCode::NullInputField
            | OrmCode::NullOneToOneOwned
            | OrmCode::UnsavedOneToOneOwned
            | OrmCode::NullManyToOne
            | OrmCode::UnsavedManyToOne
            | OrmCode::WrongEntityType => ErrorKind::SaveValidation,
            OrmCode::ValueConversion => ErrorKind::Conversion,
            OrmCode::ConflictingNames
            | OrmCode::UnknownRelationTarget
            | OrmCode::OneToManyWithoutManyToOne
            | OrmCode::OneToOneInverseWithoutOwned
            | OrmCode::MissingIdField
            | OrmCode::OneToManyNullable
            | OrmCode::OneToOneOwnedInverse
            | OrmCode::ManyToOneInverse => ErrorKind::Schema,
            OrmCode::UnknownEntity
            | OrmCode::UnknownMember
            | OrmCode::RelationCardinalityMismatch
            | OrmCode::PaginationWithoutOrder => ErrorKind::Usage,
            OrmCode::Driver => ErrorKind::Driver,
        }
    }

    /// One-line human message
    pub fn message(self) -> &'static str {
        match self {
            OrmCode::InactiveTransaction => "Inactive transaction",
            OrmCode::RelationFetchAbandoned => "Relation fetch settled without a result",
            OrmCode::OneToOneOwnedMissingInCache => {
                "One-to-one relation (owning side) resolved to null in cache, but is marked non-nullable"
            }
            OrmCode::OneToOneOwnedNullColumn => {
                "One-to-one relation (owning side) has null value in column, but is marked non-nullable"
            }
            OrmCode::OneToOneInverseMultiple => {
                "Cache found multiple entities for one-to-one relation (inverse side)"
            }
            OrmCode::OneToOneInverseMissing => {
                "One-to-one relation (inverse side) resolved to null in cache, but is marked non-nullable"
            }
            OrmCode::ManyToOneMissingInCache => {
                "Many-to-one relation resolved to null in cache, but is marked non-nullable"
            }
            OrmCode::ManyToOneNullColumn => {
                "Many-to-one relation has null value in column, but is marked non-nullable"
            }
            OrmCode::EntityNotFound => "Entity not found",
            OrmCode::MultipleRows => "Query returned multiple rows, but only expected one",
            OrmCode::RowCountMismatch => {
                "Query returned different number of rows than expected based on input"
            }
            OrmCode::NullOutputField => "Non-nullable field read as null",
            OrmCode::ValueConversion => "Value could not be converted",
            OrmCode::PaginationWithoutOrder => "Offset or limit given without an order",
            OrmCode::SaveFailed => "Save query failed",
            OrmCode::NullInputField => "Passed null for non-nullable field",
            OrmCode::NullOneToOneOwned => {
                "Cannot set non-nullable one-to-one relation (owning side) to null value"
            }
            OrmCode::UnsavedOneToOneOwned => {
                "Cannot use non-saved entity for one-to-one relation (owning side)"
            }
            OrmCode::NullManyToOne => "Cannot set non-nullable many-to-one relation to null value",
            OrmCode::UnsavedManyToOne => "Cannot use non-saved entity for many-to-one relation",
            OrmCode::WrongEntityType => "Entity of another type passed to save",
            OrmCode::ConflictingNames => "Entity definition has conflicting fields and relations",
            OrmCode::UnknownRelationTarget => {
                "Relation in entity definition points to non-existing entity"
            }
            OrmCode::OneToManyWithoutManyToOne => {
                "One-to-many relation in entity definition has no corresponding many-to-one"
            }
            OrmCode::OneToOneInverseWithoutOwned => {
                "One-to-one-inverse relation in entity definition has no corresponding one-to-one-owned"
            }
            OrmCode::MissingIdField => "Entity definition has no id field",
            OrmCode::UnknownEntity => "Unknown entity",
            OrmCode::UnknownMember => "Unknown field or relation",
            OrmCode::RelationCardinalityMismatch => "Relation accessed with the wrong cardinality",
            OrmCode::OneToManyNullable => "One-to-many should not have nullable property",
            OrmCode::OneToOneOwnedInverse => "One-to-one-owned should not have inverse property",
            OrmCode::ManyToOneInverse => "Many-to-one should not have inverse property",
            OrmCode::Driver => "Database driver error",
        }
    }

    /// Long-form hint on what usually causes the error
    pub fn explanation(self) -> &'static str {
        match self {
            OrmCode::InactiveTransaction => {
                "Database functions and relation accessors only work inside the transaction that produced them. \
                 Entities passed out of a transaction, or into another one, cannot resolve their relations."
            }
            OrmCode::RelationFetchAbandoned => {
                "A batched relation fetch ended without storing a result, usually because the code running it panicked."
            }
            OrmCode::OneToOneOwnedMissingInCache | OrmCode::ManyToOneMissingInCache => {
                "The relation was fetched but the referenced row is not in the transaction cache. Either the row was \
                 deleted in this transaction, or the column allows nulls/dangling ids while the relation is marked non-nullable."
            }
            OrmCode::OneToOneOwnedNullColumn | OrmCode::ManyToOneNullColumn => {
                "The foreign key column is NULL in the database while the relation is marked non-nullable. Mark the column \
                 NOT NULL, or mark the relation nullable in the entity definitions."
            }
            OrmCode::OneToOneInverseMultiple => {
                "Several rows point at this entity through a one-to-one relation. Add a unique constraint on the owning \
                 column, or model the pair as many-to-one / one-to-many instead."
            }
            OrmCode::OneToOneInverseMissing => {
                "No row points at this entity while the inverse one-to-one is marked non-nullable. Avoid reading the \
                 inverse side before the owning side is set, or mark it nullable."
            }
            OrmCode::EntityNotFound => "No entity exists for the supplied id.",
            OrmCode::MultipleRows => {
                "The lookup by id returned several rows, which points to a missing primary key on the table."
            }
            OrmCode::RowCountMismatch => {
                "Fetching by ids returned a different number of rows than requested: some ids do not exist, or ids are not unique."
            }
            OrmCode::NullOutputField => {
                "The database returned NULL for a field marked non-nullable on output. The schema and the entity definitions disagree."
            }
            OrmCode::ValueConversion => {
                "A value did not match the field type declared in the entity definitions."
            }
            OrmCode::PaginationWithoutOrder => {
                "Offset and limit only give stable pages with an explicit order. Add an order_by clause."
            }
            OrmCode::SaveFailed => "The save statement returned fewer rows than were written.",
            OrmCode::NullInputField => {
                "A null value was passed for a field marked non-nullable on input. Pass a value or mark the field nullable."
            }
            OrmCode::NullOneToOneOwned | OrmCode::NullManyToOne => {
                "The relation was set to null but is marked non-nullable. Pass an entity or mark the relation nullable."
            }
            OrmCode::UnsavedOneToOneOwned | OrmCode::UnsavedManyToOne => {
                "The relation was set to an entity without an id. Save the target entity first; saves do not cascade."
            }
            OrmCode::WrongEntityType => "Entities can only be saved as the type they were created for.",
            OrmCode::ConflictingNames => {
                "A name is declared more than once across fields and relations of one entity."
            }
            OrmCode::UnknownRelationTarget => "The relation points to an entity that is not defined.",
            OrmCode::OneToManyWithoutManyToOne => {
                "A one-to-many is read-only and needs a many-to-one on the target entity named by its inverse."
            }
            OrmCode::OneToOneInverseWithoutOwned => {
                "A one-to-one inverse is read-only and needs a one-to-one owned relation on the target entity named by its inverse."
            }
            OrmCode::MissingIdField => "Every entity needs an `id` field to be identified in the cache.",
            OrmCode::UnknownEntity => "The entity name is not part of the schema.",
            OrmCode::UnknownMember => "The entity has no field or relation with this name.",
            OrmCode::RelationCardinalityMismatch => {
                "A to-one relation was read as a list, or a one-to-many as a single entity."
            }
            OrmCode::OneToManyNullable => {
                "A one-to-many always yields a (possibly empty) list, so it cannot be nullable."
            }
            OrmCode::OneToOneOwnedInverse | OrmCode::ManyToOneInverse => {
                "Inverse names belong on the read-only side of a relation, not on the side holding the foreign key."
            }
            OrmCode::Driver => "The database driver reported an error; see the source error for details.",
        }
    }
}

impl fmt::Display for OrmCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ORM-{}", self.number())
    }
}

/// Where an error was raised
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub operation: String,
    pub entity: Option<String>,
    pub relation: Option<String>,
    pub field: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Self::default()
        }
    }

    pub fn entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// Error raised by the ORM
#[derive(Debug, Clone)]
pub struct OrmError {
    code: OrmCode,
    context: ErrorContext,
    detail: Option<String>,
    queries: Vec<QueryStat>,
    source: Option<Arc<DriverError>>,
}

impl OrmError {
    pub fn new(code: OrmCode, context: ErrorContext) -> Self {
        Self {
            code,
            context,
            detail: None,
            queries: Vec::new(),
            source: None,
        }
    }

    /// Wrap a driver failure raised while running `operation`
    pub fn driver(operation: impl Into<String>, err: DriverError) -> Self {
        let mut error = Self::new(OrmCode::Driver, ErrorContext::new(operation));
        error.detail = Some(err.to_string());
        error.source = Some(Arc::new(err));
        error
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub(crate) fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.context.entity = Some(entity.into());
        self
    }

    /// Attach the statements executed so far; keeps any list already attached
    pub fn with_queries(mut self, queries: Vec<QueryStat>) -> Self {
        if self.queries.is_empty() {
            self.queries = queries;
        }
        self
    }

    pub fn code(&self) -> OrmCode {
        self.code
    }

    pub fn kind(&self) -> ErrorKind {
        self.code.kind()
    }

    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn explanation(&self) -> &'static str {
        self.code.explanation()
    }

    /// Statements executed in the transaction up to the failure
    pub fn queries(&self) -> &[QueryStat] {
        &self.queries
    }
}

impl fmt::Display for OrmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]: {} - {}",
            self.code,
            self.code.message(),
            self.context.operation
        )?;
        if let Some(entity) = &self.context.entity {
            write!(f, " on entity '{entity}'")?;
            if let Some(relation) = &self.context.relation {
                write!(f, " for relation '{entity}'.'{relation}'")?;
            }
            if let Some(field) = &self.context.field {
                write!(f, " on field '{entity}'.'{field}'")?;
            }
        }
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

impl std::error::Error for OrmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

//! # Berth
//!
//! Transaction-scoped entity and relation cache for PostgreSQL on the `may`
//! runtime.
//!
//! Every transaction gets a [`Session`] holding an entity cache, two relation
//! caches and a change tracker. Relations on returned [`Entity`] values are
//! lazy; resolving one loads it for every cached entity of the same type in a
//! single statement, so walking a tree of relations costs one query per level
//! instead of one per entity.

pub mod cache;
pub mod config;
pub mod connection;
pub mod entity;
pub mod error;
pub mod executor;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod mock;
pub mod orm;
pub mod pool;
pub mod query;
pub mod schema;
pub mod session;
pub mod transaction;
#[cfg(feature = "tracing")]
mod tracing_helpers;
pub mod value;

pub use cache::ChangeTracker;
pub use config::{OrmConfig, TransactionSettings};
pub use entity::{Entity, LazyRelation, Relation, RelationValue};
pub use error::{ErrorContext, ErrorKind, OrmCode, OrmError};
pub use executor::{Driver, DriverError, RawRow, TransactionControls};
pub use orm::{Orm, TransactionConfig};
pub use pool::PgDriver;
pub use query::{FindManyOptions, SqlStatement};
pub use schema::{EntityDef, FieldDef, FieldType, RelationDecl, Schema};
pub use session::{FindManyAndCount, QueryStat, Session, TransactionStatistics};
pub use value::FieldValue;

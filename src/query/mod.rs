//! Statement building, parameter binding and row decoding
//!
//! Sessions build every statement with `sea_query` ([`statement`]), bind the
//! resulting `sea_query::Values` through [`value_conversion`], and decode
//! returned rows into JSON maps through [`row`].

pub mod options;
pub mod row;
pub mod sql;
pub mod statement;
pub mod value_conversion;

pub use options::FindManyOptions;
pub use sql::SqlStatement;

//! Driver seam
//!
//! The ORM core never talks to `may_postgres` directly. It asks a [`Driver`]
//! for a transaction and then runs every statement through the returned
//! [`TransactionControls`]. [`crate::pool::PgDriver`] is the PostgreSQL
//! implementation; [`crate::mock::MockDriver`] answers statements in memory.

use may_postgres::Error as PostgresError;
use std::fmt;

/// A row as returned by the store: column name to JSON value
pub type RawRow = serde_json::Map<String, serde_json::Value>;

/// Driver error type
#[derive(Debug)]
pub enum DriverError {
    /// `PostgreSQL` error from `may_postgres`
    PostgresError(PostgresError),
    /// Connection could not be established or acquired
    ConnectionError(String),
    /// Query execution error
    QueryError(String),
    /// Row parsing/conversion error
    ParseError(String),
    /// Transaction already committed or rolled back
    TransactionClosed,
    /// Other driver errors
    Other(String),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::PostgresError(e) => {
                write!(f, "PostgreSQL error: {e}")
            }
            DriverError::ConnectionError(s) => {
                write!(f, "Connection error: {s}")
            }
            DriverError::QueryError(s) => {
                write!(f, "Query error: {s}")
            }
            DriverError::ParseError(s) => {
                write!(f, "Parse error: {s}")
            }
            DriverError::TransactionClosed => {
                write!(f, "Transaction has already been committed or rolled back")
            }
            DriverError::Other(s) => {
                write!(f, "Driver error: {s}")
            }
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DriverError::PostgresError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PostgresError> for DriverError {
    fn from(err: PostgresError) -> Self {
        DriverError::PostgresError(err)
    }
}

/// Source of transactions
///
/// Implementations must be shareable across coroutines: one [`crate::Orm`]
/// holds a driver behind an `Arc` and may start transactions concurrently.
pub trait Driver: Send + Sync {
    /// Start a transaction, optionally read-only
    ///
    /// # Errors
    ///
    /// Returns `DriverError` if no connection can be acquired or `BEGIN` fails.
    fn begin(&self, read_only: bool) -> Result<Box<dyn TransactionControls>, DriverError>;
}

/// Statement execution inside one open transaction
pub trait TransactionControls: Send + Sync {
    /// Run a statement with `$n` placeholders and return its rows
    ///
    /// Statements without a result set return an empty vector.
    ///
    /// # Errors
    ///
    /// Returns `DriverError` if parameter conversion or execution fails.
    fn query(&self, sql: &str, params: &sea_query::Values) -> Result<Vec<RawRow>, DriverError>;

    /// Commit and release the underlying connection
    ///
    /// # Errors
    ///
    /// Returns `DriverError` if `COMMIT` fails.
    fn commit(self: Box<Self>) -> Result<(), DriverError>;

    /// Roll back and release the underlying connection
    ///
    /// # Errors
    ///
    /// Returns `DriverError` if `ROLLBACK` fails.
    fn rollback(self: Box<Self>) -> Result<(), DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::QueryError("test error".to_string());
        assert!(err.to_string().contains("Query error"));
    }

    #[test]
    fn test_driver_error_all_variants() {
        // PostgresError needs a live connection, the rest can be built directly
        let err = DriverError::ConnectionError("refused".to_string());
        assert!(err.to_string().contains("Connection error"));

        let err = DriverError::ParseError("bad row".to_string());
        assert!(err.to_string().contains("Parse error"));

        let err = DriverError::TransactionClosed;
        assert!(err.to_string().contains("already been committed"));

        let err = DriverError::Other("test".to_string());
        assert!(err.to_string().contains("Driver error"));
    }

    #[test]
    fn test_driver_error_has_no_source_without_postgres() {
        let err = DriverError::QueryError("x".to_string());
        assert!(std::error::Error::source(&err).is_none());
    }
}

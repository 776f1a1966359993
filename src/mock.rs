//! In-memory driver
//!
//! [`MockDriver`] hands every statement to a responder closure and records
//! what was executed, which lets tests count physical queries exactly.
//!
//! ```
//! use berth::mock::MockDriver;
//! use berth::executor::Driver;
//!
//! let driver = MockDriver::new(|_sql, _params| Ok(Vec::new()));
//! let tx = driver.begin(false).unwrap();
//! tx.query("select 1", &sea_query::Values(Vec::new())).unwrap();
//! tx.commit().unwrap();
//! assert_eq!(driver.statements(), vec!["select 1".to_string()]);
//! assert_eq!(driver.commits(), 1);
//! ```

use crate::cache::lock;
use crate::executor::{Driver, DriverError, RawRow, TransactionControls};
use crate::query::value_conversion::value_to_json;
use may::sync::Mutex;
use serde_json::Value as Json;
use std::sync::Arc;

type Responder = dyn Fn(&str, &[Json]) -> Result<Vec<RawRow>, DriverError> + Send + Sync;

/// A statement as the mock saw it
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStatement {
    pub sql: String,
    pub params: Vec<Json>,
    pub read_only: bool,
}

#[derive(Debug, Default)]
struct Journal {
    statements: Vec<RecordedStatement>,
    begins: usize,
    read_only_begins: usize,
    commits: usize,
    rollbacks: usize,
}

#[derive(Clone)]
pub struct MockDriver {
    responder: Arc<Responder>,
    journal: Arc<Mutex<Journal>>,
    fail_begin: Arc<Mutex<Option<String>>>,
}

impl std::fmt::Debug for MockDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDriver")
            .field("journal", &*lock(&self.journal))
            .finish()
    }
}

impl MockDriver {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str, &[Json]) -> Result<Vec<RawRow>, DriverError> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(responder),
            journal: Arc::new(Mutex::new(Journal::default())),
            fail_begin: Arc::new(Mutex::new(None)),
        }
    }

    /// A driver that answers every statement with no rows
    pub fn empty() -> Self {
        Self::new(|_, _| Ok(Vec::new()))
    }

    /// Make the next `begin` calls fail with `message`
    pub fn fail_begin(&self, message: impl Into<String>) {
        *lock(&self.fail_begin) = Some(message.into());
    }

    pub fn recorded(&self) -> Vec<RecordedStatement> {
        lock(&self.journal).statements.clone()
    }

    /// SQL of every statement, in execution order
    pub fn statements(&self) -> Vec<String> {
        lock(&self.journal)
            .statements
            .iter()
            .map(|s| s.sql.clone())
            .collect()
    }

    pub fn statement_count(&self) -> usize {
        lock(&self.journal).statements.len()
    }

    pub fn begins(&self) -> usize {
        lock(&self.journal).begins
    }

    pub fn read_only_begins(&self) -> usize {
        lock(&self.journal).read_only_begins
    }

    pub fn commits(&self) -> usize {
        lock(&self.journal).commits
    }

    pub fn rollbacks(&self) -> usize {
        lock(&self.journal).rollbacks
    }

    /// Forget everything recorded so far
    pub fn reset(&self) {
        *lock(&self.journal) = Journal::default();
    }
}

impl Driver for MockDriver {
    fn begin(&self, read_only: bool) -> Result<Box<dyn TransactionControls>, DriverError> {
        if let Some(message) = lock(&self.fail_begin).clone() {
            return Err(DriverError::ConnectionError(message));
        }
        let mut journal = lock(&self.journal);
        journal.begins += 1;
        if read_only {
            journal.read_only_begins += 1;
        }
        Ok(Box::new(MockTransaction {
            driver: self.clone(),
            read_only,
        }))
    }
}

struct MockTransaction {
    driver: MockDriver,
    read_only: bool,
}

impl TransactionControls for MockTransaction {
    fn query(&self, sql: &str, params: &sea_query::Values) -> Result<Vec<RawRow>, DriverError> {
        let params: Vec<Json> = params.iter().map(value_to_json).collect();
        lock(&self.driver.journal).statements.push(RecordedStatement {
            sql: sql.to_string(),
            params: params.clone(),
            read_only: self.read_only,
        });
        (self.driver.responder)(sql, &params)
    }

    fn commit(self: Box<Self>) -> Result<(), DriverError> {
        lock(&self.driver.journal).commits += 1;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), DriverError> {
        lock(&self.driver.journal).rollbacks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_records_statements_and_params() {
        let driver = MockDriver::new(|sql, params| {
            assert_eq!(sql, "select * from ship where id = $1");
            let mut row = RawRow::new();
            row.insert("id".to_string(), params[0].clone());
            Ok(vec![row])
        });
        let tx = driver.begin(true).expect("begin");
        let rows = tx
            .query(
                "select * from ship where id = $1",
                &sea_query::Values(vec![sea_query::Value::from(7i64)]),
            )
            .expect("query");
        tx.rollback().expect("rollback");

        assert_eq!(rows[0]["id"], json!(7));
        let recorded = driver.recorded();
        assert_eq!(recorded[0].params, vec![json!(7)]);
        assert!(recorded[0].read_only);
        assert_eq!(driver.read_only_begins(), 1);
        assert_eq!(driver.rollbacks(), 1);
        assert_eq!(driver.commits(), 0);
    }

    #[test]
    fn test_fail_begin() {
        let driver = MockDriver::empty();
        driver.fail_begin("down");
        assert!(matches!(driver.begin(false), Err(DriverError::ConnectionError(_))));
        assert_eq!(driver.begins(), 0);
    }

    #[test]
    fn test_reset_clears_journal() {
        let driver = MockDriver::empty();
        let tx = driver.begin(false).expect("begin");
        tx.query("select 1", &sea_query::Values(Vec::new())).expect("query");
        tx.commit().expect("commit");
        driver.reset();
        assert_eq!(driver.statement_count(), 0);
        assert_eq!(driver.begins(), 0);
    }
}

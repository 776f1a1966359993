//! PostgreSQL driver backed by a connection pool

pub mod config;
pub mod manager;

pub use config::DatabaseConfig;
pub use manager::{ConnectionPool, PoolError};

use crate::executor::{Driver, DriverError, TransactionControls};
use crate::transaction::PgTransaction;
use std::sync::Arc;

/// [`Driver`] over pooled `may_postgres` clients
#[derive(Debug, Clone)]
pub struct PgDriver {
    pool: Arc<ConnectionPool>,
}

impl PgDriver {
    /// Connections are opened on first use
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            pool: Arc::new(ConnectionPool::new(config)),
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }
}

impl Driver for PgDriver {
    fn begin(&self, read_only: bool) -> Result<Box<dyn TransactionControls>, DriverError> {
        let client = self
            .pool
            .acquire()
            .map_err(|e| DriverError::ConnectionError(e.to_string()))?;
        let transaction = PgTransaction::begin(client, Arc::clone(&self.pool), read_only)?;
        Ok(Box::new(transaction))
    }
}

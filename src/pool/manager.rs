//! Connection pool
//!
//! Clients are created lazily up to `max_connections` and parked on a
//! bounded crossbeam channel while idle. Acquiring waits on that channel for
//! at most `pool_timeout_seconds` once the pool is full.

use super::config::DatabaseConfig;
use crate::connection::{connect_with_retry, ConnectionError};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use may_postgres::Client;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

/// Pool error type
#[derive(Debug)]
pub enum PoolError {
    /// No idle client became available in time
    Timeout(Duration),
    /// A new client could not be connected
    Connection(ConnectionError),
    /// The pool's channel was closed
    Closed,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Timeout(waited) => {
                write!(f, "Timed out after {waited:?} waiting for a connection")
            }
            PoolError::Connection(e) => write!(f, "Connection error: {e}"),
            PoolError::Closed => write!(f, "Connection pool is closed"),
        }
    }
}

impl std::error::Error for PoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PoolError::Connection(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConnectionError> for PoolError {
    fn from(err: ConnectionError) -> Self {
        PoolError::Connection(err)
    }
}

pub struct ConnectionPool {
    config: DatabaseConfig,
    idle_tx: Sender<Client>,
    idle_rx: Receiver<Client>,
    created: AtomicUsize,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_connections", &self.config.max_connections)
            .field("created", &self.created())
            .field("idle", &self.idle())
            .finish()
    }
}

impl ConnectionPool {
    pub fn new(config: DatabaseConfig) -> Self {
        let capacity = config.max_connections.max(1);
        let (idle_tx, idle_rx) = bounded(capacity);
        Self {
            config,
            idle_tx,
            idle_rx,
            created: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Clients currently alive, idle or in use
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    pub fn idle(&self) -> usize {
        self.idle_rx.len()
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.pool_timeout_seconds)
    }

    /// Reserve room for one more client, if the pool is not full
    fn reserve(&self) -> bool {
        let max = self.config.max_connections.max(1);
        let mut current = self.created.load(Ordering::Acquire);
        while current < max {
            match self.created.compare_exchange(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    /// Take an idle client, connect a new one, or wait for one to come back
    pub fn acquire(&self) -> Result<Client, PoolError> {
        if let Ok(client) = self.idle_rx.try_recv() {
            self.report_idle();
            return Ok(client);
        }

        if self.reserve() {
            log::debug!("opening pooled connection {}", self.created());
            return connect_with_retry(
                &self.config.url,
                self.config.connect_retry_attempts,
                self.config.connect_retry_base_ms,
            )
            .map_err(|err| {
                self.created.fetch_sub(1, Ordering::AcqRel);
                PoolError::from(err)
            });
        }

        let timeout = self.timeout();
        match self.idle_rx.recv_timeout(timeout) {
            Ok(client) => {
                self.report_idle();
                Ok(client)
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "no connection available after {:?} ({} in use)",
                    timeout,
                    self.created()
                );
                Err(PoolError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(PoolError::Closed),
        }
    }

    /// Hand a healthy client back
    pub fn release(&self, client: Client) {
        if self.idle_tx.try_send(client).is_err() {
            self.created.fetch_sub(1, Ordering::AcqRel);
        }
        self.report_idle();
    }

    /// Forget a client that is no longer usable
    pub fn discard(&self, client: Client) {
        drop(client);
        self.created.fetch_sub(1, Ordering::AcqRel);
        log::warn!("discarded a broken pooled connection");
    }

    fn report_idle(&self) {
        #[cfg(feature = "metrics")]
        METRICS.set_pool_idle(self.idle());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(url: &str, max: usize) -> ConnectionPool {
        ConnectionPool::new(DatabaseConfig {
            max_connections: max,
            pool_timeout_seconds: 0,
            connect_retry_attempts: 1,
            connect_retry_base_ms: 1,
            ..DatabaseConfig::with_url(url)
        })
    }

    #[test]
    fn test_failed_connect_frees_the_slot() {
        let pool = pool("not a connection string", 2);
        let err = pool.acquire().unwrap_err();
        assert!(matches!(
            err,
            PoolError::Connection(ConnectionError::InvalidConnectionString(_))
        ));
        assert_eq!(pool.created(), 0);
    }

    #[test]
    fn test_full_pool_times_out() {
        let pool = pool("postgres://u:p@localhost/db", 1);
        assert!(pool.reserve());
        assert!(!pool.reserve());
        let err = pool.acquire().unwrap_err();
        assert!(matches!(err, PoolError::Timeout(_)));
        assert!(err.to_string().contains("Timed out"));
    }

    #[test]
    fn test_zero_max_is_treated_as_one() {
        let pool = pool("postgres://u:p@localhost/db", 0);
        assert!(pool.reserve());
        assert!(!pool.reserve());
    }
}

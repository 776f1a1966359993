//! PostgreSQL transactions over a pooled client
//!
//! A [`PgTransaction`] owns its client from `BEGIN` until `COMMIT` or
//! `ROLLBACK`, then returns it to the pool. Dropping an unfinished transaction
//! rolls it back.

use crate::executor::{DriverError, RawRow, TransactionControls};
use crate::pool::ConnectionPool;
use crate::query::row::row_to_raw;
use crate::query::value_conversion::with_converted_params;
use may_postgres::Client;
use std::sync::Arc;
use std::time::Instant;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::tracing_helpers;

pub struct PgTransaction {
    client: Option<Client>,
    pool: Arc<ConnectionPool>,
}

impl std::fmt::Debug for PgTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTransaction")
            .field("open", &self.client.is_some())
            .finish()
    }
}

fn begin_sql(read_only: bool) -> &'static str {
    if read_only {
        "BEGIN READ ONLY"
    } else {
        "BEGIN"
    }
}

impl PgTransaction {
    /// Issue `BEGIN` on `client`; on failure the client is discarded
    pub fn begin(
        client: Client,
        pool: Arc<ConnectionPool>,
        read_only: bool,
    ) -> Result<Self, DriverError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::begin_transaction_span(read_only).entered();

        if let Err(err) = client.execute(begin_sql(read_only), &[]) {
            pool.discard(client);
            return Err(DriverError::from(err));
        }
        Ok(Self {
            client: Some(client),
            pool,
        })
    }

    fn client(&self) -> Result<&Client, DriverError> {
        self.client.as_ref().ok_or(DriverError::TransactionClosed)
    }

    /// Run `COMMIT` or `ROLLBACK` and give the client back
    fn finish(&mut self, sql: &str) -> Result<(), DriverError> {
        let client = self.client.take().ok_or(DriverError::TransactionClosed)?;
        match client.execute(sql, &[]) {
            Ok(_) => {
                self.pool.release(client);
                Ok(())
            }
            Err(err) => {
                self.pool.discard(client);
                Err(DriverError::from(err))
            }
        }
    }
}

impl TransactionControls for PgTransaction {
    fn query(&self, sql: &str, params: &sea_query::Values) -> Result<Vec<RawRow>, DriverError> {
        let client = self.client()?;

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::execute_query_span(sql).entered();

        let start = Instant::now();
        let rows = with_converted_params(params, |params| {
            client.query(sql, params).map_err(DriverError::from)
        })
        .inspect_err(|_| {
            #[cfg(feature = "metrics")]
            METRICS.record_query_error();
        })?;

        #[cfg(feature = "metrics")]
        METRICS.record_query(start.elapsed());
        log::debug!("{} row(s) in {:?}: {}", rows.len(), start.elapsed(), sql);

        rows.iter().map(row_to_raw).collect()
    }

    fn commit(mut self: Box<Self>) -> Result<(), DriverError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::commit_transaction_span().entered();
        self.finish("COMMIT")
    }

    fn rollback(mut self: Box<Self>) -> Result<(), DriverError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::rollback_transaction_span().entered();
        self.finish("ROLLBACK")
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if self.client.is_some() {
            log::warn!("transaction dropped while open, rolling back");
            if let Err(err) = self.finish("ROLLBACK") {
                log::error!("rollback of dropped transaction failed: {err}");
            }
        }
    }
}

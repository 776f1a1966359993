//! Transaction lifecycle
//!
//! [`Orm`] is the entry point: it owns the driver and the validated schema and
//! runs closures inside transactions. Each transaction gets a fresh
//! [`Session`]; nothing cached in one transaction is visible to another.
//!
//! ```
//! use berth::mock::MockDriver;
//! use berth::schema::{EntityDef, FieldDef, Schema};
//! use berth::Orm;
//! use std::sync::Arc;
//!
//! let schema = Schema::builder()
//!     .entity(EntityDef::new("Port").field("id", FieldDef::id()))
//!     .build()
//!     .unwrap();
//! let driver = MockDriver::empty();
//! let orm = Orm::new(Arc::new(driver.clone()), schema);
//!
//! let found = orm.in_transaction(|db| db.find_one_or_null("Port", "1")).unwrap();
//! assert!(found.is_none());
//! assert_eq!(driver.commits(), 1);
//! ```

use crate::cache::ChangeTracker;
use crate::config::{OrmConfig, TransactionSettings};
use crate::error::{ErrorContext, OrmCode, OrmError};
use crate::executor::Driver;
use crate::pool::PgDriver;
use crate::schema::Schema;
use crate::session::Session;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::tracing_helpers;

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Runs inside the transaction, after the body and before `COMMIT`
pub type BeforeCommitListener =
    Arc<dyn Fn(&ChangeTracker, &Session) -> Result<(), OrmError> + Send + Sync>;

/// Runs after `COMMIT` in a transaction of its own
pub type AfterCommitListener =
    Arc<dyn Fn(&ChangeTracker, &Session) -> Result<(), OrmError> + Send + Sync>;

/// Runs after `COMMIT` without a transaction
pub type DetachedListener = Arc<dyn Fn(&ChangeTracker) + Send + Sync>;

/// Per-transaction options
#[derive(Clone, Default)]
pub struct TransactionConfig {
    pub read_only: bool,
    pub before_commit: Vec<BeforeCommitListener>,
    pub after_commit: Vec<AfterCommitListener>,
    pub after_commit_detached: Vec<DetachedListener>,
}

impl fmt::Debug for TransactionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionConfig")
            .field("read_only", &self.read_only)
            .field("before_commit", &self.before_commit.len())
            .field("after_commit", &self.after_commit.len())
            .field("after_commit_detached", &self.after_commit_detached.len())
            .finish()
    }
}

impl TransactionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn before_commit<F>(mut self, listener: F) -> Self
    where
        F: Fn(&ChangeTracker, &Session) -> Result<(), OrmError> + Send + Sync + 'static,
    {
        self.before_commit.push(Arc::new(listener));
        self
    }

    pub fn after_commit<F>(mut self, listener: F) -> Self
    where
        F: Fn(&ChangeTracker, &Session) -> Result<(), OrmError> + Send + Sync + 'static,
    {
        self.after_commit.push(Arc::new(listener));
        self
    }

    pub fn after_commit_detached<F>(mut self, listener: F) -> Self
    where
        F: Fn(&ChangeTracker) + Send + Sync + 'static,
    {
        self.after_commit_detached.push(Arc::new(listener));
        self
    }
}

#[derive(Clone)]
pub struct Orm {
    driver: Arc<dyn Driver>,
    schema: Arc<Schema>,
    settings: TransactionSettings,
}

impl fmt::Debug for Orm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orm")
            .field("schema", &self.schema)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Orm {
    pub fn new(driver: Arc<dyn Driver>, schema: Arc<Schema>) -> Self {
        Self {
            driver,
            schema,
            settings: TransactionSettings::default(),
        }
    }

    /// PostgreSQL-backed instance from loaded configuration
    pub fn from_config(config: &OrmConfig, schema: Arc<Schema>) -> Self {
        let driver = PgDriver::new(config.database.clone());
        Self::new(Arc::new(driver), schema).with_settings(config.transactions.clone())
    }

    pub fn with_settings(mut self, settings: TransactionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn settings(&self) -> &TransactionSettings {
        &self.settings
    }

    /// Run `body` in a read-write transaction without listeners
    pub fn in_transaction<T, F>(&self, body: F) -> Result<T, OrmError>
    where
        F: FnOnce(&Session) -> Result<T, OrmError>,
    {
        self.in_transaction_with(TransactionConfig::default(), body)
    }

    /// Run `body` in a transaction
    ///
    /// The transaction commits when `body` and every before-commit listener
    /// succeed, after any relation fetch still in flight has settled. Any
    /// error rolls back and is returned with the executed statements
    /// attached. After-commit listeners cannot fail the transaction; their
    /// errors are only logged.
    pub fn in_transaction_with<T, F>(&self, config: TransactionConfig, body: F) -> Result<T, OrmError>
    where
        F: FnOnce(&Session) -> Result<T, OrmError>,
    {
        let id = NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::transaction_span(id).entered();

        let controls = self
            .driver
            .begin(config.read_only)
            .map_err(|err| OrmError::driver("begin", err))?;
        log::info!("[tx {id}] started (read_only={})", config.read_only);
        let session = Session::new(id, Arc::clone(&self.schema), controls);

        let outcome = body(&session).and_then(|value| {
            let changes = session.changes();
            for listener in &config.before_commit {
                listener(&changes, &session)?;
            }
            self.warn_on_cache_misses(&session);
            session.wait_for_all_resolved();
            Ok(value)
        });

        match outcome {
            Ok(value) => {
                self.commit(&session)?;
                self.run_after_commit(&config, &session.changes());
                Ok(value)
            }
            Err(err) => Err(self.roll_back(&session, err)),
        }
    }

    fn commit(&self, session: &Session) -> Result<(), OrmError> {
        let id = session.id();
        let controls = session.take_controls().ok_or_else(|| {
            OrmError::new(OrmCode::InactiveTransaction, ErrorContext::new("commit"))
                .with_queries(session.queries())
        })?;
        controls.commit().map_err(|err| {
            #[cfg(feature = "metrics")]
            METRICS.record_rollback();
            let err = OrmError::driver("commit", err).with_queries(session.queries());
            log::error!("[tx {id}] commit failed: {err}");
            err
        })?;

        #[cfg(feature = "metrics")]
        METRICS.record_commit();
        let stats = session.transaction_statistics();
        log::info!(
            "[tx {id}] committed after {} statement(s) in {:?}",
            stats.len(),
            stats.total_duration()
        );
        Ok(())
    }

    fn roll_back(&self, session: &Session, err: OrmError) -> OrmError {
        let id = session.id();
        let queries = session.queries();
        log::error!("[tx {id}] rolling back: {err}");
        for query in &queries {
            log::error!("[tx {id}]   {:?} {} {:?}", query.duration, query.query, query.params);
        }
        if let Some(controls) = session.take_controls() {
            if let Err(rollback_err) = controls.rollback() {
                log::error!("[tx {id}] rollback failed: {rollback_err}");
            }
        }
        #[cfg(feature = "metrics")]
        METRICS.record_rollback();
        err.with_queries(queries)
    }

    fn warn_on_cache_misses(&self, session: &Session) {
        let misses = session.relation_cache_misses();
        if self.settings.warn_on_cache_misses && misses > self.settings.relation_cache_miss_warning {
            log::warn!(
                "[ORM-2000] transaction {} missed the relation cache {misses} times (threshold {}); \
                 entities are probably resolved one by one across separate queries",
                session.id(),
                self.settings.relation_cache_miss_warning
            );
        }
    }

    fn run_after_commit(&self, config: &TransactionConfig, changes: &ChangeTracker) {
        let nested = TransactionConfig {
            read_only: config.read_only,
            before_commit: config.before_commit.clone(),
            after_commit: Vec::new(),
            after_commit_detached: Vec::new(),
        };
        for listener in &config.after_commit {
            let result = self.in_transaction_with(nested.clone(), |db| listener(changes, db));
            if let Err(err) = result {
                log::error!("after-commit listener failed: {err}");
            }
        }
        for listener in &config.after_commit_detached {
            listener(changes);
        }
    }
}

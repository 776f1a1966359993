//! OpenTelemetry instruments
//!
//! Recorded through the global meter; installing an exporter is left to the
//! application.

use once_cell::sync::Lazy;
use opentelemetry::{
    global,
    metrics::{Counter, Histogram, ObservableGauge},
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

pub static METRICS: Lazy<OrmMetrics> = Lazy::new(OrmMetrics::init);

pub struct OrmMetrics {
    pub queries_total: Counter<u64>,
    pub query_errors_total: Counter<u64>,
    pub query_duration: Histogram<f64>,
    pub connection_wait_duration: Histogram<f64>,
    pub relation_fetches_total: Counter<u64>,
    pub relation_cache_hits_total: Counter<u64>,
    pub commits_total: Counter<u64>,
    pub rollbacks_total: Counter<u64>,
    pub pool_idle: Arc<AtomicUsize>,
    _pool_idle_gauge: ObservableGauge<u64>,
}

impl OrmMetrics {
    pub fn init() -> Self {
        let meter = global::meter("berth");

        let queries_total = meter
            .u64_counter("berth_queries_total")
            .with_description("Total statements executed")
            .build();
        let query_errors_total = meter
            .u64_counter("berth_query_errors_total")
            .with_description("Statements that failed in the driver")
            .build();
        let query_duration = meter
            .f64_histogram("berth_query_duration_seconds")
            .with_description("Duration of statements")
            .build();
        let connection_wait_duration = meter
            .f64_histogram("berth_connection_wait_seconds")
            .with_description("Time spent establishing connections")
            .build();
        let relation_fetches_total = meter
            .u64_counter("berth_relation_fetches_total")
            .with_description("Batched relation fetches issued")
            .build();
        let relation_cache_hits_total = meter
            .u64_counter("berth_relation_cache_hits_total")
            .with_description("Relation accesses served from the transaction cache")
            .build();
        let commits_total = meter
            .u64_counter("berth_commits_total")
            .with_description("Committed transactions")
            .build();
        let rollbacks_total = meter
            .u64_counter("berth_rollbacks_total")
            .with_description("Rolled back transactions")
            .build();

        let pool_idle = Arc::new(AtomicUsize::new(0));
        let idle = Arc::clone(&pool_idle);
        let pool_idle_gauge = meter
            .u64_observable_gauge("berth_pool_idle_connections")
            .with_description("Idle connections in the pool")
            .with_callback(move |observer| {
                observer.observe(idle.load(Ordering::Relaxed) as u64, &[]);
            })
            .build();

        Self {
            queries_total,
            query_errors_total,
            query_duration,
            connection_wait_duration,
            relation_fetches_total,
            relation_cache_hits_total,
            commits_total,
            rollbacks_total,
            pool_idle,
            _pool_idle_gauge: pool_idle_gauge,
        }
    }

    pub fn record_query(&self, elapsed: Duration) {
        self.queries_total.add(1, &[]);
        self.query_duration.record(elapsed.as_secs_f64(), &[]);
    }

    pub fn record_query_error(&self) {
        self.query_errors_total.add(1, &[]);
    }

    pub fn record_connection_wait(&self, elapsed: Duration) {
        self.connection_wait_duration.record(elapsed.as_secs_f64(), &[]);
    }

    pub fn record_relation_fetch(&self) {
        self.relation_fetches_total.add(1, &[]);
    }

    pub fn record_relation_cache_hit(&self) {
        self.relation_cache_hits_total.add(1, &[]);
    }

    pub fn record_commit(&self) {
        self.commits_total.add(1, &[]);
    }

    pub fn record_rollback(&self) {
        self.rollbacks_total.add(1, &[]);
    }

    pub fn set_pool_idle(&self, idle: usize) {
        self.pool_idle.store(idle, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter() {
        METRICS.record_query(Duration::from_millis(3));
        METRICS.record_query_error();
        METRICS.record_relation_fetch();
        METRICS.record_relation_cache_hit();
        METRICS.record_commit();
        METRICS.record_rollback();
        METRICS.set_pool_idle(4);
        assert_eq!(METRICS.pool_idle.load(Ordering::Relaxed), 4);
    }
}

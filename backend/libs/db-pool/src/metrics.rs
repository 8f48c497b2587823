//! Prometheus metrics for database connection pool
//!
//! Tracks pool size, connection acquisition latency, and errors

use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};
use sqlx::PgPool;
use std::time::Instant;

lazy_static::lazy_static! {
    /// Database connection pool size by state (idle/active/max)
    static ref DB_POOL_CONNECTIONS: IntGaugeVec = register_int_gauge_vec!(
        "db_pool_connections",
        "Database pool connection count by state",
        &["service", "state"]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Time to acquire a connection (or open a transaction) from the pool
    static ref DB_POOL_ACQUIRE_DURATION: HistogramVec = register_histogram_vec!(
        "db_pool_acquire_duration_seconds",
        "Time to acquire connection from pool",
        &["service"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    ).expect("Prometheus metrics registration should succeed at startup");

    /// Connection acquisition errors by type
    static ref DB_POOL_CONNECTION_ERRORS: IntCounterVec = register_int_counter_vec!(
        "db_pool_connection_errors_total",
        "Connection acquisition errors",
        &["service", "error_type"]
    ).expect("Prometheus metrics registration should succeed at startup");
}

/// Refresh the pool size gauges
pub fn update_pool_metrics(pool: &PgPool, service: &str) {
    let size = pool.size() as i64;
    let idle = pool.num_idle() as i64;

    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "idle"])
        .set(idle);
    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "active"])
        .set(size - idle);
    DB_POOL_CONNECTIONS
        .with_label_values(&[service, "max"])
        .set(pool.options().get_max_connections() as i64);
}

/// Record how long an acquisition started at `start` took and classify its failure
pub fn record_acquire<T>(service: &str, start: Instant, result: &Result<T, sqlx::Error>) {
    DB_POOL_ACQUIRE_DURATION
        .with_label_values(&[service])
        .observe(start.elapsed().as_secs_f64());

    if let Err(e) = result {
        DB_POOL_CONNECTION_ERRORS
            .with_label_values(&[service, error_type(e)])
            .inc();
    }
}

fn error_type(error: &sqlx::Error) -> &'static str {
    match error {
        sqlx::Error::PoolTimedOut => "timeout",
        sqlx::Error::PoolClosed => "closed",
        sqlx::Error::Io(_) => "io",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_classification() {
        assert_eq!(error_type(&sqlx::Error::PoolTimedOut), "timeout");
        assert_eq!(error_type(&sqlx::Error::PoolClosed), "closed");
        assert_eq!(error_type(&sqlx::Error::RowNotFound), "other");
    }

    #[test]
    fn test_record_acquire_counts_errors() {
        let failed: Result<(), sqlx::Error> = Err(sqlx::Error::PoolTimedOut);
        record_acquire("metrics-test", Instant::now(), &failed);
        record_acquire("metrics-test", Instant::now(), &failed);

        let count = DB_POOL_CONNECTION_ERRORS
            .with_label_values(&["metrics-test", "timeout"])
            .get();
        assert_eq!(count, 2);
    }
}

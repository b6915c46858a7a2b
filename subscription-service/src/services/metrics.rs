//! Prometheus metrics for subscription lifecycle operations.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, CounterVec, Encoder,
    HistogramVec, IntCounterVec, TextEncoder,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use service_core::middleware::metrics::{install_http_recorder, render_http_metrics};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "subscription_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Lifecycle operations by outcome
pub static SUBSCRIPTION_OPERATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Renewal batch outcomes
pub static RENEWALS_PROCESSED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Renewal batch duration
pub static RENEWAL_BATCH_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Charged amount by currency and operation
pub static CHARGE_AMOUNT_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    SUBSCRIPTION_OPERATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "subscription_operations_total",
                "Total lifecycle operations by operation and outcome"
            ),
            &["operation", "outcome"]
        )
        .expect("Failed to register SUBSCRIPTION_OPERATIONS_TOTAL")
    });

    RENEWALS_PROCESSED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "subscription_renewals_processed_total",
                "Subscriptions processed by the renewal batch"
            ),
            &["outcome"]
        )
        .expect("Failed to register RENEWALS_PROCESSED_TOTAL")
    });

    RENEWAL_BATCH_DURATION.get_or_init(|| {
        register_histogram_vec!(
            histogram_opts!(
                "subscription_renewal_batch_duration_seconds",
                "Renewal batch duration",
                vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]
            ),
            &["trigger"]
        )
        .expect("Failed to register RENEWAL_BATCH_DURATION")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "subscription_errors_total",
                "Total errors by kind for alerting"
            ),
            &["error_kind", "operation"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    CHARGE_AMOUNT_TOTAL.get_or_init(|| {
        prometheus::register_counter_vec!(
            opts!(
                "subscription_charge_amount_total",
                "Total charged amount by currency and operation"
            ),
            &["currency", "operation"]
        )
        .expect("Failed to register CHARGE_AMOUNT_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;

    install_http_recorder();
}

/// Get metrics in Prometheus text format: the service registry followed by
/// the HTTP request metrics.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        buffer.clear();
    }
    let mut text = String::from_utf8(buffer).unwrap_or_default();
    text.push_str(&render_http_metrics());
    text
}

pub fn record_operation(operation: &str, outcome: &str) {
    if let Some(counter) = SUBSCRIPTION_OPERATIONS_TOTAL.get() {
        counter.with_label_values(&[operation, outcome]).inc();
    }
}

pub fn record_renewal(outcome: &str) {
    if let Some(counter) = RENEWALS_PROCESSED_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn record_renewal_batch_duration(trigger: &str, duration_secs: f64) {
    if let Some(histogram) = RENEWAL_BATCH_DURATION.get() {
        histogram.with_label_values(&[trigger]).observe(duration_secs);
    }
}

/// Record an error for alerting.
pub fn record_error(error_kind: &str, operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_kind, operation]).inc();
    }
}

/// Record a charged amount for financial tracking.
pub fn record_charge_amount(currency: &str, operation: &str, amount: Decimal) {
    if let Some(counter) = CHARGE_AMOUNT_TOTAL.get() {
        counter
            .with_label_values(&[currency, operation])
            .inc_by(amount.abs().to_f64().unwrap_or(0.0));
    }
}

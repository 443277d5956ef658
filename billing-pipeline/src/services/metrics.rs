//! Metrics module for the billing pipeline.
//! Provides Prometheus metrics for pipeline jobs and per-organization metering.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "pipeline_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Usage events counter (per-organization metering)
pub static USAGE_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Aggregates written counter (per-organization metering)
pub static AGGREGATES_WRITTEN_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Invoices created counter (per-organization metering)
pub static INVOICES_CREATED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Payment sync events counter (per-organization metering)
pub static PAYMENT_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Invoice amount counter by currency (monetary tracking)
pub static INVOICE_AMOUNT_TOTAL: OnceLock<prometheus::CounterVec> = OnceLock::new();

/// Job handler duration histogram
pub static JOB_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    USAGE_EVENTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "pipeline_usage_events_total",
                "Total usage events accepted by organization and source"
            ),
            &["organization_id", "source"]
        )
        .expect("Failed to register USAGE_EVENTS_TOTAL")
    });

    AGGREGATES_WRITTEN_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "pipeline_aggregates_written_total",
                "Total usage aggregates written by organization and resolution"
            ),
            &["organization_id", "resolution"]
        )
        .expect("Failed to register AGGREGATES_WRITTEN_TOTAL")
    });

    INVOICES_CREATED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "pipeline_invoices_created_total",
                "Total invoices created by organization and status"
            ),
            &["organization_id", "status"]
        )
        .expect("Failed to register INVOICES_CREATED_TOTAL")
    });

    PAYMENT_EVENTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "pipeline_payment_events_total",
                "Total payment sync events by organization, event and action"
            ),
            &["organization_id", "event", "action"]
        )
        .expect("Failed to register PAYMENT_EVENTS_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("pipeline_errors_total", "Total errors by type for alerting"),
            &["error_type", "operation"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    INVOICE_AMOUNT_TOTAL.get_or_init(|| {
        prometheus::register_counter_vec!(
            prometheus::opts!(
                "pipeline_invoice_amount_total",
                "Total invoiced amount by organization and currency"
            ),
            &["organization_id", "currency"]
        )
        .expect("Failed to register INVOICE_AMOUNT_TOTAL")
    });

    JOB_DURATION.get_or_init(|| {
        register_histogram_vec!(
            histogram_opts!(
                "pipeline_job_duration_seconds",
                "Job handler duration",
                vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
            ),
            &["job"]
        )
        .expect("Failed to register JOB_DURATION")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to string")
}

/// Record accepted usage events.
pub fn record_usage_events(organization_id: &str, source: &str, count: u64) {
    if let Some(counter) = USAGE_EVENTS_TOTAL.get() {
        counter
            .with_label_values(&[organization_id, source])
            .inc_by(count);
    }
}

/// Record written aggregates.
pub fn record_aggregates_written(organization_id: &str, resolution: &str, count: u64) {
    if let Some(counter) = AGGREGATES_WRITTEN_TOTAL.get() {
        counter
            .with_label_values(&[organization_id, resolution])
            .inc_by(count);
    }
}

/// Record a created invoice.
pub fn record_invoice_created(organization_id: &str, status: &str) {
    if let Some(counter) = INVOICES_CREATED_TOTAL.get() {
        counter.with_label_values(&[organization_id, status]).inc();
    }
}

/// Record an invoiced amount for financial tracking.
pub fn record_invoice_amount(organization_id: &str, currency: &str, amount_cents: i64) {
    if let Some(counter) = INVOICE_AMOUNT_TOTAL.get() {
        counter
            .with_label_values(&[organization_id, currency])
            .inc_by(amount_cents.unsigned_abs() as f64);
    }
}

/// Record a payment sync event.
pub fn record_payment_event(organization_id: &str, event: &str, action: &str) {
    if let Some(counter) = PAYMENT_EVENTS_TOTAL.get() {
        counter
            .with_label_values(&[organization_id, event, action])
            .inc();
    }
}

/// Record an error for alerting.
pub fn record_error(error_type: &str, operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type, operation]).inc();
    }
}

/// Record a job handler duration.
pub fn record_job_duration(job: &str, duration_secs: f64) {
    if let Some(histogram) = JOB_DURATION.get() {
        histogram.with_label_values(&[job]).observe(duration_secs);
    }
}

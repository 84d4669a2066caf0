//! Metrics module for subscription-service.
//! HTTP metrics go through the `metrics` recorder; domain metrics live in the
//! default Prometheus registry. `/metrics` renders both.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Webhook deliveries by event kind and outcome
pub static WEBHOOK_EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "subscription_webhook_events_total",
            "Webhook deliveries by event and outcome"
        ),
        &["event", "outcome"]
    )
    .expect("Failed to register WEBHOOK_EVENTS_TOTAL")
});

/// Ledger store query duration histogram
pub static LEDGER_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "subscription_ledger_query_duration_seconds",
            "Ledger store query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register LEDGER_QUERY_DURATION")
});

/// Outbound payment provider calls
pub static PROVIDER_CALLS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "subscription_provider_calls_total",
            "Payment provider calls by operation and outcome"
        ),
        &["operation", "outcome"]
    )
    .expect("Failed to register PROVIDER_CALLS_TOTAL")
});

/// Install the `metrics` recorder. Safe to call more than once.
pub fn init_metrics() {
    if METRICS_HANDLE.get().is_some() {
        return;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = METRICS_HANDLE.set(handle);
        }
        Err(e) => tracing::warn!(error = %e, "Prometheus recorder not installed"),
    }
}

pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string());

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&prometheus::gather(), &mut buffer).is_ok() {
        if let Ok(custom_metrics) = String::from_utf8(buffer) {
            output.push_str(&custom_metrics);
        }
    }

    output
}

pub fn record_webhook(event: &str, outcome: &str) {
    WEBHOOK_EVENTS_TOTAL.with_label_values(&[event, outcome]).inc();
}

pub fn record_provider_call(operation: &str, success: bool) {
    let outcome = if success { "success" } else { "error" };
    PROVIDER_CALLS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
}

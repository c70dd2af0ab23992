use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use prometheus::{IntCounterVec, Opts, Registry};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
pub static PROMETHEUS_REGISTRY: OnceLock<Registry> = OnceLock::new();
pub static PAYMENTS_INITIATED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static PAYMENTS_RECONCILED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

pub fn init_metrics() {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    if METRICS_HANDLE.set(handle).is_err() {
        panic!("failed to set metrics handle: already initialized");
    }

    // Registry for domain counters alongside the HTTP-level recorder.
    let registry = Registry::new();

    let initiated_counter = IntCounterVec::new(
        Opts::new(
            "payments_initiated_total",
            "STK push initiations by outcome",
        ),
        &["outcome"],
    )
    .expect("Failed to create payments_initiated_total metric");

    let reconciled_counter = IntCounterVec::new(
        Opts::new(
            "payments_reconciled_total",
            "Payments driven to a terminal state, by result and delivery path",
        ),
        &["result", "source"],
    )
    .expect("Failed to create payments_reconciled_total metric");

    registry
        .register(Box::new(initiated_counter.clone()))
        .expect("Failed to register payments_initiated_total");
    registry
        .register(Box::new(reconciled_counter.clone()))
        .expect("Failed to register payments_reconciled_total");

    PROMETHEUS_REGISTRY
        .set(registry)
        .expect("Failed to set prometheus registry");
    PAYMENTS_INITIATED_TOTAL
        .set(initiated_counter)
        .expect("Failed to set payments_initiated_total");
    PAYMENTS_RECONCILED_TOTAL
        .set(reconciled_counter)
        .expect("Failed to set payments_reconciled_total");
}

pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string());

    if let Some(registry) = PROMETHEUS_REGISTRY.get() {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        if let Ok(custom_metrics) = String::from_utf8(buffer) {
            output.push_str(&custom_metrics);
        }
    }

    output
}

/// Record an STK push initiation attempt.
pub fn record_initiation(outcome: &str) {
    if let Some(counter) = PAYMENTS_INITIATED_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

/// Record a payment reaching a terminal state.
pub fn record_reconciliation(result: &str, source: &str) {
    if let Some(counter) = PAYMENTS_RECONCILED_TOTAL.get() {
        counter.with_label_values(&[result, source]).inc();
    }
}

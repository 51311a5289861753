//! OTLP metrics implementation.
//!
//! Key metrics:
//! - marquee_txn_attempts_total: Counter for read-write transaction attempts
//! - marquee_txn_aborts_total: Counter for attempts aborted by a conflict
//! - marquee_transfer_total: Counter for transfer requests, by outcome
//! - marquee_query_latency_seconds: Histogram for album query latency

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};
use std::sync::OnceLock;

const TRANSFER_DESCRIPTION: &str =
    "Budget transfer requests by outcome (moved, insufficient, failed)";

/// Global metrics instance.
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Marquee metrics registry.
#[derive(Debug)]
pub struct Metrics {
    /// Read-write transaction attempts, retries included.
    pub txn_attempts: Counter<u64>,
    /// Attempts aborted by the store.
    pub txn_aborts: Counter<u64>,
    /// Transfer requests, including those that failed before commit.
    pub transfers: Counter<u64>,
    /// Album query latency in seconds.
    pub query_latency: Histogram<f64>,
}

impl Metrics {
    /// Create a new metrics registry from a meter.
    fn new(meter: &Meter) -> Self {
        Self {
            txn_attempts: meter
                .u64_counter("marquee_txn_attempts_total")
                .with_description("Read-write transaction attempts, including retries")
                .with_unit("1")
                .init(),
            txn_aborts: meter
                .u64_counter("marquee_txn_aborts_total")
                .with_description("Transaction attempts aborted by a concurrent commit")
                .with_unit("1")
                .init(),
            transfers: meter
                .u64_counter("marquee_transfer_total")
                .with_description(TRANSFER_DESCRIPTION)
                .with_unit("1")
                .init(),
            query_latency: meter
                .f64_histogram("marquee_query_latency_seconds")
                .with_description("Album query latency from session checkout to decode")
                .with_unit("s")
                .init(),
        }
    }
}

/// Initialize the metrics system.
///
/// This should be called once at startup. Subsequent calls are ignored.
///
/// # Arguments
///
/// * `otel_endpoint` - Optional OTLP endpoint for metrics export
pub fn init_metrics_with_endpoint(otel_endpoint: Option<&str>) {
    METRICS.get_or_init(|| {
        if let Some(endpoint) = otel_endpoint {
            // Use OTLP exporter when endpoint is configured
            use opentelemetry_otlp::{Protocol, WithExportConfig};

            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_protocol(Protocol::Grpc);

            match opentelemetry_otlp::new_pipeline()
                .metrics(opentelemetry_sdk::runtime::Tokio)
                .with_exporter(exporter)
                .with_period(std::time::Duration::from_secs(10))
                .build()
            {
                Ok(provider) => {
                    global::set_meter_provider(provider);
                    tracing::info!(endpoint, "OTLP metrics exporter configured");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to create OTLP exporter, using no-op metrics");
                    install_manual_reader();
                }
            }
        } else {
            // Metrics are recorded but not exported
            install_manual_reader();
        }

        let meter = global::meter("marquee");
        Metrics::new(&meter)
    });
}

fn install_manual_reader() {
    let reader = ManualReader::builder().build();
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    global::set_meter_provider(provider);
}

/// Initialize the metrics system without OTLP export.
pub fn init_metrics() {
    init_metrics_with_endpoint(None);
}

/// Record the start of a read-write transaction attempt.
pub fn record_txn_attempt() {
    if let Some(m) = METRICS.get() {
        m.txn_attempts.add(1, &[]);
    }
}

/// Record a transaction attempt aborted by the store.
pub fn record_txn_abort() {
    if let Some(m) = METRICS.get() {
        m.txn_aborts.add(1, &[]);
    }
}

/// Record the outcome of a transfer request.
///
/// `failed` covers transfers that never committed.
pub fn record_transfer(outcome: &'static str) {
    if let Some(m) = METRICS.get() {
        m.transfers.add(1, &[KeyValue::new("outcome", outcome)]);
    }
}

/// Record the latency of an album query.
pub fn record_query(latency_seconds: f64, ok: bool) {
    if let Some(m) = METRICS.get() {
        let attrs = [KeyValue::new("status", if ok { "ok" } else { "error" })];
        m.query_latency.record(latency_seconds, &attrs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        init_metrics();
        init_metrics();
        assert!(METRICS.get().is_some());
    }

    #[test]
    fn test_recorders_do_not_panic() {
        init_metrics();
        record_txn_attempt();
        record_txn_abort();
        record_transfer("moved");
        record_query(0.002, true);
    }

    #[test]
    fn test_transfer_description_names_every_outcome() {
        for outcome in ["moved", "insufficient", "failed"] {
            assert!(TRANSFER_DESCRIPTION.contains(outcome), "{outcome}");
        }
        assert!(!TRANSFER_DESCRIPTION.contains("Committed"));
    }
}

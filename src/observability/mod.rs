//! OpenTelemetry observability infrastructure.
//!
//! Provides:
//! - Structured tracing via tracing-subscriber
//! - OTLP metrics for transactions, transfers, and queries

pub mod metrics;
pub mod tracing;

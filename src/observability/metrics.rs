//! Metrics collection and exposition.
//!
//! # Metrics
//! - `shadow_frames_total` (counter): captured frames by `outcome` (tcp, unusable)
//! - `shadow_flows_total` (counter): flow lifecycle by `event`
//! - `shadow_requests_extracted_total` (counter): complete requests parsed
//! - `shadow_extract_errors_total` (counter): extractor stops by `kind`
//! - `shadow_decisions_total` (counter): sampling/filter outcomes by `decision`
//! - `shadow_forward_total` (counter): dispatch results by `outcome`
//! - `shadow_forward_duration_seconds` (histogram): dispatch latency
//!
//! # Design Decisions
//! - Labels are static strings; no per-host or per-client cardinality

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from inside the Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_frame(outcome: &'static str) {
    counter!("shadow_frames_total", "outcome" => outcome).increment(1);
}

pub fn record_flow(event: &'static str) {
    counter!("shadow_flows_total", "event" => event).increment(1);
}

pub fn record_request_extracted() {
    counter!("shadow_requests_extracted_total").increment(1);
}

pub fn record_extract_error(kind: &'static str) {
    counter!("shadow_extract_errors_total", "kind" => kind).increment(1);
}

pub fn record_decision(decision: &'static str) {
    counter!("shadow_decisions_total", "decision" => decision).increment(1);
}

/// Record one dispatch and its latency.
pub fn record_forward(outcome: &'static str, start: Instant) {
    counter!("shadow_forward_total", "outcome" => outcome).increment(1);
    histogram!("shadow_forward_duration_seconds").record(start.elapsed().as_secs_f64());
}

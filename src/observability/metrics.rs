//! Metrics collection and exposition.
//!
//! # Metrics
//! - `devhost_requests_total` (counter): requests by terminal action and status
//! - `devhost_request_duration_seconds` (histogram): latency by terminal action
//! - `devhost_driver_faults_total` (counter): driver checks that failed on the filesystem
//! - `devhost_config_reloads_total` (counter): configuration reloads by result
//!
//! # Design Decisions
//! - Recording is a no-op until `init_metrics` installs the Prometheus recorder
//! - Histogram buckets tuned for local request latencies

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};

pub const REQUESTS_TOTAL: &str = "devhost_requests_total";
pub const REQUEST_DURATION: &str = "devhost_request_duration_seconds";
pub const DRIVER_FAULTS_TOTAL: &str = "devhost_driver_faults_total";
pub const CONFIG_RELOADS_TOTAL: &str = "devhost_config_reloads_total";

const DURATION_BUCKETS: [f64; 10] = [0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0];

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(Matcher::Full(REQUEST_DURATION.to_string()), &DURATION_BUCKETS)?
        .install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(action: &'static str, status: u16, start: Instant) {
    ::metrics::counter!(REQUESTS_TOTAL, "action" => action, "status" => status.to_string())
        .increment(1);
    ::metrics::histogram!(REQUEST_DURATION, "action" => action)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_driver_fault(driver: &str) {
    ::metrics::counter!(DRIVER_FAULTS_TOTAL, "driver" => driver.to_string()).increment(1);
}

pub fn record_config_reload(applied: bool) {
    let result = if applied { "applied" } else { "rejected" };
    ::metrics::counter!(CONFIG_RELOADS_TOTAL, "result" => result).increment(1);
}

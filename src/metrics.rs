//! Prometheus metrics for the auth and abuse-control layer.
//!
//! Metrics are exposed via a dedicated HTTP listener (default port 9090).
//! Every recording function is a no-op until [`init_metrics`] installs the
//! exporter, so tests and tools can call them freely.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `gate_auth_failures_total` - 401 outcomes (label: reason)
//! - `gate_forbidden_total` - 403 outcomes
//! - `gate_rate_limited_total` - 429 outcomes (label: limiter)
//! - `gate_tokens_issued_total` - token pairs issued (label: flow)
//! - `gate_proxy_refresh_total` - trusted range refreshes (label: outcome)
//!
//! ## Gauges
//! - `gate_trusted_ranges` - ranges in the current fetched set
//! - `gate_rate_limit_tracked_visitors` - keys held per limiter after a sweep

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const AUTH_FAILURES_TOTAL: &str = "gate_auth_failures_total";
    pub const FORBIDDEN_TOTAL: &str = "gate_forbidden_total";
    pub const RATE_LIMITED_TOTAL: &str = "gate_rate_limited_total";
    pub const TOKENS_ISSUED_TOTAL: &str = "gate_tokens_issued_total";
    pub const PROXY_REFRESH_TOTAL: &str = "gate_proxy_refresh_total";
    pub const TRUSTED_RANGES: &str = "gate_trusted_ranges";
    pub const TRACKED_VISITORS: &str = "gate_rate_limit_tracked_visitors";
}

/// Install the Prometheus exporter and describe all metrics.
///
/// # Errors
///
/// Fails if the listener cannot be installed (e.g. a recorder is already
/// set).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Requests rejected with 401, by internal reason"
    );
    describe_counter!(
        names::FORBIDDEN_TOTAL,
        "Authenticated requests rejected for missing permissions"
    );
    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Requests rejected by a rate limiter"
    );
    describe_counter!(
        names::TOKENS_ISSUED_TOTAL,
        "Token pairs issued, by flow (register, login, refresh)"
    );
    describe_counter!(
        names::PROXY_REFRESH_TOTAL,
        "Trusted proxy range refresh attempts, by outcome"
    );

    describe_gauge!(
        names::TRUSTED_RANGES,
        "Number of CIDR ranges in the fetched trusted proxy set"
    );
    describe_gauge!(
        names::TRACKED_VISITORS,
        "Client keys tracked by each rate limiter"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Initialize metrics, logging failures instead of returning them.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

// =============================================================================
// Counters
// =============================================================================

pub fn record_auth_failure(reason: &'static str) {
    counter!(names::AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
}

pub fn record_forbidden() {
    counter!(names::FORBIDDEN_TOTAL).increment(1);
}

pub fn record_rate_limited(limiter: &'static str) {
    counter!(names::RATE_LIMITED_TOTAL, "limiter" => limiter).increment(1);
}

pub fn record_tokens_issued(flow: &'static str) {
    counter!(names::TOKENS_ISSUED_TOTAL, "flow" => flow).increment(1);
}

/// Outcome is one of `replaced`, `failed`, `empty`.
pub fn record_proxy_refresh(outcome: &'static str) {
    counter!(names::PROXY_REFRESH_TOTAL, "outcome" => outcome).increment(1);
}

// =============================================================================
// Gauges
// =============================================================================

pub fn set_trusted_ranges(count: usize) {
    gauge!(names::TRUSTED_RANGES).set(count as f64);
}

pub fn set_tracked_visitors(limiter: &'static str, count: usize) {
    gauge!(names::TRACKED_VISITORS, "limiter" => limiter).set(count as f64);
}

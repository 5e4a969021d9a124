// src/core/metrics.rs

//! Registers Prometheus metrics for the control daemon. Uses `once_cell`
//! rather than `lazy_static` so every other global in the crate follows one
//! lazy-init idiom.

use once_cell::sync::Lazy;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, Histogram, TextEncoder, register_counter,
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
};

// --- HTTP surface ---
pub static HTTP_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dplaneos_http_requests_total",
        "Total HTTP requests handled, labeled by method and status class.",
        &["method", "status"]
    )
    .unwrap()
});

pub static HTTP_REQUEST_LATENCY_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "dplaneos_http_request_latency_seconds",
        "Latency of HTTP request handling in seconds."
    )
    .unwrap()
});

pub static RATE_LIMIT_REJECTIONS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "dplaneos_rate_limit_rejections_total",
        "Total requests rejected by the rate limiter."
    )
    .unwrap()
});

// --- Sessions and auth ---
pub static ACTIVE_SESSIONS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("dplaneos_active_sessions", "Number of currently valid sessions.").unwrap()
});

pub static LOGIN_FAILURES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("dplaneos_login_failures_total", "Total failed login attempts.").unwrap()
});

// --- WebSocket hub ---
pub static HUB_CLIENTS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("dplaneos_hub_clients", "Number of connected WebSocket event clients.").unwrap()
});

pub static HUB_EVENTS_DROPPED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "dplaneos_hub_events_dropped_total",
        "Total events dropped due to a full client channel (backpressure)."
    )
    .unwrap()
});

// --- Command executor ---
pub static EXEC_INVOCATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "dplaneos_exec_invocations_total",
        "Total external command invocations, labeled by program and outcome.",
        &["program", "outcome"]
    )
    .unwrap()
});

pub static EXEC_WHITELIST_REJECTIONS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "dplaneos_exec_whitelist_rejections_total",
        "Total arguments rejected by a whitelist pattern before execution."
    )
    .unwrap()
});

// --- Background monitors ---
pub static POOL_CAPACITY_USED_PCT: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "dplaneos_pool_capacity_used_pct",
        "Most recently observed ZFS pool capacity usage percentage.",
        &["pool"]
    )
    .unwrap()
});

pub static POOL_HEARTBEAT_HEALTHY: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "dplaneos_pool_heartbeat_healthy",
        "1 if the pool heartbeat is currently healthy, 0 otherwise.",
        &["pool"]
    )
    .unwrap()
});

pub static INOTIFY_WATCHES_USED_PCT: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "dplaneos_inotify_watches_used_pct",
        "Most recently observed inotify watch usage percentage."
    )
    .unwrap()
});

// --- Uploads ---
pub static UPLOADS_IN_PROGRESS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("dplaneos_uploads_in_progress", "Number of upload sessions currently open.").unwrap()
});

pub static UPLOADS_COMPLETED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!("dplaneos_uploads_completed_total", "Total uploads successfully assembled.").unwrap()
});

// --- Cluster ---
pub static CLUSTER_QUORATE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("dplaneos_cluster_quorate", "1 if this node currently sees a quorate cluster, 0 otherwise.")
        .unwrap()
});

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_metrics_includes_registered_families() {
        HTTP_REQUESTS_TOTAL.with_label_values(&["GET", "2xx"]).inc();
        let text = gather_metrics();
        assert!(text.contains("dplaneos_http_requests_total"));
    }
}

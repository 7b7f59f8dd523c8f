//! Prometheus metrics for every node role.
//!
//! Metrics cover:
//! - RPC traffic (requests served and sent, per request kind and outcome)
//! - Coordinator membership, elections and leader-change notification retries
//! - Broker replication pulls and log sync
//! - Publisher and subscriber log traffic
//!
//! All metrics are registered to a custom registry with the "herald" prefix to
//! avoid name collisions with other libraries using the default registry.
//! Registration errors are logged and the metric is used unregistered.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry,
    TextEncoder, opts,
};
use tracing::warn;

/// Custom Prometheus registry for herald metrics.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("herald".to_string()), None).unwrap_or_else(|_| Registry::new())
});

// =============================================================================
// Metric Declaration Macros
// =============================================================================

macro_rules! define_gauge {
    ($name:ident, $metric_name:expr, $help:expr) => {
        #[doc = $help]
        pub static $name: Lazy<IntGauge> =
            Lazy::new(|| register_int_gauge_safe(&REGISTRY, $metric_name, $help));
    };
}

macro_rules! define_counter {
    ($name:ident, $metric_name:expr, $help:expr) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounter> =
            Lazy::new(|| register_int_counter_safe(&REGISTRY, $metric_name, $help));
    };
}

macro_rules! define_counter_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounterVec> = Lazy::new(|| {
            register_int_counter_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

macro_rules! define_histogram_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?], [$($bucket:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<HistogramVec> = Lazy::new(|| {
            register_histogram_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+], vec![$($bucket),+])
        });
    };
}

// =============================================================================
// RPC metrics
// =============================================================================

define_counter_vec!(
    RPC_REQUESTS_SERVED,
    "rpc_requests_served_total",
    "Inbound RPC requests handled, by request kind and outcome",
    ["request", "status"]
);
define_counter_vec!(
    RPC_REQUESTS_SENT,
    "rpc_requests_sent_total",
    "Outbound RPC requests, by request kind and outcome",
    ["request", "status"]
);
define_histogram_vec!(
    RPC_DURATION,
    "rpc_duration_seconds",
    "Outbound RPC round trip duration in seconds",
    ["request"],
    [0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
);
define_gauge!(
    ACTIVE_CONNECTIONS,
    "active_connections",
    "Number of inbound RPC connections currently open"
);

// =============================================================================
// Coordinator metrics
// =============================================================================

define_gauge!(
    REGISTERED_BROKERS,
    "registered_brokers",
    "Number of brokers in the coordinator's membership"
);
define_counter_vec!(
    LEADER_ELECTIONS,
    "leader_elections_total",
    "Leader elections run by the coordinator, by trigger",
    ["trigger"]
);
define_counter!(
    DEAD_BROKERS_REMOVED,
    "dead_brokers_removed_total",
    "Brokers removed by the dead-broker sweep"
);
define_counter_vec!(
    LEADER_NOTIFICATIONS,
    "leader_notifications_total",
    "Leader-change pushes, by attempt and outcome",
    ["attempt", "status"]
);
define_gauge!(
    PENDING_NOTIFICATIONS,
    "pending_notifications",
    "Leader-change pushes currently awaiting retry"
);
define_counter!(
    NOTIFICATIONS_ABANDONED,
    "notifications_abandoned_total",
    "Leader-change pushes dropped after exhausting their retries"
);

// =============================================================================
// Broker metrics
// =============================================================================

define_counter_vec!(
    REPLICATION_SYNCS,
    "replication_syncs_total",
    "Follower state pulls from the leader, by outcome",
    ["status"]
);
define_counter_vec!(
    LOG_OPERATIONS,
    "log_operations_total",
    "Calls into the external message log, by operation and outcome",
    ["operation", "status"]
);

// =============================================================================
// Client metrics
// =============================================================================

define_counter!(
    MESSAGES_PUBLISHED,
    "messages_published_total",
    "Messages appended to the log by publishers"
);
define_counter!(
    MESSAGES_CONSUMED,
    "messages_consumed_total",
    "Messages delivered to subscribers by the consume loop"
);

// =============================================================================
// Safe registration helpers
// =============================================================================

fn register_int_gauge_safe(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).expect("metric name/help should be valid");
    match registry.register(Box::new(gauge.clone())) {
        Ok(()) => gauge,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntGauge metric, using unregistered fallback");
            gauge
        }
    }
}

fn register_int_counter_safe(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric name/help should be valid");
    match registry.register(Box::new(counter.clone())) {
        Ok(()) => counter,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntCounter metric, using unregistered fallback");
            counter
        }
    }
}

fn register_int_counter_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntCounterVec {
    let counter =
        IntCounterVec::new(opts!(name, help), labels).expect("metric opts should be valid");
    match registry.register(Box::new(counter.clone())) {
        Ok(()) => counter,
        Err(e) => {
            warn!(name, error = %e, "Failed to register IntCounterVec metric, using unregistered fallback");
            counter
        }
    }
}

fn register_histogram_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
    buckets: Vec<f64>,
) -> HistogramVec {
    let histogram = HistogramVec::new(HistogramOpts::new(name, help).buckets(buckets), labels)
        .expect("metric opts should be valid");
    match registry.register(Box::new(histogram.clone())) {
        Ok(()) => histogram,
        Err(e) => {
            warn!(name, error = %e, "Failed to register HistogramVec metric, using unregistered fallback");
            histogram
        }
    }
}

/// Force registration of every metric so they appear in the first scrape.
///
/// Idempotent.
pub fn init_metrics() {
    let _ = &*RPC_REQUESTS_SERVED;
    let _ = &*RPC_REQUESTS_SENT;
    let _ = &*RPC_DURATION;
    let _ = &*ACTIVE_CONNECTIONS;
    let _ = &*REGISTERED_BROKERS;
    let _ = &*LEADER_ELECTIONS;
    let _ = &*DEAD_BROKERS_REMOVED;
    let _ = &*LEADER_NOTIFICATIONS;
    let _ = &*PENDING_NOTIFICATIONS;
    let _ = &*NOTIFICATIONS_ABANDONED;
    let _ = &*REPLICATION_SYNCS;
    let _ = &*LOG_OPERATIONS;
    let _ = &*MESSAGES_PUBLISHED;
    let _ = &*MESSAGES_CONSUMED;
}

/// Encode all metrics in Prometheus text format.
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[inline]
fn status_label(ok: bool) -> &'static str {
    if ok { "success" } else { "error" }
}

/// Record an inbound request handled by [`crate::rpc::RpcServer`].
pub fn record_rpc_served(request: &str, ok: bool) {
    RPC_REQUESTS_SERVED
        .with_label_values(&[request, status_label(ok)])
        .inc();
}

/// Record an outbound request and its round trip time.
pub fn record_rpc_sent(request: &str, ok: bool, duration_secs: f64) {
    RPC_REQUESTS_SENT
        .with_label_values(&[request, status_label(ok)])
        .inc();
    RPC_DURATION
        .with_label_values(&[request])
        .observe(duration_secs);
}

/// Record an election and what triggered it.
pub fn record_election(trigger: &str) {
    LEADER_ELECTIONS.with_label_values(&[trigger]).inc();
}

/// Record a leader-change push. `attempt` is "initial" or "retry".
pub fn record_notification(attempt: &str, ok: bool) {
    LEADER_NOTIFICATIONS
        .with_label_values(&[attempt, status_label(ok)])
        .inc();
}

pub fn record_replication_sync(ok: bool) {
    REPLICATION_SYNCS
        .with_label_values(&[status_label(ok)])
        .inc();
}

pub fn record_log_operation(operation: &str, ok: bool) {
    LOG_OPERATIONS
        .with_label_values(&[operation, status_label(ok)])
        .inc();
}

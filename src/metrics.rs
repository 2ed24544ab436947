// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the directory service operator.
//!
//! All metrics carry the `ds_operator_` prefix.
//!
//! # Metrics Categories
//!
//! - **Reconciliation Metrics** - Reconciliations by outcome, duration, requeues
//! - **Resource Lifecycle Metrics** - Services created and patched
//! - **Directory Metrics** - Admin sessions, backup task actions, password rotations
//! - **Error Metrics** - Errors by class and status reason
//!
//! # Example
//!
//! ```rust,no_run
//! use ds_operator::metrics::record_reconciliation_outcome;
//!
//! record_reconciliation_outcome("DirectoryService", "ready", std::time::Duration::from_secs(1));
//! ```

use crate::constants::METRICS_SERVER_PATH;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{error, info};

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Namespace prefix for all operator metrics
const METRICS_NAMESPACE: &str = "ds_operator";

// ============================================================================
// Global Metrics Registry
// ============================================================================

/// Global Prometheus metrics registry
///
/// All metrics are registered in this registry and exposed via `/metrics` endpoint.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Reconciliation Metrics
// ============================================================================

/// Total number of reconciliations by resource type and outcome
///
/// Labels:
/// - `resource_type`: Kind of resource (`DirectoryService`)
/// - `outcome`: `ready`, `failed`, `retry`, `skipped`
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconciliations_total"),
        "Total number of reconciliations by resource type and outcome",
    );
    let counter = CounterVec::new(opts, &["resource_type", "outcome"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of reconciliations in seconds
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of reconciliations in seconds by resource type",
    )
    .buckets(vec![0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]);
    let histogram = HistogramVec::new(opts, &["resource_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

/// Total number of requeue operations
///
/// Labels:
/// - `resource_type`: Kind of resource
/// - `reason`: `resync`, `backoff`, `coalesced`, `error`
pub static REQUEUE_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_requeues_total"),
        "Total number of requeue operations by resource type and reason",
    );
    let counter = CounterVec::new(opts, &["resource_type", "reason"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Resource Lifecycle Metrics
// ============================================================================

/// Total number of resources created
pub static RESOURCES_CREATED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_resources_created_total"),
        "Total number of resources created by type",
    );
    let counter = CounterVec::new(opts, &["resource_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of resources patched to repair drift
pub static RESOURCES_UPDATED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_resources_updated_total"),
        "Total number of resources updated by type",
    );
    let counter = CounterVec::new(opts, &["resource_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Directory Metrics
// ============================================================================

/// Administrative session events
///
/// Labels:
/// - `event`: `opened`, `closed`, `bind_failed`, `connect_failed`
pub static ADMIN_SESSIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_admin_sessions_total"),
        "Administrative session events against the directory server",
    );
    let counter = CounterVec::new(opts, &["event"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Administrative sessions currently open
pub static ADMIN_SESSIONS_ACTIVE: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_admin_sessions_active"),
        "Administrative sessions currently open",
    );
    let gauge = GaugeVec::new(opts, &["endpoint"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Recurring backup task actions
///
/// Labels:
/// - `action`: `created`, `in_sync`, `replaced`, `conflict`
pub static BACKUP_TASK_ACTIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_backup_task_actions_total"),
        "Recurring backup task actions by kind",
    );
    let counter = CounterVec::new(opts, &["action"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Administrative password resets applied
pub static PASSWORD_ROTATIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_password_rotations_total"),
        "Administrative password resets applied",
    );
    let counter = CounterVec::new(opts, &["result"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Error Metrics
// ============================================================================

/// Total number of errors by class and status reason
///
/// Labels:
/// - `class`: `transient`, `authentication`, `conflict`, `invalid_spec`
/// - `reason`: CamelCase status reason
pub static ERRORS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_errors_total"),
        "Total number of reconciliation errors by class and reason",
    );
    let counter = CounterVec::new(opts, &["class", "reason"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record the outcome and duration of a reconciliation.
pub fn record_reconciliation_outcome(resource_type: &str, outcome: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, outcome])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

/// Record a reconciliation requeue
pub fn record_requeue(resource_type: &str, reason: &str) {
    REQUEUE_TOTAL
        .with_label_values(&[resource_type, reason])
        .inc();
}

/// Record resource creation
pub fn record_resource_created(resource_type: &str) {
    RESOURCES_CREATED_TOTAL
        .with_label_values(&[resource_type])
        .inc();
}

/// Record resource update
pub fn record_resource_updated(resource_type: &str) {
    RESOURCES_UPDATED_TOTAL
        .with_label_values(&[resource_type])
        .inc();
}

/// Record an admin session being opened (after a successful bind).
pub fn record_session_opened(endpoint: &str) {
    ADMIN_SESSIONS_TOTAL.with_label_values(&["opened"]).inc();
    ADMIN_SESSIONS_ACTIVE.with_label_values(&[endpoint]).inc();
}

/// Record an admin session being closed.
pub fn record_session_closed(endpoint: &str) {
    ADMIN_SESSIONS_TOTAL.with_label_values(&["closed"]).inc();
    ADMIN_SESSIONS_ACTIVE.with_label_values(&[endpoint]).dec();
}

/// Record a failed connect or bind.
pub fn record_session_failure(event: &str) {
    ADMIN_SESSIONS_TOTAL.with_label_values(&[event]).inc();
}

pub fn record_backup_task_action(action: &str) {
    BACKUP_TASK_ACTIONS_TOTAL.with_label_values(&[action]).inc();
}

pub fn record_password_rotation(result: &str) {
    PASSWORD_ROTATIONS_TOTAL.with_label_values(&[result]).inc();
}

/// Record an error
pub fn record_error(class: &str, reason: &str) {
    ERRORS_TOTAL.with_label_values(&[class, reason]).inc();
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}

/// `GET /metrics` handler.
async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    gather_metrics().map_err(|e| {
        error!(error = %e, "Failed to encode metrics");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

/// Router exposing the registry on [`METRICS_SERVER_PATH`] plus a liveness probe.
pub fn metrics_routes() -> Router {
    Router::new()
        .route(METRICS_SERVER_PATH, get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }))
}

/// Serve [`metrics_routes`] on `addr` until the process exits.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve_metrics(addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, path = METRICS_SERVER_PATH, "Metrics server started");
    axum::serve(listener, metrics_routes()).await
}

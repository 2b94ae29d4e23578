//! Prometheus metrics collection for the OTP server.
//!
//! Reduced in scope from the teacher's IRC counters (SPEC_FULL.md §1.5):
//! observability stays in the ambient stack even though in-game economy
//! and UI concerns are out of scope. Tracks bus throughput, object
//! lifecycle events, and Database Server RPC volume.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

lazy_static! {
    /// Global Prometheus registry for all metrics.
    pub static ref REGISTRY: Registry = Registry::new();

    // ========================================================================
    // Counters (monotonic increasing)
    // ========================================================================

    /// Total data messages routed by the Message Director.
    pub static ref MESSAGES_ROUTED: IntCounter = IntCounter::new(
        "otp_messages_routed_total",
        "Total data messages routed by the Message Director"
    ).unwrap();

    /// Total objects generated in the State Server.
    pub static ref OBJECTS_GENERATED: IntCounter = IntCounter::new(
        "otp_objects_generated_total",
        "Total STATESERVER_OBJECT_GENERATE_WITH_REQUIRED_OTHER events"
    ).unwrap();

    /// Total objects deleted (RAM delete) in the State Server.
    pub static ref OBJECTS_DELETED: IntCounter = IntCounter::new(
        "otp_objects_deleted_total",
        "Total STATESERVER_OBJECT_DELETE_RAM events"
    ).unwrap();

    /// Total Database Server RPCs served, across all seven kinds.
    pub static ref DB_RPCS_SERVED: IntCounter = IntCounter::new(
        "otp_db_rpcs_served_total",
        "Total Database Server RPCs served"
    ).unwrap();

    /// Total client field updates dropped for lacking send permission.
    pub static ref UNAUTHORIZED_FIELD_UPDATES: IntCounter = IntCounter::new(
        "otp_unauthorized_field_updates_total",
        "Client field updates dropped by the send-permission check"
    ).unwrap();

    // ========================================================================
    // Gauges (can increase/decrease)
    // ========================================================================

    /// Currently connected game clients.
    pub static ref CONNECTED_CLIENTS: IntGauge = IntGauge::new(
        "otp_connected_clients",
        "Currently connected game clients"
    ).unwrap();

    /// Live distributed objects across both State Server registries.
    pub static ref LIVE_OBJECTS: IntGauge = IntGauge::new(
        "otp_live_objects",
        "Live distributed objects (ephemeral + hydrated)"
    ).unwrap();
}

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at server startup before any metrics are recorded.
pub fn init() {
    REGISTRY.register(Box::new(MESSAGES_ROUTED.clone())).unwrap();
    REGISTRY.register(Box::new(OBJECTS_GENERATED.clone())).unwrap();
    REGISTRY.register(Box::new(OBJECTS_DELETED.clone())).unwrap();
    REGISTRY.register(Box::new(DB_RPCS_SERVED.clone())).unwrap();
    REGISTRY
        .register(Box::new(UNAUTHORIZED_FIELD_UPDATES.clone()))
        .unwrap();
    REGISTRY.register(Box::new(CONNECTED_CLIENTS.clone())).unwrap();
    REGISTRY.register(Box::new(LIVE_OBJECTS.clone())).unwrap();
}

/// Gather all metrics and encode them in Prometheus text format.
///
/// Returns a string suitable for HTTP response on `/metrics` endpoint.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

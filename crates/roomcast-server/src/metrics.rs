//! Prometheus recorder and metric name constants.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the `/metrics` endpoint. Only one
/// recorder can be installed per process.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Sessions accepted (counter).
pub const CONNECTIONS_TOTAL: &str = "roomcast_connections_total";
/// Sessions currently registered (gauge).
pub const CONNECTIONS_ACTIVE: &str = "roomcast_connections_active";
/// Sessions evicted for a full outbound queue (counter).
pub const SESSIONS_SHED_TOTAL: &str = "roomcast_sessions_shed_total";
/// Inbound text frames read (counter).
pub const EVENTS_RECEIVED_TOTAL: &str = "roomcast_events_received_total";
/// Messages refused by middleware or the reserved-name rule (counter, labels: reason).
pub const EVENTS_BLOCKED_TOTAL: &str = "roomcast_events_blocked_total";
/// Frames or payloads that failed to decode (counter, labels: kind).
pub const DECODE_FAILURES_TOTAL: &str = "roomcast_decode_failures_total";
/// Handlers that returned an error (counter, labels: event).
pub const HANDLER_ERRORS_TOTAL: &str = "roomcast_handler_errors_total";
/// Upgrades refused by the auth gate (counter).
pub const UNAUTHORIZED_TOTAL: &str = "roomcast_unauthorized_total";
/// Upgrades refused by the origin check (counter).
pub const ORIGIN_REJECTED_TOTAL: &str = "roomcast_origin_rejected_total";

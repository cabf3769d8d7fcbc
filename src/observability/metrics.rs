//! # Metrics
//!
//! Counters and gauges are recorded through the `metrics` facade at their call sites and
//! rendered in Prometheus text format by the gateway's `/metrics` route.

use metrics::{describe_counter, describe_gauge, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing::info;

use crate::core::error::{GatewayError, GatewayResult};

pub const CONNECTIONS_TOTAL: &str = "gateway_connections_total";
pub const ACTIVE_CONNECTIONS: &str = "gateway_active_connections";
pub const HANDSHAKE_FAILURES_TOTAL: &str = "gateway_handshake_failures_total";
pub const FRAMES_IN_TOTAL: &str = "gateway_frames_in_total";
pub const FRAMES_DROPPED_TOTAL: &str = "gateway_frames_dropped_total";
pub const UNKNOWN_MESSAGES_TOTAL: &str = "gateway_unknown_messages_total";
pub const HANDLER_ERRORS_TOTAL: &str = "gateway_handler_errors_total";
pub const SERVICES_EXPIRED_TOTAL: &str = "registry_services_expired_total";
pub const DISCOVERY_SELECTIONS_TOTAL: &str = "registry_discovery_selections_total";

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder as the global `metrics` recorder
///
/// Safe to call more than once; later calls return the first handle.
pub fn install_recorder() -> GatewayResult<PrometheusHandle> {
    if let Some(handle) = HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| GatewayError::config(format!("Failed to install metrics recorder: {}", e)))?;
    describe_metrics();
    info!("Prometheus metrics recorder installed");

    Ok(HANDLE.get_or_init(|| handle).clone())
}

/// A handle on a recorder that is not installed globally; renders nothing
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

fn describe_metrics() {
    describe_counter!(CONNECTIONS_TOTAL, Unit::Count, "Connections that completed the handshake");
    describe_gauge!(ACTIVE_CONNECTIONS, Unit::Count, "Sessions currently registered");
    describe_counter!(HANDSHAKE_FAILURES_TOTAL, Unit::Count, "Handshakes rejected, by reason");
    describe_counter!(FRAMES_IN_TOTAL, Unit::Count, "Data frames read from clients");
    describe_counter!(FRAMES_DROPPED_TOTAL, Unit::Count, "Outbound frames dropped on a full queue");
    describe_counter!(UNKNOWN_MESSAGES_TOTAL, Unit::Count, "Envelopes with no registered handler");
    describe_counter!(HANDLER_ERRORS_TOTAL, Unit::Count, "Handler failures, by message type");
    describe_counter!(SERVICES_EXPIRED_TOTAL, Unit::Count, "Service records removed after their TTL");
    describe_counter!(DISCOVERY_SELECTIONS_TOTAL, Unit::Count, "Instances picked by a balancer");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_handle_sees_no_global_metrics() {
        metrics::counter!(CONNECTIONS_TOTAL).increment(1);
        let handle = detached_handle();
        assert!(!handle.render().contains(CONNECTIONS_TOTAL));
    }
}

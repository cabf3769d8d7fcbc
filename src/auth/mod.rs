pub mod grpc;
pub mod http;
pub mod providers;

pub use grpc::GrpcAuthTransport;
pub use http::HttpAuthTransport;
pub use providers::{AuthClient, AuthResult, AuthService, AuthTransport, RefreshResult, NO_CREDENTIALS};

use std::sync::Arc;
use tracing::info;

use crate::core::config::{AuthConfig, AuthTransportKind, GatewayConfig};
use crate::core::error::{GatewayError, GatewayResult};
use crate::discovery::{ServiceInfo, StatusClient};

/// Build the auth binding selected by `auth.transport`
///
/// When `auth.discovery` is set the endpoint is resolved once, here, by asking the
/// status server for one live instance of the configured service type.
pub async fn create_auth_service(config: &GatewayConfig) -> GatewayResult<Arc<dyn AuthService>> {
    let auth = &config.auth;
    let endpoint = match (&auth.discovery, &config.registry.status_url) {
        (Some(discovery), Some(status_url)) => {
            let client = StatusClient::new(status_url.clone(), auth.request_timeout)?;
            let instance = client.discover(&discovery.service_type, &discovery.strategy).await?;
            let endpoint = endpoint_of(auth.transport, &instance)?;
            info!(
                service_type = %instance.service_type,
                service_id = %instance.service_id,
                endpoint = %endpoint,
                "Resolved auth service through status server"
            );
            endpoint
        }
        (Some(_), None) => {
            return Err(GatewayError::config("auth.discovery requires registry.status_url"));
        }
        (None, _) => configured_endpoint(auth),
    };

    let service: Arc<dyn AuthService> = match auth.transport {
        AuthTransportKind::Grpc => Arc::new(AuthClient::new(GrpcAuthTransport::connect_lazy(
            &endpoint,
            auth.request_timeout,
        )?)),
        AuthTransportKind::Http => Arc::new(AuthClient::new(HttpAuthTransport::new(
            endpoint.clone(),
            auth.request_timeout,
        )?)),
    };
    info!(transport = ?auth.transport, endpoint = %endpoint, "Auth service client ready");
    Ok(service)
}

fn configured_endpoint(auth: &AuthConfig) -> String {
    match auth.transport {
        AuthTransportKind::Grpc => auth.grpc_endpoint.clone(),
        AuthTransportKind::Http => auth.http_base_url.clone(),
    }
}

/// Endpoint URL of a discovered instance for the given transport
pub fn endpoint_of(transport: AuthTransportKind, instance: &ServiceInfo) -> GatewayResult<String> {
    let address = match transport {
        AuthTransportKind::Grpc => instance.grpc_address.as_ref(),
        AuthTransportKind::Http => instance.http_address.as_ref(),
    };
    address
        .map(|address| format!("http://{}", address))
        .ok_or_else(|| {
            GatewayError::config(format!(
                "discovered instance {} has no {:?} address",
                instance.service_id, transport
            ))
        })
}

//! # Registry HTTP Surface
//!
//! Routes served by the registry process:
//!
//! ```text
//! POST /api/service/register      POST /gate/service/register
//! POST /api/service/deregister
//! POST /api/service/heartbeat     POST /gate/service/heartbeat
//! POST /api/discovery/by-tags     POST /gate/discovery/by-tags
//!                                 POST /gate/discovery/verify
//! GET  /api/health
//! ```
//!
//! Every response is an [`ApiResponse`]; the HTTP status mirrors its `code`.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::api::{ApiResponse, DeregisterRequest, DiscoveryRequest, HeartbeatRequest, RegisterRequest};
use super::service_discovery::{find_by_id, SharedRegistry};
use super::service_info::{ServiceInfo, ServiceStatus};
use crate::core::error::{GatewayError, GatewayResult};
use crate::load_balancing::{BalancingStrategy, StrategySet};

/// Service type looked up by `/gate/discovery/verify` when the request names none
const VERIFY_SERVICE_TYPE: &str = "verify";

/// Shared state of the registry HTTP surface
#[derive(Clone)]
pub struct RegistryHttpState {
    pub registry: SharedRegistry,
    pub strategies: Arc<StrategySet>,
    pub default_ttl_secs: i64,
}

impl RegistryHttpState {
    pub fn new(registry: SharedRegistry, default_ttl_secs: i64) -> Self {
        Self {
            registry,
            strategies: Arc::new(StrategySet::new()),
            default_ttl_secs,
        }
    }
}

pub struct RegistryHttpRouter;

impl RegistryHttpRouter {
    pub fn create_router(state: RegistryHttpState) -> Router {
        Router::new()
            .route("/api/service/register", post(register_service))
            .route("/api/service/deregister", post(deregister_service))
            .route("/api/service/heartbeat", post(heartbeat))
            .route("/api/discovery/by-tags", post(discover_service))
            .route("/api/health", get(health))
            .route("/gate/service/register", post(register_service))
            .route("/gate/service/heartbeat", post(heartbeat))
            .route("/gate/discovery/by-tags", post(discover_service))
            .route("/gate/discovery/verify", post(discover_verify_service))
            .with_state(state)
    }
}

/// Reply whose HTTP status follows the body's `code`
struct Reply(ApiResponse);

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0)).into_response()
    }
}

impl From<GatewayError> for Reply {
    fn from(err: GatewayError) -> Self {
        Reply(ApiResponse::new(err.status_code().as_u16(), err.to_string()))
    }
}

fn bad_request(rejection: JsonRejection) -> Reply {
    debug!(error = %rejection, "Rejected registry request body");
    Reply(ApiResponse::new(400, "Invalid request parameters"))
}

/// Resolve the type of a record addressed by id alone
async fn resolve_type(state: &RegistryHttpState, service_id: &str, service_type: Option<String>) -> GatewayResult<String> {
    if let Some(service_type) = service_type.filter(|t| !t.is_empty()) {
        return Ok(service_type);
    }
    find_by_id(state.registry.as_ref(), service_id)
        .await?
        .map(|info| info.service_type)
        .ok_or_else(|| GatewayError::service_not_found("*", service_id))
}

async fn register_service(
    State(state): State<RegistryHttpState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Reply {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection),
    };
    if request.service_type.is_empty() {
        return GatewayError::validation("service_type", "must not be empty").into();
    }

    let service_id = request
        .service_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let info = request.into_service_info(service_id.clone(), state.default_ttl_secs);

    match state.registry.register_service(info).await {
        Ok(()) => Reply(ApiResponse::ok("Service registered successfully").with_service_id(service_id)),
        Err(e) => {
            warn!(service_id = %service_id, error = %e, "Service registration rejected");
            let mut reply = Reply::from(e);
            reply.0.service_id = Some(service_id);
            reply
        }
    }
}

async fn deregister_service(
    State(state): State<RegistryHttpState>,
    body: Result<Json<DeregisterRequest>, JsonRejection>,
) -> Reply {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection),
    };

    let result = remove_record(&state, request).await;

    match result {
        Ok(()) => Reply(ApiResponse::ok("Service deregistered successfully")),
        Err(e) => e.into(),
    }
}

async fn heartbeat(
    State(state): State<RegistryHttpState>,
    body: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Reply {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection),
    };

    let result = renew_record(&state, request).await;

    match result {
        Ok(()) => Reply(ApiResponse::ok("Heartbeat received")),
        Err(e) => e.into(),
    }
}

async fn remove_record(state: &RegistryHttpState, request: DeregisterRequest) -> GatewayResult<()> {
    let service_type = resolve_type(state, &request.service_id, request.service_type).await?;
    state
        .registry
        .deregister_service(&service_type, &request.service_id)
        .await
}

/// Renew liveness and apply the reported status, if any
async fn renew_record(state: &RegistryHttpState, request: HeartbeatRequest) -> GatewayResult<()> {
    let status = request
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<ServiceStatus>)
        .transpose()?;
    let service_type = resolve_type(state, &request.service_id, request.service_type).await?;

    state.registry.keep_alive(&service_type, &request.service_id).await?;
    if let Some(status) = status {
        state
            .registry
            .update_status(&service_type, &request.service_id, status)
            .await?;
    }
    debug!(
        service_type = %service_type,
        service_id = %request.service_id,
        reported_at = ?request.timestamp,
        "Heartbeat received"
    );
    Ok(())
}

/// Pick one live instance of the requested type
async fn select_instance(state: &RegistryHttpState, request: DiscoveryRequest) -> GatewayResult<ServiceInfo> {
    let strategy: BalancingStrategy = request.strategy.parse()?;
    let candidates: Vec<ServiceInfo> = state
        .registry
        .discover_services_by_type(&request.service_name)
        .await?
        .into_iter()
        .filter(|info| {
            request
                .metadata
                .iter()
                .all(|(key, value)| info.metadata.get(key) == Some(value))
        })
        .collect();

    let balancer = state.strategies.get(strategy);
    let index = balancer
        .select_instance(&candidates)
        .ok_or_else(|| GatewayError::service_not_found(&request.service_name, "*"))?;

    candidates.into_iter().nth(index).ok_or_else(|| {
        GatewayError::internal(format!("{} balancer returned an out of range index", balancer.algorithm_name()))
    })
}

async fn discover_service(
    State(state): State<RegistryHttpState>,
    body: Result<Json<DiscoveryRequest>, JsonRejection>,
) -> Reply {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection),
    };
    if request.service_name.is_empty() {
        return GatewayError::validation("service_name", "must not be empty").into();
    }

    match select_instance(&state, request).await {
        Ok(service) => {
            info!(service_type = %service.service_type, service_id = %service.service_id, "Service discovered");
            Reply(ApiResponse::ok("Service discovery successful").with_service(service))
        }
        Err(GatewayError::ServiceNotFound { .. }) => Reply(ApiResponse::new(404, "Service not found")),
        Err(e) => e.into(),
    }
}

async fn discover_verify_service(
    state: State<RegistryHttpState>,
    body: Result<Json<DiscoveryRequest>, JsonRejection>,
) -> Reply {
    let body = body.map(|Json(mut request)| {
        if request.service_name.is_empty() {
            request.service_name = VERIFY_SERVICE_TYPE.to_string();
        }
        Json(request)
    });
    discover_service(state, body).await
}

async fn health(State(state): State<RegistryHttpState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "code": 200,
        "backend": state.registry.backend_name(),
    }))
}

//! # Service Registry Integration Tests
//!
//! Exercise the registry HTTP surface end to end, against both backends, and the
//! `StatusClient` against a live registry server.

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use chat_gateway::discovery::{
    LeaseRegistry, MemoryRegistry, RegisterRequest, RegistryHttpRouter, RegistryHttpState, ServiceRegistry,
    ServiceStatus, SharedRegistry, StatusClient, MAX_TTL_SECONDS,
};
use chat_gateway::store::MemoryStore;
use chat_gateway::GatewayError;

fn server_for(registry: SharedRegistry) -> TestServer {
    let app = RegistryHttpRouter::create_router(RegistryHttpState::new(registry, 60));
    TestServer::new(app).unwrap()
}

fn memory_server() -> (TestServer, SharedRegistry) {
    let registry: SharedRegistry = Arc::new(MemoryRegistry::new());
    (server_for(registry.clone()), registry)
}

fn lease_server() -> (TestServer, SharedRegistry) {
    let registry: SharedRegistry = Arc::new(LeaseRegistry::new(Arc::new(MemoryStore::new()), "service"));
    (server_for(registry.clone()), registry)
}

async fn register(server: &TestServer, body: Value) -> (StatusCode, Value) {
    let response = server.post("/api/service/register").json(&body).await;
    (response.status_code(), response.json())
}

#[tokio::test]
async fn test_register_discover_deregister_lifecycle() {
    for (server, registry) in [memory_server(), lease_server()] {
        let (status, body) = register(
            &server,
            json!({
                "service_name": "verify",
                "service_type": "verify",
                "service_id": "v1",
                "grpc_address": {"host": "10.0.0.5", "port": 50051},
                "ttl": 60
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 200);
        assert_eq!(body["service_id"], "v1");

        let stored = registry.get_service("verify", "v1").await.unwrap();
        assert_eq!(stored.weight, 1);
        assert_eq!(stored.status, ServiceStatus::Online);

        let response = server
            .post("/api/discovery/by-tags")
            .json(&json!({"service_name": "verify", "strategy": "load"}))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["service"]["service_id"], "v1");
        assert_eq!(body["service"]["grpc_address"]["port"], 50051);

        let response = server
            .post("/api/service/deregister")
            .json(&json!({"service_id": "v1"}))
            .await;
        response.assert_status_ok();

        let response = server
            .post("/api/discovery/by-tags")
            .json(&json!({"service_name": "verify"}))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        let body: Value = response.json();
        assert_eq!(body["message"], "Service not found");
    }
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    for (server, _registry) in [memory_server(), lease_server()] {
        let request = json!({"service_type": "msg", "service_id": "m1"});
        assert_eq!(register(&server, request.clone()).await.0, StatusCode::OK);

        let (status, body) = register(&server, request).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], 409);
        assert_eq!(body["service_id"], "m1");
    }
}

#[tokio::test]
async fn test_out_of_range_ttl_is_rejected() {
    for (server, registry) in [memory_server(), lease_server()] {
        for ttl in [i64::MAX, MAX_TTL_SECONDS + 1] {
            let (status, body) = register(
                &server,
                json!({"service_type": "verify", "service_id": "v1", "ttl": ttl}),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["code"], 400);
        }
        assert!(registry.discover_services_by_type("verify").await.unwrap().is_empty());

        let (status, _) = register(
            &server,
            json!({"service_type": "verify", "service_id": "v1", "ttl": MAX_TTL_SECONDS}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(registry.discover_services_by_type("verify").await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_register_without_id_mints_one() {
    let (server, registry) = memory_server();
    let (status, body) = register(&server, json!({"service_type": "push", "enable": true})).await;
    assert_eq!(status, StatusCode::OK);

    let service_id = body["service_id"].as_str().unwrap();
    assert!(!service_id.is_empty());
    let stored = registry.get_service("push", service_id).await.unwrap();
    assert_eq!(stored.status, ServiceStatus::Active);
    assert_eq!(stored.service_name, "push");
}

#[tokio::test]
async fn test_malformed_bodies_are_bad_requests() {
    let (server, _registry) = memory_server();

    let response = server
        .post("/api/service/register")
        .text("{broken")
        .content_type("application/json")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["message"], "Invalid request parameters");

    let (status, _) = register(&server, json!({"service_type": ""})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let response = server
        .post("/api/discovery/by-tags")
        .json(&json!({"service_name": "verify", "strategy": "fastest"}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_heartbeat_updates_status() {
    for (server, registry) in [memory_server(), lease_server()] {
        register(&server, json!({"service_type": "verify", "service_id": "v1"})).await;

        let response = server
            .post("/api/service/heartbeat")
            .json(&json!({"service_id": "v1", "status": "inactive", "timestamp": 1_700_000_000}))
            .await;
        response.assert_status_ok();
        let stored = registry.get_service("verify", "v1").await.unwrap();
        assert_eq!(stored.status, ServiceStatus::Inactive);

        let response = server
            .post("/api/service/heartbeat")
            .json(&json!({"service_id": "v1", "status": "sleeping"}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);

        let response = server
            .post("/api/service/heartbeat")
            .json(&json!({"service_id": "nope"}))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn test_discovery_honors_metadata_filter_and_load() {
    let (server, _registry) = memory_server();
    register(
        &server,
        json!({"service_type": "msg", "service_id": "busy", "metadata": {"load": "90", "max_load": "100", "zone": "a"}}),
    )
    .await;
    register(
        &server,
        json!({"service_type": "msg", "service_id": "idle", "metadata": {"load": "10", "max_load": "100", "zone": "b"}}),
    )
    .await;

    let body: Value = server
        .post("/api/discovery/by-tags")
        .json(&json!({"service_name": "msg", "strategy": "load"}))
        .await
        .json();
    assert_eq!(body["service"]["service_id"], "idle");

    let body: Value = server
        .post("/api/discovery/by-tags")
        .json(&json!({"service_name": "msg", "strategy": "load", "metadata": {"zone": "a"}}))
        .await
        .json();
    assert_eq!(body["service"]["service_id"], "busy");
}

#[tokio::test]
async fn test_gate_aliases_and_health() {
    let (server, _registry) = lease_server();
    let response = server
        .post("/gate/service/register")
        .json(&json!({"service_type": "verify", "service_id": "v9"}))
        .await;
    response.assert_status_ok();

    let body: Value = server.post("/gate/discovery/verify").json(&json!({})).await.json();
    assert_eq!(body["service"]["service_id"], "v9");

    let body: Value = server.get("/api/health").await.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["backend"], "lease");
}

#[tokio::test]
async fn test_status_client_against_live_registry() {
    let registry: SharedRegistry = Arc::new(MemoryRegistry::new());
    let app = RegistryHttpRouter::create_router(RegistryHttpState::new(registry.clone(), 60));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });

    let client = StatusClient::new(format!("http://{}/", addr), Duration::from_secs(2)).unwrap();

    let request = RegisterRequest {
        service_type: "verify".to_string(),
        service_id: Some("v1".to_string()),
        weight: 3,
        ..Default::default()
    };
    let service_id = tokio_test::assert_ok!(client.register(&request).await);
    assert_eq!(service_id, "v1");
    assert!(matches!(
        client.register(&request).await,
        Err(GatewayError::ServiceAlreadyExists { .. })
    ));

    client
        .heartbeat("v1", None, Some(ServiceStatus::Active))
        .await
        .unwrap();
    let found = client.discover("verify", "weighted").await.unwrap();
    assert_eq!(found.service_id, "v1");
    assert_eq!(found.weight, 3);
    assert_eq!(found.status, ServiceStatus::Active);

    client.deregister("v1", Some("verify")).await.unwrap();
    assert!(matches!(
        client.discover("verify", "").await,
        Err(GatewayError::ServiceNotFound { .. })
    ));
    assert!(matches!(
        client.heartbeat("v1", None, None).await,
        Err(GatewayError::ServiceNotFound { .. })
    ));
}

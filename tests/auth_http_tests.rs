//! # Upstream HTTP Client Tests
//!
//! The HTTP+JSON auth binding and the status server client, each against a `wiremock`
//! server standing in for the real collaborator.

use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chat_gateway::auth::{create_auth_service, AuthClient, AuthService, HttpAuthTransport, NO_CREDENTIALS};
use chat_gateway::core::config::{AuthDiscoveryConfig, AuthTransportKind, GatewayConfig};
use chat_gateway::discovery::StatusClient;
use chat_gateway::GatewayError;

fn http_client(server: &MockServer) -> AuthClient<HttpAuthTransport> {
    AuthClient::new(HttpAuthTransport::new(server.uri(), Duration::from_secs(2)).unwrap())
}

#[tokio::test]
async fn test_token_is_verified_as_jwt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/gate/user-auth/verify-jwt"))
        .and(body_json(json!({"jwtToken": "tok"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "valid": true,
            "userId": 42,
            "deviceId": "phoneA"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = http_client(&server)
        .validate_token_or_session("tok", "sess-ignored", "frame-device")
        .await
        .unwrap();
    assert!(result.valid);
    assert_eq!(result.user_id, 42);
    assert_eq!(result.device_id, "phoneA");
}

#[tokio::test]
async fn test_session_is_verified_when_no_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/gate/user-auth/verify-session"))
        .and(body_json(json!({"sessionId": "s1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"valid": true, "userId": 7})))
        .expect(1)
        .mount(&server)
        .await;

    let result = http_client(&server)
        .validate_token_or_session("", "s1", "tablet")
        .await
        .unwrap();
    assert!(result.valid);
    assert_eq!(result.user_id, 7);
    assert_eq!(result.device_id, "tablet");
}

#[tokio::test]
async fn test_missing_credentials_never_reach_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let result = http_client(&server).validate_token_or_session("", "", "d").await.unwrap();
    assert!(!result.valid);
    assert_eq!(result.error, NO_CREDENTIALS);
}

#[tokio::test]
async fn test_rejection_and_refresh_replies() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/gate/user-auth/verify-jwt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"valid": false, "error": "expired"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/gate/user-auth/refresh-session"))
        .and(body_json(json!({"sessionId": "s1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": false, "error": "unknown session"})))
        .mount(&server)
        .await;

    let client = http_client(&server);
    let result = client.validate_token_or_session("old", "", "d").await.unwrap();
    assert!(!result.valid);
    assert_eq!(result.error, "expired");

    let refreshed = client.refresh_session("s1").await.unwrap();
    assert!(!refreshed.success);
    assert_eq!(refreshed.error, "unknown session");
}

#[tokio::test]
async fn test_server_error_is_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = http_client(&server)
        .validate_token_or_session("tok", "", "d")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Upstream { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_status_client_reads_code_from_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/discovery/by-tags"))
        .and(body_json(json!({"service_name": "verify", "strategy": "load"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 404, "message": "Service not found"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/service/heartbeat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 500, "message": "store down"})))
        .mount(&server)
        .await;

    let client = StatusClient::new(server.uri(), Duration::from_secs(2)).unwrap();
    assert!(matches!(
        client.discover("verify", "load").await,
        Err(GatewayError::ServiceNotFound { .. })
    ));
    assert!(matches!(
        client.heartbeat("v1", Some("verify"), None).await,
        Err(GatewayError::Upstream { .. })
    ));
}

#[tokio::test]
async fn test_auth_endpoint_resolved_through_status_server() {
    let server = MockServer::start().await;
    let address = server.address();

    Mock::given(method("POST"))
        .and(path("/api/discovery/by-tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 200,
            "message": "Service discovery successful",
            "service": {
                "service_type": "verify",
                "service_id": "v1",
                "ttl_seconds": 60,
                "http_address": {"host": address.ip().to_string(), "port": address.port()}
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/gate/user-auth/verify-jwt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"valid": true, "userId": 5})))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = GatewayConfig::default();
    config.auth.transport = AuthTransportKind::Http;
    config.auth.http_base_url = "http://127.0.0.1:1".to_string();
    config.auth.discovery = Some(AuthDiscoveryConfig {
        service_type: "verify".to_string(),
        strategy: "load".to_string(),
    });
    config.registry.status_url = Some(server.uri());

    let auth = create_auth_service(&config).await.unwrap();
    let result = auth.validate_token_or_session("tok", "", "web").await.unwrap();
    assert!(result.valid);
    assert_eq!(result.user_id, 5);
}

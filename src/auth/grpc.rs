//! gRPC binding of the auth collaborator.
//!
//! The service is small enough that the client is written against `tonic::client::Grpc`
//! directly, with the messages declared by hand instead of generated from a `.proto`.

use async_trait::async_trait;
use std::time::Duration;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};

use super::providers::{AuthTransport, JwtVerdict, RefreshResult, SessionVerdict};
use crate::core::error::{GatewayError, GatewayResult};

#[derive(Clone, PartialEq, prost::Message)]
pub struct VerifyJwtRequest {
    #[prost(string, tag = "1")]
    pub jwt_token: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct VerifyJwtResponse {
    #[prost(bool, tag = "1")]
    pub valid: bool,
    #[prost(uint64, tag = "2")]
    pub user_id: u64,
    #[prost(string, tag = "3")]
    pub device_id: String,
    #[prost(string, tag = "4")]
    pub error: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct VerifySessionRequest {
    #[prost(string, tag = "1")]
    pub session_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct VerifySessionResponse {
    #[prost(bool, tag = "1")]
    pub valid: bool,
    #[prost(uint64, tag = "2")]
    pub user_id: u64,
    #[prost(string, tag = "3")]
    pub error: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RefreshSessionRequest {
    #[prost(string, tag = "1")]
    pub session_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RefreshSessionResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub error: String,
}

const VERIFY_JWT: &str = "/auth.Auth/VerifyJWT";
const VERIFY_SESSION: &str = "/auth.Auth/VerifySession";
const REFRESH_SESSION: &str = "/auth.Auth/RefreshSession";

/// Unary calls against the `auth.Auth` service
#[derive(Debug, Clone)]
pub struct GrpcAuthTransport {
    channel: Channel,
}

impl GrpcAuthTransport {
    /// Create a lazily connecting client; nothing is dialed until the first call
    pub fn connect_lazy(endpoint: &str, timeout: Duration) -> GatewayResult<Self> {
        let channel = Endpoint::from_shared(endpoint.to_string())
            .map_err(|e| GatewayError::config(format!("Invalid auth gRPC endpoint '{}': {}", endpoint, e)))?
            .timeout(timeout)
            .connect_timeout(timeout)
            .connect_lazy();
        Ok(Self { channel })
    }

    async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> GatewayResult<Resp>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| GatewayError::upstream("auth-grpc", format!("service not ready: {}", e)))?;

        let response = grpc
            .unary(
                tonic::Request::new(request),
                PathAndQuery::from_static(path),
                ProstCodec::<Req, Resp>::default(),
            )
            .await?;
        Ok(response.into_inner())
    }
}

#[async_trait]
impl AuthTransport for GrpcAuthTransport {
    async fn verify_jwt(&self, token: &str) -> GatewayResult<JwtVerdict> {
        let reply: VerifyJwtResponse = self
            .unary(
                VERIFY_JWT,
                VerifyJwtRequest {
                    jwt_token: token.to_string(),
                },
            )
            .await?;
        Ok(JwtVerdict {
            valid: reply.valid,
            user_id: reply.user_id,
            device_id: reply.device_id,
            error: reply.error,
        })
    }

    async fn verify_session(&self, session_id: &str) -> GatewayResult<SessionVerdict> {
        let reply: VerifySessionResponse = self
            .unary(
                VERIFY_SESSION,
                VerifySessionRequest {
                    session_id: session_id.to_string(),
                },
            )
            .await?;
        Ok(SessionVerdict {
            valid: reply.valid,
            user_id: reply.user_id,
            error: reply.error,
        })
    }

    async fn refresh_session(&self, session_id: &str) -> GatewayResult<RefreshResult> {
        let reply: RefreshSessionResponse = self
            .unary(
                REFRESH_SESSION,
                RefreshSessionRequest {
                    session_id: session_id.to_string(),
                },
            )
            .await?;
        Ok(RefreshResult {
            success: reply.success,
            error: reply.error,
        })
    }

    fn transport_name(&self) -> &'static str {
        "grpc"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_message_encoding_uses_declared_tags() {
        let request = VerifyJwtRequest {
            jwt_token: "abc".to_string(),
        };
        // field 1, wire type 2 (length-delimited)
        assert_eq!(request.encode_to_vec(), vec![0x0a, 3, b'a', b'b', b'c']);

        let reply = VerifySessionResponse {
            valid: true,
            user_id: 42,
            error: String::new(),
        };
        let decoded = VerifySessionResponse::decode(reply.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, reply);
    }

    #[tokio::test]
    async fn test_invalid_endpoint_is_configuration_error() {
        let err = GrpcAuthTransport::connect_lazy("not a uri", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));
    }
}

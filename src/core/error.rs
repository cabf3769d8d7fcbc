//! # Error Handling Module
//!
//! Every failure the gateway and the registry can produce is a variant of [`GatewayError`].
//! The variants follow the failure classes the platform distinguishes:
//!
//! - protocol errors: malformed or out-of-sequence frames
//! - transport errors: read/write failures on a client connection (always fatal to it)
//! - registry errors: missing or duplicate connections and service records
//! - lock errors: a lock that could not be taken, or released by a non-owner
//! - upstream errors: the auth collaborator or the status server misbehaving
//!
//! ## Rust Concepts Used
//!
//! - `thiserror` derives `Display` and `std::error::Error` from the `#[error]` attributes
//! - `From` implementations let `?` convert library errors at the call site
//! - `status_code` gives the HTTP status the registry surface answers with

use axum::http::StatusCode;
use thiserror::Error;

/// Result type used throughout the crate
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Crate-wide error type
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// Configuration-related errors (invalid config, missing files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Malformed or out-of-sequence frame
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Read or write failure on a client transport
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// No live connection is registered under the id
    #[error("Connection not found: {conn_id}")]
    ConnectionNotFound { conn_id: String },

    /// The connection is closed or its outbound queue cannot take more frames
    #[error("Connection closed")]
    ConnectionClosed,

    /// No live service record exists for the key
    #[error("Service not found: {service_type}/{service_id}")]
    ServiceNotFound {
        service_type: String,
        service_id: String,
    },

    /// A service record already exists for the key
    #[error("Service already exists: {service_type}/{service_id}")]
    ServiceAlreadyExists {
        service_type: String,
        service_id: String,
    },

    /// The lock key is currently held by someone else
    #[error("Lock not acquired: {key}")]
    LockNotAcquired { key: String },

    /// The stored lock token does not belong to this holder
    #[error("Lock is not owned by this holder: {key}")]
    LockNotOwned { key: String },

    /// The auth collaborator answered negatively
    #[error("Authentication failed: {reason}")]
    Authentication { reason: String },

    /// An upstream collaborator could not be reached or answered with garbage
    #[error("Upstream error ({service}): {message}")]
    Upstream { service: String, message: String },

    /// An operation did not finish before its deadline
    #[error("Timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Request validation errors (bad ids, missing fields, etc.)
    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },

    /// External key/value store failures
    #[error("Store error: {message}")]
    Store { message: String },

    /// Internal server errors for unexpected failures
    #[error("Internal server error: {message}")]
    Internal { message: String },

    /// I/O errors (file operations, sockets, etc.)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },

    /// HTTP client errors when calling collaborators
    #[error("HTTP client error: {message}")]
    HttpClient { message: String },
}

impl GatewayError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a protocol error with a custom message
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a transport error with a custom message
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create an authentication error with a custom reason
    pub fn auth<S: Into<String>>(reason: S) -> Self {
        Self::Authentication {
            reason: reason.into(),
        }
    }

    /// Create an upstream error for the named collaborator
    pub fn upstream<S: Into<String>, M: Into<String>>(service: S, message: M) -> Self {
        Self::Upstream {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Create a validation error for a field
    pub fn validation<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn service_not_found<T: Into<String>, I: Into<String>>(service_type: T, service_id: I) -> Self {
        Self::ServiceNotFound {
            service_type: service_type.into(),
            service_id: service_id.into(),
        }
    }

    pub fn service_exists<T: Into<String>, I: Into<String>>(service_type: T, service_id: I) -> Self {
        Self::ServiceAlreadyExists {
            service_type: service_type.into(),
            service_id: service_id.into(),
        }
    }

    /// Create a timeout error from the elapsed deadline
    pub fn timeout(deadline: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: deadline.as_millis() as u64,
        }
    }

    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Protocol { .. } => StatusCode::BAD_REQUEST,
            Self::Transport { .. } => StatusCode::BAD_GATEWAY,
            Self::ConnectionNotFound { .. } => StatusCode::NOT_FOUND,
            Self::ConnectionClosed => StatusCode::GONE,
            Self::ServiceNotFound { .. } => StatusCode::NOT_FOUND,
            Self::ServiceAlreadyExists { .. } => StatusCode::CONFLICT,
            Self::LockNotAcquired { .. } => StatusCode::CONFLICT,
            Self::LockNotOwned { .. } => StatusCode::CONFLICT,
            Self::Authentication { .. } => StatusCode::UNAUTHORIZED,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Store { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Json { .. } => StatusCode::BAD_REQUEST,
            Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::HttpClient { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Check if the caller may retry the operation
    ///
    /// Discovery and auth calls are never retried internally; callers use this
    /// to decide whether another attempt is worthwhile.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Upstream { .. }
                | Self::Timeout { .. }
                | Self::Store { .. }
                | Self::HttpClient { .. }
                | Self::Io { .. }
                | Self::LockNotAcquired { .. }
        )
    }

    /// Get a string representation of the error type for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::Protocol { .. } => "protocol_error",
            Self::Transport { .. } => "transport_error",
            Self::ConnectionNotFound { .. } => "connection_not_found",
            Self::ConnectionClosed => "connection_closed",
            Self::ServiceNotFound { .. } => "service_not_found",
            Self::ServiceAlreadyExists { .. } => "service_already_exists",
            Self::LockNotAcquired { .. } => "lock_not_acquired",
            Self::LockNotOwned { .. } => "lock_not_owned",
            Self::Authentication { .. } => "authentication_error",
            Self::Upstream { .. } => "upstream_error",
            Self::Timeout { .. } => "timeout",
            Self::Validation { .. } => "validation_error",
            Self::Store { .. } => "store_error",
            Self::Internal { .. } => "internal_error",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
            Self::HttpClient { .. } => "http_client_error",
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::HttpClient {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for GatewayError {
    fn from(err: redis::RedisError) -> Self {
        Self::Store {
            message: err.to_string(),
        }
    }
}

impl From<tonic::Status> for GatewayError {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::DeadlineExceeded => Self::Timeout { timeout_ms: 0 },
            code => Self::Upstream {
                service: "auth-grpc".to_string(),
                message: format!("{:?}: {}", code, status.message()),
            },
        }
    }
}

impl From<axum::Error> for GatewayError {
    fn from(err: axum::Error) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            GatewayError::service_exists("verify", "v1").status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            GatewayError::service_not_found("verify", "v1").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(GatewayError::auth("bad token").status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(GatewayError::upstream("status", "connection refused").is_retryable());
        assert!(GatewayError::timeout(std::time::Duration::from_secs(5)).is_retryable());
        assert!(GatewayError::LockNotAcquired { key: "k".into() }.is_retryable());
        assert!(!GatewayError::LockNotOwned { key: "k".into() }.is_retryable());
        assert!(!GatewayError::ConnectionClosed.is_retryable());
    }

    #[test]
    fn test_grpc_status_conversion() {
        let err: GatewayError = tonic::Status::unavailable("down").into();
        assert_eq!(err.error_type(), "upstream_error");
        assert!(err.to_string().contains("down"));
    }

    #[test]
    fn test_websocket_error_is_transport() {
        let err: GatewayError = axum::Error::new(std::io::Error::from(std::io::ErrorKind::BrokenPipe)).into();
        assert_eq!(err.error_type(), "transport_error");
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(!err.is_retryable());
    }
}

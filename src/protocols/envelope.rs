//! # Message Envelope
//!
//! Every frame exchanged with a client is a JSON object whose `type` selects the handler.
//!
//! ```json
//! {"type": "auth", "token": "...", "session_id": "...", "device_id": "...", "body": {}}
//! ```
//!
//! Reserved types: `auth` (first frame only), `ping` / `pong`, and the server-sent
//! `auth_ack` / `auth_nack`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::core::error::{GatewayError, GatewayResult};

pub const TYPE_AUTH: &str = "auth";
pub const TYPE_AUTH_ACK: &str = "auth_ack";
pub const TYPE_AUTH_NACK: &str = "auth_nack";
pub const TYPE_PING: &str = "ping";
pub const TYPE_PONG: &str = "pong";
pub const TYPE_UNKNOWN: &str = "unknown_message_type";
pub const TYPE_ERROR: &str = "error";

/// Client to gateway frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Map<String, Value>>,
}

impl Envelope {
    pub fn new(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            ..Default::default()
        }
    }

    /// Decode a frame; anything that is not an envelope is a protocol error
    pub fn parse(frame: &[u8]) -> GatewayResult<Self> {
        serde_json::from_slice(frame).map_err(|e| GatewayError::protocol(format!("malformed envelope: {}", e)))
    }

    pub fn token(&self) -> &str {
        self.token.as_deref().unwrap_or_default()
    }

    pub fn session_id(&self) -> &str {
        self.session_id.as_deref().unwrap_or_default()
    }

    pub fn device_id(&self) -> &str {
        self.device_id.as_deref().unwrap_or_default()
    }

    /// String field of `body`, if present
    pub fn body_str(&self, key: &str) -> Option<&str> {
        self.body.as_ref()?.get(key)?.as_str()
    }

    pub fn is_auth(&self) -> bool {
        self.msg_type == TYPE_AUTH
    }
}

/// Server to client frames
pub mod reply {
    use super::*;

    pub fn auth_ack(conn_id: &str, session_ttl: u64, server_time: i64) -> Value {
        json!({
            "type": TYPE_AUTH_ACK,
            "conn_id": conn_id,
            "session_ttl": session_ttl,
            "server_time": server_time,
        })
    }

    pub fn auth_nack(reason: &str) -> Value {
        json!({ "type": TYPE_AUTH_NACK, "reason": reason })
    }

    pub fn pong() -> Value {
        json!({ "type": TYPE_PONG })
    }

    pub fn unknown_type(msg_type: &str) -> Value {
        json!({
            "type": TYPE_UNKNOWN,
            "message": format!("unknown message type: {}", msg_type),
        })
    }

    pub fn error(request_type: &str, message: &str) -> Value {
        json!({
            "type": TYPE_ERROR,
            "request_type": request_type,
            "message": message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_auth_frame() {
        let envelope =
            Envelope::parse(br#"{"type":"auth","token":"t","device_id":"phoneA","body":{"k":"v"}}"#).unwrap();
        assert!(envelope.is_auth());
        assert_eq!(envelope.token(), "t");
        assert_eq!(envelope.session_id(), "");
        assert_eq!(envelope.device_id(), "phoneA");
        assert_eq!(envelope.body_str("k"), Some("v"));
    }

    #[test]
    fn test_parse_rejects_missing_type() {
        assert!(Envelope::parse(br#"{"token":"t"}"#).is_err());
        let err = Envelope::parse(b"not json").unwrap_err();
        assert_eq!(err.error_type(), "protocol_error");
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let json = serde_json::to_string(&Envelope::new("ping")).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }

    #[test]
    fn test_reply_shapes() {
        let ack = reply::auth_ack("gate-1#abc", 300, 1_700_000_000);
        assert_eq!(ack["type"], "auth_ack");
        assert_eq!(ack["conn_id"], "gate-1#abc");
        assert_eq!(ack["session_ttl"], 300);

        let unknown = reply::unknown_type("chat");
        assert_eq!(unknown["message"], "unknown message type: chat");
    }
}

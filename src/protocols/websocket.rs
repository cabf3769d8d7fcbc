//! # WebSocket Connection Handling
//!
//! Drives one client connection through its lifecycle:
//!
//! ```text
//! Connecting -> Authenticating -> Active -> Closing -> Closed
//! ```
//!
//! The first frame must be an `auth` envelope, read and validated under `auth_timeout`.
//! Nothing is registered until the auth service accepts it, so a failed handshake never
//! leaves a registry entry behind. Once active the socket is split between two pumps:
//!
//! - the inbound pump reads frames under a rolling `pong_wait` deadline, answers `ping`
//!   envelopes directly and hands everything else to the [`MessageRouter`];
//! - the outbound pump drains the session queue, emits a ping control frame every
//!   `ping_period` and writes the close frame once the session is closed.
//!
//! Either pump exiting on a transport failure closes the session, which stops the other.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use super::envelope::{reply, Envelope, TYPE_AUTH, TYPE_PING, TYPE_PONG};
use crate::auth::AuthService;
use crate::core::config::WebSocketConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{ConnectionId, UserId};
use crate::gateway::connections::ConnectionRegistry;
use crate::gateway::session::GatewaySession;
use crate::observability::metrics::{CONNECTIONS_TOTAL, FRAMES_IN_TOTAL, HANDSHAKE_FAILURES_TOTAL};
use crate::routing::MessageRouter;

pub const NACK_INVALID_FORMAT: &str = "invalid format";
pub const NACK_AUTH_FAILED: &str = "auth failed";
pub const NACK_AUTH_TIMEOUT: &str = "auth timeout";

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Identity established by a successful handshake
#[derive(Debug, Clone, PartialEq)]
struct Authenticated {
    user_id: UserId,
    device_id: String,
}

/// `auth_nack` reason for a failed handshake; `None` when the client is already gone
fn nack_reason(err: &GatewayError) -> Option<&'static str> {
    match err {
        GatewayError::Transport { .. } => None,
        GatewayError::Protocol { .. } => Some(NACK_INVALID_FORMAT),
        GatewayError::Timeout { .. } => Some(NACK_AUTH_TIMEOUT),
        _ => Some(NACK_AUTH_FAILED),
    }
}

/// Why a pump stopped on its own
struct PumpExit {
    reason: &'static str,
    error: Option<GatewayError>,
}

impl PumpExit {
    fn clean(reason: &'static str) -> Self {
        Self { reason, error: None }
    }

    fn failed(reason: &'static str, error: GatewayError) -> Self {
        Self {
            reason,
            error: Some(error),
        }
    }

    fn close(self, session: &GatewaySession) {
        if let Some(err) = &self.error {
            debug!(
                conn_id = %session.id(),
                reason = self.reason,
                error_type = err.error_type(),
                error = %err,
                "Connection failed"
            );
        }
        session.close(self.reason);
    }
}

/// Accepts upgrades and runs the per-connection state machine
pub struct WebSocketHandler {
    gate_id: String,
    config: WebSocketConfig,
    connections: Arc<ConnectionRegistry>,
    router: Arc<MessageRouter>,
    auth: Arc<dyn AuthService>,
}

impl WebSocketHandler {
    pub fn new(
        gate_id: impl Into<String>,
        config: WebSocketConfig,
        connections: Arc<ConnectionRegistry>,
        router: Arc<MessageRouter>,
        auth: Arc<dyn AuthService>,
    ) -> Self {
        Self {
            gate_id: gate_id.into(),
            config,
            connections,
            router,
            auth,
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    /// Complete the HTTP upgrade and hand the socket to [`serve`](Self::serve)
    pub fn handle_upgrade(self: Arc<Self>, ws: WebSocketUpgrade) -> Response {
        let max = self.config.max_message_size;
        ws.max_message_size(max)
            .max_frame_size(max)
            .on_upgrade(move |socket| async move { self.serve(socket).await })
    }

    /// Run one connection to completion
    #[instrument(skip_all, fields(gate_id = %self.gate_id, conn_id))]
    pub async fn serve(self: Arc<Self>, socket: WebSocket) {
        let (mut sink, mut stream) = socket.split();

        let outcome = match timeout(self.config.auth_timeout, self.handshake(&mut stream)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(GatewayError::timeout(self.config.auth_timeout)),
        };

        let identity = match outcome {
            Ok(identity) => identity,
            Err(err) => {
                self.reject(&mut sink, err).await;
                return;
            }
        };

        let conn_id = ConnectionId::generate(&self.gate_id);
        tracing::Span::current().record("conn_id", conn_id.as_str());

        let (session, outbound) = GatewaySession::new(
            conn_id,
            identity.user_id,
            identity.device_id,
            self.config.outbound_queue_size,
            Arc::downgrade(&self.connections),
        );
        self.connections.register(session.clone());
        counter!(CONNECTIONS_TOTAL).increment(1);

        let ack = reply::auth_ack(
            session.id().as_str(),
            self.config.session_ttl_secs,
            chrono::Utc::now().timestamp(),
        );
        if let Err(e) = session.send_json(&ack) {
            warn!(error = %e, "Could not queue auth ack");
            session.close("ack not delivered");
        }

        info!(
            conn_id = %session.id(),
            user_id = session.user_id(),
            device_id = %session.device_id(),
            "Connection authenticated"
        );

        tokio::join!(
            self.inbound_pump(session.clone(), stream),
            outbound_pump(session.clone(), sink, outbound, self.config.clone()),
        );

        debug!(conn_id = %session.id(), state = ?session.state(), "Connection finished");
    }

    /// Read the first data frame and validate it with the auth service
    async fn handshake(&self, stream: &mut WsStream) -> GatewayResult<Authenticated> {
        let frame = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => break text.into_bytes(),
                Some(Ok(Message::Binary(bytes))) => break bytes,
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => {
                    return Err(GatewayError::transport("closed before authenticating"));
                }
                Some(Err(e)) => return Err(e.into()),
            }
        };

        let envelope = Envelope::parse(&frame)?;
        if envelope.msg_type != TYPE_AUTH {
            return Err(GatewayError::protocol(format!(
                "expected an auth frame, got '{}'",
                envelope.msg_type
            )));
        }

        let result = self
            .auth
            .validate_token_or_session(envelope.token(), envelope.session_id(), envelope.device_id())
            .await
            .map_err(|e| {
                warn!(error = %e, error_type = e.error_type(), "Auth service call failed");
                GatewayError::auth(e.to_string())
            })?;

        if !result.valid {
            return Err(GatewayError::auth(result.error));
        }

        let device_id = if result.device_id.is_empty() {
            envelope.device_id().to_string()
        } else {
            result.device_id
        };
        Ok(Authenticated {
            user_id: result.user_id,
            device_id,
        })
    }

    async fn reject(&self, sink: &mut WsSink, err: GatewayError) {
        let nack = nack_reason(&err);
        let reason = nack.unwrap_or("disconnected");
        counter!(HANDSHAKE_FAILURES_TOTAL, "reason" => reason).increment(1);
        info!(reason = %reason, error_type = err.error_type(), error = %err, "Handshake rejected");

        if let Some(reason) = nack {
            let nack = reply::auth_nack(reason).to_string();
            let write_wait = self.config.write_wait;
            let _ = timeout(write_wait, sink.send(Message::Text(nack))).await;
            let _ = timeout(write_wait, sink.send(close_frame(close_code::POLICY, reason))).await;
        }
        let _ = timeout(self.config.write_wait, sink.close()).await;
    }

    async fn inbound_pump(&self, session: Arc<GatewaySession>, mut stream: WsStream) {
        let _pump = session.enter_pump();
        let closed = session.close_signal();
        let pong_wait = self.config.pong_wait;

        let exit = loop {
            let next = tokio::select! {
                _ = closed.cancelled() => break None,
                next = timeout(pong_wait, stream.next()) => next,
            };

            let frame = match next {
                Err(_) => break Some(PumpExit::failed("read timeout", GatewayError::timeout(pong_wait))),
                Ok(None) => {
                    break Some(PumpExit::failed(
                        "connection lost",
                        GatewayError::transport("stream ended without a close frame"),
                    ))
                }
                Ok(Some(Err(e))) => break Some(PumpExit::failed("read error", e.into())),
                Ok(Some(Ok(message))) => message,
            };

            let bytes = match frame {
                Message::Text(text) => text.into_bytes(),
                Message::Binary(bytes) => bytes,
                // control frames only push the deadline forward
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(_) => break Some(PumpExit::clean("client closed")),
            };
            counter!(FRAMES_IN_TOTAL).increment(1);

            let envelope = match Envelope::parse(&bytes) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(
                        conn_id = %session.id(),
                        error_type = e.error_type(),
                        error = %e,
                        "Dropping malformed frame"
                    );
                    continue;
                }
            };

            match envelope.msg_type.as_str() {
                TYPE_PING => {
                    let _ = session.send_json(&reply::pong());
                }
                TYPE_PONG => {}
                TYPE_AUTH => {
                    warn!(conn_id = %session.id(), "Ignoring auth frame on authenticated connection");
                }
                _ => self.router.route(&session, &envelope).await,
            }
        };

        if let Some(exit) = exit {
            exit.close(&session);
        }
    }
}

async fn outbound_pump(
    session: Arc<GatewaySession>,
    mut sink: WsSink,
    mut queue: mpsc::Receiver<Vec<u8>>,
    config: WebSocketConfig,
) {
    let _pump = session.enter_pump();
    let closed = session.close_signal();
    let write_wait = config.write_wait;

    let mut heartbeat = interval_at(Instant::now() + config.ping_period, config.ping_period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            _ = closed.cancelled() => {
                // frames queued before the close still go out ahead of the close frame
                while let Ok(bytes) = queue.try_recv() {
                    if let Err(e) = write(&mut sink, data_frame(bytes), write_wait).await {
                        debug!(
                            conn_id = %session.id(),
                            error_type = e.error_type(),
                            error = %e,
                            "Flush before close failed"
                        );
                        break;
                    }
                }
                let reason = session.close_reason().unwrap_or_default();
                let _ = write(&mut sink, close_frame(close_code::NORMAL, &reason), write_wait).await;
                break None;
            }
            next = queue.recv() => {
                let Some(bytes) = next else { break Some(PumpExit::clean("outbound queue closed")) };
                if let Err(e) = write(&mut sink, data_frame(bytes), write_wait).await {
                    break Some(PumpExit::failed("write error", e));
                }
            }
            _ = heartbeat.tick() => {
                if let Err(e) = write(&mut sink, Message::Ping(Vec::new()), write_wait).await {
                    break Some(PumpExit::failed("ping failed", e));
                }
            }
        }
    };

    if let Some(exit) = exit {
        exit.close(&session);
    }
    let _ = timeout(write_wait, sink.close()).await;
}

/// Write one frame within `deadline`
async fn write(sink: &mut WsSink, message: Message, deadline: Duration) -> GatewayResult<()> {
    match timeout(deadline, sink.send(message)).await {
        Ok(sent) => sent.map_err(GatewayError::from),
        Err(_) => Err(GatewayError::timeout(deadline)),
    }
}

/// Text frame for UTF-8 payloads, binary otherwise
fn data_frame(bytes: Vec<u8>) -> Message {
    match String::from_utf8(bytes) {
        Ok(text) => Message::Text(text),
        Err(e) => Message::Binary(e.into_bytes()),
    }
}

fn close_frame(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_errors_map_to_nack_reasons() {
        assert_eq!(nack_reason(&GatewayError::transport("gone")), None);
        assert_eq!(
            nack_reason(&Envelope::parse(b"{").unwrap_err()),
            Some(NACK_INVALID_FORMAT)
        );
        assert_eq!(
            nack_reason(&GatewayError::timeout(Duration::from_secs(10))),
            Some(NACK_AUTH_TIMEOUT)
        );
        assert_eq!(nack_reason(&GatewayError::auth("invalid token")), Some(NACK_AUTH_FAILED));
        assert_eq!(
            nack_reason(&GatewayError::upstream("auth-http", "503")),
            Some(NACK_AUTH_FAILED)
        );
    }

    #[test]
    fn test_data_frame_kind_follows_payload() {
        assert!(matches!(data_frame(b"{}".to_vec()), Message::Text(text) if text == "{}"));
        assert!(matches!(data_frame(vec![0xff, 0xfe]), Message::Binary(_)));
    }
}

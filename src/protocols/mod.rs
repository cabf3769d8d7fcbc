pub mod envelope;
pub mod websocket;

pub use envelope::Envelope;
pub use websocket::WebSocketHandler;

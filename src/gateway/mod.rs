pub mod connections;
pub mod server;
pub mod session;

pub use connections::ConnectionRegistry;
pub use server::{AppState, GatewayServer};
pub use session::{GatewaySession, SessionState};

pub mod handlers;
pub mod router;

pub use handlers::{register_default_handlers, RefreshSessionHandler};
pub use router::{MessageHandler, MessageRouter};

// Structured logging
pub mod logging;

// Prometheus metrics
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{detached_handle, install_recorder};

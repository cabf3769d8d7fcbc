//! Process-wide `tracing` subscriber.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::core::config::{LogFormat, ObservabilityConfig};
use crate::core::error::{GatewayError, GatewayResult};

/// Install the global subscriber
///
/// `RUST_LOG` wins over `log_level` when set. Fails if a subscriber is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> GatewayResult<()> {
    let filter = build_filter(&config.log_level)?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.log_format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .try_init(),
    };

    result.map_err(|e| GatewayError::config(format!("Failed to install log subscriber: {}", e)))
}

fn build_filter(default_directives: &str) -> GatewayResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_directives)
            .map_err(|e| GatewayError::config(format!("Invalid log level '{}': {}", default_directives, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_directive_is_config_error() {
        std::env::remove_var("RUST_LOG");
        assert!(build_filter("chat_gateway=info,tower_http=debug").is_ok());
        assert!(matches!(
            build_filter("chat_gateway=loud"),
            Err(GatewayError::Configuration { .. })
        ));
    }
}

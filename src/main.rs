//! # Chat Gateway - Main Entry Point
//!
//! Loads configuration, wires the auth client and (optionally) the service registry
//! HTTP surface, then serves WebSocket clients until SIGINT or SIGTERM.
//!
//! Configuration is read from `GATEWAY_CONFIG_PATH` (default `config/gateway.yaml`);
//! when that default file is absent the built-in defaults are used. `GATEWAY_*`
//! environment variables override either.

use anyhow::Context;
use std::net::SocketAddr;
use std::path::Path;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use chat_gateway::auth::create_auth_service;
use chat_gateway::discovery::{create_registry, RegistryHttpRouter, RegistryHttpState};
use chat_gateway::observability::{init_logging, install_recorder};
use chat_gateway::{GatewayConfig, GatewayServer};

const DEFAULT_CONFIG_PATH: &str = "config/gateway.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().await?;
    init_logging(&config.observability)?;

    info!("Starting chat gateway");
    info!(version = env!("CARGO_PKG_VERSION"), gate_id = %config.server.gate_id, "Configuration loaded");

    let metrics = if config.observability.metrics_enabled {
        Some(install_recorder()?)
    } else {
        None
    };

    let shutdown = CancellationToken::new();

    let registry_task = if config.registry.serve_http {
        Some(spawn_registry_http(&config, shutdown.clone()).await?)
    } else {
        None
    };

    let auth = create_auth_service(&config)
        .await
        .context("failed to initialize auth service client")?;
    let server = GatewayServer::new(config, auth, metrics);

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        trigger.cancel();
    });

    if let Err(e) = server.run(shutdown.clone()).await {
        error!(error = %e, "Gateway server failed");
        shutdown.cancel();
        return Err(e.into());
    }

    if let Some(task) = registry_task {
        match task.await {
            Ok(Err(e)) => error!(error = %e, "Registry HTTP server failed"),
            Err(e) => error!(error = %e, "Registry HTTP task panicked"),
            Ok(Ok(())) => {}
        }
    }

    info!("Chat gateway shutdown complete");
    Ok(())
}

async fn load_config() -> anyhow::Result<GatewayConfig> {
    let explicit = std::env::var("GATEWAY_CONFIG_PATH").ok();
    let path = explicit.clone().unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    if explicit.is_none() && !Path::new(&path).exists() {
        let mut config = GatewayConfig::default();
        config.apply_env_overrides()?;
        config.validate()?;
        return Ok(config);
    }

    GatewayConfig::load_from_file(&path)
        .await
        .with_context(|| format!("failed to load configuration from {}", path))
}

/// Serve the service registry HTTP surface on its own listener
async fn spawn_registry_http(
    config: &GatewayConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<tokio::task::JoinHandle<std::io::Result<()>>> {
    let registry = create_registry(config, &shutdown).await?;
    let backend = registry.backend_name();
    let state = RegistryHttpState::new(registry, config.registry.default_ttl_secs);
    let app = RegistryHttpRouter::create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.registry.bind_address, config.registry.port)
        .parse()
        .context("invalid registry bind address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind registry server to {}", addr))?;
    info!(addr = %addr, backend = backend, "Service registry listening");

    Ok(tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

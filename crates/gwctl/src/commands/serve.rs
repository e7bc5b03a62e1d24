//! `gwctl serve`: loads a [`GatewayConfig`], wires the in-process
//! collaborators, and runs the gateway until Ctrl+C.

use std::net::SocketAddr;
use std::sync::Arc;

use gw_core::{GatewayConfig, HmacTokenValidator, InMemoryStore};
use gw_session::Gateway;
use tracing::info;

use crate::invoker::UnconfiguredToolInvoker;

pub async fn execute(config_path: Option<&str>, port: Option<u16>, host: Option<&str>) -> anyhow::Result<()> {
    let mut config = match config_path {
        Some(path) => {
            let yaml = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("failed to read config file {path}: {e}"))?;
            GatewayConfig::from_yaml(&yaml).map_err(|e| anyhow::anyhow!("failed to parse {path}: {e}"))?
        }
        None => GatewayConfig::from_yaml("{}").expect("empty config parses to defaults"),
    };

    if let Some(port) = port {
        config.spec.bind.port = port;
    }
    if let Some(host) = host {
        config.spec.bind.host = host.to_string();
    }

    let secret = std::env::var("GW_HMAC_SECRET").unwrap_or_else(|_| {
        tracing::warn!("GW_HMAC_SECRET not set, using an insecure development secret");
        "insecure-dev-secret".to_string()
    });

    let validator = Arc::new(HmacTokenValidator::new(secret.into_bytes()));
    let invoker = Arc::new(UnconfiguredToolInvoker);
    let store = Arc::new(InMemoryStore::new());

    let gateway = Gateway::new(config.clone(), validator, invoker, store);
    gateway.spawn_background_tasks();

    let app = gateway.into_router();
    let bind_addr: SocketAddr = format!("{}:{}", config.spec.bind.host, config.spec.bind.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address: {e}"))?;

    info!(%bind_addr, "gateway listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;

    let shutdown = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
        info!("shutdown signal received");
    };

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    Ok(())
}

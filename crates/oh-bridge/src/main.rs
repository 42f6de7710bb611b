//! openHAB bridge
//!
//! Connects to every configured openHAB server and logs what each session
//! publishes until interrupted.

use anyhow::{Context, Result};
use oh_client::{ReqwestTransport, TokioClock};
use oh_config::BridgeConfig;
use oh_core::BusEvent;
use oh_event_bus::Listener;
use oh_session::Session;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "OH_BRIDGE_CONFIG";
const DEFAULT_CONFIG: &str = "bridge.yaml";

/// First CLI argument, then `OH_BRIDGE_CONFIG`, then `bridge.yaml`
fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string())
        .into()
}

fn log_listener(session: &Session) -> Listener<BusEvent> {
    let server = session.name().to_string();
    session.bus().listener(move |tag: &str, event: &BusEvent| match event {
        BusEvent::GlobalError(error) => warn!(%server, "{}: {}", tag, error.message),
        BusEvent::ConnectionStatus(status) => info!(%server, "{}: {:?}", tag, status),
        BusEvent::Status(status) => info!(%server, "{}: {}", tag, status),
        BusEvent::Resource(resource) => debug!(%server, "{}: {}", tag, resource.payload),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let path = config_path();
    info!("Starting openHAB bridge with {}", path.display());

    let config = BridgeConfig::load(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;

    let mut sessions = Vec::with_capacity(config.servers.len());
    let mut listeners = Vec::with_capacity(config.servers.len());
    for server in config.servers {
        let transport = ReqwestTransport::new(&server)
            .with_context(|| format!("failed to build HTTP client for {}", server.name))?;
        let session = Session::new(server, Arc::new(transport), Arc::new(TokioClock));

        let listener = log_listener(&session);
        session.bus().subscribe("*", &listener);
        listeners.push(listener);

        session.setup().await;
        sessions.push(session);
    }

    info!("Bridge running with {} server(s)", sessions.len());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    for session in &sessions {
        session.close().await;
    }
    drop(listeners);

    Ok(())
}

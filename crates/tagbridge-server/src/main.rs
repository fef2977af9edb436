//! # tagbridge-server
//!
//! Runs the reader monitor and serves the WebSocket bridge.
//!
//! ```bash
//! # Development
//! cargo run --package tagbridge-server
//!
//! # Production
//! TAGBRIDGE_ENV=production ./tagbridge-server
//! ```
//!
//! Built with `--features mock-reader`, setting `TAGBRIDGE_SIMULATED_READER`
//! replaces PC/SC with one simulated reader holding a blank NTAG215.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use tagbridge_core::BridgeConfig;
use tagbridge_server::logging::{self, LogMode};
use tagbridge_server::reader::ReaderMonitor;
use tagbridge_server::{api, state::AppState};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(LogMode::from_env()).context("Failed to initialise logging")?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting tagbridge-server");

    let config = Arc::new(BridgeConfig::load_default().context("Failed to load configuration")?);
    let state = AppState::new(Arc::clone(&config));

    #[cfg(feature = "mock-reader")]
    let simulated = std::env::var_os("TAGBRIDGE_SIMULATED_READER").is_some();
    #[cfg(not(feature = "mock-reader"))]
    let simulated = false;

    let monitor = if simulated {
        #[cfg(feature = "mock-reader")]
        simulate(&state).await?;
        None
    } else {
        let monitor = ReaderMonitor::new(state.registry().clone(), config.reader.clone());
        let stop = monitor.stop_handle();
        let task = tokio::task::spawn_blocking(move || monitor.run());
        Some((stop, task))
    };

    let ip: IpAddr = config
        .server
        .bind_address
        .parse()
        .context("Invalid server.bind_address")?;
    let addr = SocketAddr::new(ip, config.server.port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "Listening; WebSocket at /ws");

    axum::serve(listener, api::create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some((stop, task)) = monitor {
        stop.stop();
        if let Err(err) = task.await {
            warn!(error = %err, "Reader monitor panicked");
        }
    }
    info!("Shut down");
    Ok(())
}

#[cfg(feature = "mock-reader")]
async fn simulate(state: &AppState) -> anyhow::Result<()> {
    use tagbridge_core::{MockTag, TagFamily};
    use tagbridge_server::reader::ReaderCard;

    let link = state.registry().attach("Simulated ACR122U");
    let tag = MockTag::new(TagFamily::Ntag215);
    link.card_inserted(ReaderCard::Simulated(tag.clone()), tag.atr())
        .await
        .context("Simulated reader stopped")?;
    info!("Simulated reader attached with a blank NTAG215");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}

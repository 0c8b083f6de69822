//! Donor node port multiplexer
//!
//! Shares one public TCP port between two local services.
//!
//! This service:
//! - Accepts TCP connections on the public port
//! - Reads the first byte of each connection
//! - Splices TLS handshakes (0x16) to the tunnel backend
//! - Splices everything else to the configuration backend

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use donor_port_mux::{Args, Supervisor};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing (prefer RUST_LOG, fallback to MUX_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| args.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = args.into_config()?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting port multiplexer");

    let supervisor = match Supervisor::bind(config.clone()).await {
        Ok(supervisor) => Arc::new(supervisor),
        Err(e) => {
            error!(
                bind_addr = %config.listen_addr,
                error = %e,
                "Failed to bind listener"
            );
            return Err(e).with_context(|| format!("binding {}", config.listen_addr));
        }
    };

    tokio::select! {
        result = supervisor.run() => result.context("accept loop failed"),
        _ = tokio::signal::ctrl_c() => {
            info!("Received interrupt, shutting down");
            Ok(())
        }
    }
}

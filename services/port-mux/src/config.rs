//! Multiplexer configuration.
//!
//! Every setting can be given as a flag or through the environment. The
//! port variables keep the names the node's entrypoint already exports.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;

use crate::mux::{BackendTargets, DEFAULT_CLASSIFY_TIMEOUT, DEFAULT_CONNECT_TIMEOUT};

/// Command-line and environment arguments.
#[derive(Debug, Clone, Parser)]
#[command(name = "port-mux")]
#[command(author, version, long_about = None)]
#[command(about = "Route TLS and HTTP traffic arriving on one port to two local backends")]
pub struct Args {
    /// Address to accept public connections on.
    #[arg(long, env = "LISTEN_HOST", default_value = "0.0.0.0")]
    pub listen_host: IpAddr,

    /// Public port shared by both protocols.
    #[arg(long, env = "LISTEN_PORT", default_value_t = 31443)]
    pub listen_port: u16,

    /// Local port of the tunnel (TLS) backend.
    #[arg(long, env = "XRAY_INTERNAL_PORT", default_value_t = 10443)]
    pub tunnel_port: u16,

    /// Local port of the configuration (HTTP) backend.
    #[arg(long, env = "SUB_INTERNAL_PORT", default_value_t = 10080)]
    pub config_port: u16,

    /// How long a new client may take to send its first byte.
    #[arg(long, env = "MUX_CLASSIFY_TIMEOUT_MS", default_value_t = 2000)]
    pub classify_timeout_ms: u64,

    /// Backend connect timeout.
    #[arg(long, env = "MUX_CONNECT_TIMEOUT_MS", default_value_t = 2000)]
    pub connect_timeout_ms: u64,

    /// Cap on concurrently handled connections. Unlimited when unset.
    #[arg(long, env = "MUX_MAX_CONNECTIONS")]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, env = "MUX_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Validate the arguments and freeze them into a [`MuxConfig`].
    pub fn into_config(self) -> Result<MuxConfig> {
        if self.tunnel_port == 0 || self.config_port == 0 {
            bail!(
                "Backend ports must be non-zero (tunnel={}, config={}).",
                self.tunnel_port,
                self.config_port
            );
        }
        if self.tunnel_port == self.config_port {
            bail!(
                "Tunnel and config backends must use different ports (both are {}).",
                self.tunnel_port
            );
        }
        if self.listen_port != 0
            && (self.listen_port == self.tunnel_port || self.listen_port == self.config_port)
        {
            bail!("LISTEN_PORT {} collides with a backend port.", self.listen_port);
        }
        if self.classify_timeout_ms == 0 {
            bail!("MUX_CLASSIFY_TIMEOUT_MS must be greater than zero.");
        }
        if self.connect_timeout_ms == 0 {
            bail!("MUX_CONNECT_TIMEOUT_MS must be greater than zero.");
        }
        if self.max_connections == Some(0) {
            bail!("MUX_MAX_CONNECTIONS must be greater than zero when set.");
        }

        Ok(MuxConfig {
            listen_addr: SocketAddr::new(self.listen_host, self.listen_port),
            backends: BackendTargets::localhost(self.tunnel_port, self.config_port),
            classify_timeout: Duration::from_millis(self.classify_timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            max_connections: self.max_connections,
        })
    }
}

/// Immutable multiplexer configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Public address to bind.
    pub listen_addr: SocketAddr,
    /// Where classified connections go.
    pub backends: BackendTargets,
    /// First-byte read timeout.
    pub classify_timeout: Duration,
    /// Backend dial timeout.
    pub connect_timeout: Duration,
    /// Optional concurrency cap.
    pub max_connections: Option<usize>,
}

impl MuxConfig {
    /// Create a configuration with default timeouts and no connection cap.
    pub fn new(listen_addr: SocketAddr, backends: BackendTargets) -> Self {
        Self {
            listen_addr,
            backends,
            classify_timeout: DEFAULT_CLASSIFY_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_connections: None,
        }
    }
}

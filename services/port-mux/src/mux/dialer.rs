//! Backend dialing.
//!
//! Both backends are plain local listeners run by sibling processes. A dial
//! is attempted once; a refused or timed-out connect is reported to the
//! caller, which drops the client. Recovering a dead backend is the job of
//! whatever supervises that backend, not ours.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::classifier::BackendKind;
use crate::error::MuxError;

/// Default connect timeout for backend connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Local addresses of the two backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendTargets {
    pub tunnel: SocketAddr,
    pub config: SocketAddr,
}

impl BackendTargets {
    /// Targets on the loopback interface.
    pub fn localhost(tunnel_port: u16, config_port: u16) -> Self {
        Self {
            tunnel: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, tunnel_port)),
            config: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, config_port)),
        }
    }

    pub fn addr_for(&self, backend: BackendKind) -> SocketAddr {
        match backend {
            BackendKind::Tunnel => self.tunnel,
            BackendKind::Config => self.config,
        }
    }
}

/// Opens connections to the selected backend.
#[derive(Debug, Clone)]
pub struct Dialer {
    targets: BackendTargets,
    connect_timeout: Duration,
}

impl Dialer {
    pub fn new(targets: BackendTargets, connect_timeout: Duration) -> Self {
        Self {
            targets,
            connect_timeout,
        }
    }

    pub fn targets(&self) -> &BackendTargets {
        &self.targets
    }

    /// Connect to `backend`. No retry.
    pub async fn dial(&self, backend: BackendKind) -> Result<TcpStream, MuxError> {
        let addr = self.targets.addr_for(backend);
        debug!(backend = %backend, backend_addr = %addr, "Connecting to backend");

        let result = match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timeout")),
        };

        result.map_err(|source| MuxError::BackendUnavailable {
            backend,
            addr,
            source,
        })
    }
}

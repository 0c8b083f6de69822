//! First-byte protocol classification.
//!
//! A TLS connection always opens with a handshake record, whose content type
//! is `0x16`. An HTTP request opens with an ASCII method name. One byte is
//! therefore enough to tell the tunnel traffic from subscription requests,
//! and nothing past it is ever inspected.

use std::fmt;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tracing::debug;

use crate::error::MuxError;

/// TLS record content type for handshake messages.
pub const TLS_HANDSHAKE_RECORD: u8 = 0x16;

/// Default time a new client gets to send its first byte.
pub const DEFAULT_CLASSIFY_TIMEOUT: Duration = Duration::from_secs(2);

/// Which local service a connection is spliced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Encrypted tunnel endpoint (TLS framed).
    Tunnel,
    /// Plaintext configuration/subscription endpoint.
    Config,
}

impl BackendKind {
    /// Route a connection by its first byte.
    pub fn for_first_byte(byte: u8) -> Self {
        if byte == TLS_HANDSHAKE_RECORD {
            BackendKind::Tunnel
        } else {
            BackendKind::Config
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Tunnel => "tunnel",
            BackendKind::Config => "config",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a successful classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classified {
    /// The consumed byte. Must be replayed to the backend.
    pub byte: u8,
    /// Selected backend.
    pub backend: BackendKind,
}

/// Reads the classification byte from new connections.
#[derive(Debug, Clone)]
pub struct Classifier {
    timeout: Duration,
}

impl Classifier {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Read exactly one byte from `stream` and pick a backend for it.
    pub async fn classify<R: AsyncRead + Unpin>(
        &self,
        stream: &mut R,
    ) -> Result<Classified, MuxError> {
        let mut first = [0u8; 1];

        let n = match timeout(self.timeout, stream.read(&mut first)).await {
            Ok(result) => result?,
            Err(_) => return Err(MuxError::ClassifyTimeout(self.timeout)),
        };

        if n == 0 {
            return Err(MuxError::ClientClosed);
        }

        let backend = BackendKind::for_first_byte(first[0]);
        debug!(first_byte = first[0], backend = %backend, "Connection classified");

        Ok(Classified {
            byte: first[0],
            backend,
        })
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_CLASSIFY_TIMEOUT)
    }
}

//! Error types for the multiplexer.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::mux::BackendKind;

/// Per-connection failures. None of these ever leave the connection task.
#[derive(Debug, Error)]
pub enum MuxError {
    /// No classification byte arrived within the bound.
    #[error("classify_timeout: no data within {0:?}")]
    ClassifyTimeout(Duration),

    /// Client closed the connection before sending anything.
    #[error("client_closed: end of stream before first byte")]
    ClientClosed,

    /// The selected backend could not be reached.
    #[error("backend_unavailable: {backend} at {addr}: {source}")]
    BackendUnavailable {
        backend: BackendKind,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl MuxError {
    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            MuxError::ClassifyTimeout(_) => "classify_timeout",
            MuxError::ClientClosed => "client_closed",
            MuxError::BackendUnavailable { .. } => "backend_unavailable",
            MuxError::Io(_) => "io_error",
        }
    }
}

/// Whether an I/O error is an ordinary way for a spliced stream to end.
///
/// Peers resetting or half-closing mid-transfer are expected on a public
/// port and are not worth reporting.
pub fn is_benign(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
    )
}

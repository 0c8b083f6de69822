//! Public listener and accept loop.
//!
//! Every accepted connection gets its own task, so a client that stalls in
//! classification or a slow pipe never holds up the accept loop. Errors
//! from a connection end with that connection.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, error, info, warn, Instrument};

use super::classifier::Classifier;
use super::connection::Connection;
use super::dialer::Dialer;
use super::splice::SpliceOutcome;
use super::stats::{ActiveGuard, MuxStats};
use crate::config::MuxConfig;
use crate::error::MuxError;

/// Back-off after a failed accept, so descriptor exhaustion does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Owns the public socket and dispatches connections.
pub struct Supervisor {
    config: MuxConfig,
    listener: TcpListener,
    classifier: Classifier,
    dialer: Dialer,
    /// Present only when an operator configured a connection cap.
    conn_limit: Option<Arc<Semaphore>>,
    stats: Arc<MuxStats>,
}

impl Supervisor {
    /// Bind the public address.
    pub async fn bind(config: MuxConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(config.listen_addr).await?;

        Ok(Self {
            classifier: Classifier::new(config.classify_timeout),
            dialer: Dialer::new(config.backends, config.connect_timeout),
            conn_limit: config
                .max_connections
                .map(|max| Arc::new(Semaphore::new(max))),
            stats: Arc::new(MuxStats::default()),
            listener,
            config,
        })
    }

    /// Get the local address this supervisor is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &MuxConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<MuxStats> {
        &self.stats
    }

    /// Accept connections forever.
    pub async fn run(self: Arc<Self>) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        info!(
            listen_addr = %local_addr,
            tunnel_backend = %self.config.backends.tunnel,
            config_backend = %self.config.backends.config,
            max_connections = ?self.config.max_connections,
            "Multiplexer listening"
        );

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => self.dispatch(stream, peer_addr),
                Err(e) => {
                    error!(error = %e, "Accept error");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }

    fn dispatch(self: &Arc<Self>, stream: TcpStream, peer_addr: SocketAddr) {
        let permit = match self.try_acquire() {
            Ok(permit) => permit,
            Err(_) => {
                self.stats
                    .connections_rejected
                    .fetch_add(1, Ordering::Relaxed);
                warn!(peer_addr = %peer_addr, "Connection rejected: max connections reached");
                return;
            }
        };

        let guard = ActiveGuard::new(Arc::clone(&self.stats));
        let supervisor = Arc::clone(self);

        tokio::spawn(
            async move {
                let result = Connection::new(stream)
                    .run(&supervisor.classifier, &supervisor.dialer, &supervisor.stats)
                    .await;
                log_result(result);

                drop(guard);
                drop(permit);
            }
            .instrument(tracing::info_span!("connection", peer = %peer_addr)),
        );
    }

    fn try_acquire(&self) -> Result<Option<OwnedSemaphorePermit>, TryAcquireError> {
        self.conn_limit
            .as_ref()
            .map(|limit| Arc::clone(limit).try_acquire_owned())
            .transpose()
    }
}

fn log_result(result: Result<SpliceOutcome, MuxError>) {
    match result {
        Ok(outcome) => {
            if let Some(e) = &outcome.error {
                debug!(direction = %outcome.closed_by, error = %e, "Forwarding error");
            }
            debug!(
                bytes_to_backend = outcome.bytes_to_backend,
                bytes_from_backend = outcome.bytes_from_backend,
                closed_by = %outcome.closed_by,
                "Connection closed"
            );
        }
        Err(e @ MuxError::BackendUnavailable { .. }) => {
            warn!(reason = e.reason_code(), error = %e, "Backend unavailable");
        }
        Err(e) => {
            debug!(reason = e.reason_code(), error = %e, "Connection dropped");
        }
    }
}

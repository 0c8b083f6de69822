//! Per-connection pipeline: classify, dial, splice.

use std::fmt;
use std::sync::atomic::Ordering;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::trace;

use super::classifier::Classifier;
use super::dialer::Dialer;
use super::splice::{splice, SpliceOutcome};
use super::stats::MuxStats;
use crate::error::MuxError;

/// Lifecycle of a multiplexed connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnState {
    /// Waiting for the first byte.
    Classifying,
    /// Dialing the selected backend.
    Connecting,
    /// Forwarding in both directions.
    Piping,
    /// Both streams released. Terminal.
    Closed,
}

impl ConnState {
    /// Whether `next` is a legal successor of this state.
    pub fn can_advance_to(self, next: ConnState) -> bool {
        matches!(
            (self, next),
            (ConnState::Classifying, ConnState::Connecting)
                | (ConnState::Classifying, ConnState::Closed)
                | (ConnState::Connecting, ConnState::Piping)
                | (ConnState::Connecting, ConnState::Closed)
                | (ConnState::Piping, ConnState::Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ConnState::Closed
    }

    fn advance(self, next: ConnState) -> ConnState {
        debug_assert!(
            self.can_advance_to(next),
            "illegal connection transition {self} -> {next}"
        );
        trace!(from = %self, to = %next, "Connection state change");
        next
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnState::Classifying => "classifying",
            ConnState::Connecting => "connecting",
            ConnState::Piping => "piping",
            ConnState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// An accepted client and the state of its pipeline.
///
/// The connection owns the client stream and, once dialed, the backend
/// stream. Both are dropped by the time [`Connection::run`] returns,
/// whichever path it takes.
pub struct Connection<S> {
    client: S,
    state: ConnState,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(client: S) -> Self {
        Self {
            client,
            state: ConnState::Classifying,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Drive the connection to `Closed`.
    pub async fn run(
        mut self,
        classifier: &Classifier,
        dialer: &Dialer,
        stats: &MuxStats,
    ) -> Result<SpliceOutcome, MuxError> {
        let classified = match classifier.classify(&mut self.client).await {
            Ok(classified) => classified,
            Err(e) => {
                stats.classify_failed.fetch_add(1, Ordering::Relaxed);
                self.state = self.state.advance(ConnState::Closed);
                return Err(e);
            }
        };
        self.state = self.state.advance(ConnState::Connecting);
        stats.record_routed(classified.backend);

        let backend = match dialer.dial(classified.backend).await {
            Ok(stream) => stream,
            Err(e) => {
                stats.backend_failed.fetch_add(1, Ordering::Relaxed);
                self.state = self.state.advance(ConnState::Closed);
                return Err(e);
            }
        };
        self.state = self.state.advance(ConnState::Piping);

        let outcome = splice(self.client, backend, classified.byte).await;
        self.state = self.state.advance(ConnState::Closed);

        stats
            .bytes_to_backend
            .fetch_add(outcome.bytes_to_backend, Ordering::Relaxed);
        stats
            .bytes_from_backend
            .fetch_add(outcome.bytes_from_backend, Ordering::Relaxed);

        Ok(outcome)
    }
}

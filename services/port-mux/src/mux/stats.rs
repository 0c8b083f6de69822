//! Connection counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::classifier::BackendKind;

/// Statistics for the multiplexer.
#[derive(Debug, Default)]
pub struct MuxStats {
    /// Total connections handed to a connection task.
    pub connections_accepted: AtomicU64,
    /// Connections currently being handled.
    pub connections_active: AtomicU64,
    /// Total connections closed.
    pub connections_closed: AtomicU64,
    /// Connections rejected due to the configured limit.
    pub connections_rejected: AtomicU64,
    /// Connections routed to the tunnel backend.
    pub routed_tunnel: AtomicU64,
    /// Connections routed to the configuration backend.
    pub routed_config: AtomicU64,
    /// Classification failures (timeout, EOF, read error).
    pub classify_failed: AtomicU64,
    /// Backend dial failures.
    pub backend_failed: AtomicU64,
    /// Bytes forwarded to backends, replayed bytes included.
    pub bytes_to_backend: AtomicU64,
    /// Bytes forwarded back to clients.
    pub bytes_from_backend: AtomicU64,
}

impl MuxStats {
    pub(crate) fn record_routed(&self, backend: BackendKind) {
        let counter = match backend {
            BackendKind::Tunnel => &self.routed_tunnel,
            BackendKind::Config => &self.routed_config,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> MuxStatsSnapshot {
        MuxStatsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            routed_tunnel: self.routed_tunnel.load(Ordering::Relaxed),
            routed_config: self.routed_config.load(Ordering::Relaxed),
            classify_failed: self.classify_failed.load(Ordering::Relaxed),
            backend_failed: self.backend_failed.load(Ordering::Relaxed),
            bytes_to_backend: self.bytes_to_backend.load(Ordering::Relaxed),
            bytes_from_backend: self.bytes_from_backend.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`MuxStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MuxStatsSnapshot {
    pub connections_accepted: u64,
    pub connections_active: u64,
    pub connections_closed: u64,
    pub connections_rejected: u64,
    pub routed_tunnel: u64,
    pub routed_config: u64,
    pub classify_failed: u64,
    pub backend_failed: u64,
    pub bytes_to_backend: u64,
    pub bytes_from_backend: u64,
}

/// Holds one slot in `connections_active` for as long as it lives.
pub(crate) struct ActiveGuard {
    stats: Arc<MuxStats>,
}

impl ActiveGuard {
    pub(crate) fn new(stats: Arc<MuxStats>) -> Self {
        stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
        stats.connections_active.fetch_add(1, Ordering::Relaxed);
        Self { stats }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.stats.connections_active.fetch_sub(1, Ordering::Relaxed);
        self.stats.connections_closed.fetch_add(1, Ordering::Relaxed);
    }
}

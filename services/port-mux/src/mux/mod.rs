//! Connection-level protocol multiplexer.
//!
//! This module provides:
//! - First-byte classification (TLS handshake vs. anything else)
//! - Backend dialing with a connect timeout
//! - Bidirectional splicing with joint teardown
//! - The accept loop that ties them together
//!
//! ## Architecture
//!
//! ```text
//! Client -> Supervisor -> Classifier --0x16--> Dialer -> tunnel backend
//!                              |                  \
//!                              +--other--> Dialer -> config backend
//!                                                  |
//!                                   Splicer (replays first byte, pipes both ways)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use donor_port_mux::{BackendTargets, MuxConfig, Supervisor};
//!
//! let config = MuxConfig::new("0.0.0.0:31443".parse()?, BackendTargets::localhost(10443, 10080));
//! let supervisor = Arc::new(Supervisor::bind(config).await?);
//! supervisor.run().await?;
//! ```

mod classifier;
mod connection;
mod dialer;
mod splice;
mod stats;
mod supervisor;

pub use classifier::{
    BackendKind, Classified, Classifier, DEFAULT_CLASSIFY_TIMEOUT, TLS_HANDSHAKE_RECORD,
};
pub use connection::{ConnState, Connection};
pub use dialer::{BackendTargets, Dialer, DEFAULT_CONNECT_TIMEOUT};
pub use splice::{splice, Direction, SpliceOutcome, COPY_BUFFER_SIZE};
pub use stats::{MuxStats, MuxStatsSnapshot};
pub use supervisor::Supervisor;

pub mod config;
pub mod error;
pub mod mux;

pub use config::{Args, MuxConfig};
pub use error::{is_benign, MuxError};
pub use mux::{
    splice, BackendKind, BackendTargets, Classified, Classifier, ConnState, Connection, Dialer,
    Direction, MuxStats, MuxStatsSnapshot, SpliceOutcome, Supervisor,
};

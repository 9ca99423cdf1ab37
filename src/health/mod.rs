//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! GET /health-check
//!     → probe.rs requests the configured probe URL
//!     → ProbeOutcome (reachable with latency, or a classified failure)
//!     → handler maps it to 200 / 503
//! ```

pub mod probe;

pub use probe::{ConnectivityProbe, ProbeOutcome};

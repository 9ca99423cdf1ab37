//! Session registry subsystem.
//!
//! # Data Flow
//! ```text
//! POST /subscribe
//!     → store.rs creates a record (record.rs) with its own outbound client
//!
//! Every gated request:
//!     → store.rs resolves the id (validate + touch, atomic per id)
//!     → handler reads/updates headers.rs and cookies.rs state on the record
//!
//! Expiry:
//!     → lookup-time self-eviction (store.rs)
//!     → periodic sweep (sweeper.rs)
//! ```
//!
//! # Design Decisions
//! - Records are shared as `Arc<SessionRecord>`; outbound I/O never holds a map lock
//! - Every removal path releases the record's client exactly once

pub mod cookies;
pub mod headers;
pub mod record;
pub mod store;
pub mod sweeper;

use thiserror::Error;

pub use cookies::{CookieJar, SetCookie, StoredCookie};
pub use headers::{HeaderSet, InvalidHeader};
pub use record::{short_id, ClientSettings, SessionInfo, SessionRecord};
pub use store::{SessionStats, SessionStore};
pub use sweeper::SessionSweeper;

/// Session lookup failure.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("session expired")]
    Expired,
    #[error("failed to build outbound client: {0}")]
    Client(#[from] reqwest::Error),
}

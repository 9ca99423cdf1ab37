//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id, body limit)
//!     → middleware/session_gateway.rs (allow-list, session resolve, panic boundary)
//!     → extract.rs (JSON payloads, client ip, user agent)
//!     → handlers.rs (session management, forward, download, health)
//!     → Send to client
//! ```

pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod server;

pub use middleware::SessionContext;
pub use server::{AppState, HttpServer, ServerError};

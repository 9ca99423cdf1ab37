//! Session-isolating HTTP forward proxy library.

pub mod config;
pub mod error;
pub mod forward;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod session;

pub use config::schema::ProxyConfig;
pub use error::ApiError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use session::SessionStore;

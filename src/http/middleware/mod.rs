//! Axum middleware.

pub mod session_gateway;

pub use session_gateway::{session_gateway, GatewayState, SessionContext, PUBLIC_PATHS};

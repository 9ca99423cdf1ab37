//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! defaults
//!     → optional TOML file (loader.rs)
//!     → environment overrides (loader.rs)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!
//! With server.reload enabled:
//!     watcher.rs detects file change
//!     → loader.rs loads and validates the file
//!     → session idle timeout applied to the live store
//! ```
//!
//! # Design Decisions
//! - Environment is read once at startup
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load, ConfigError};
pub use schema::{
    ForwardConfig, HealthConfig, ObservabilityConfig, ProxyConfig, ServerConfig, SessionConfig,
};

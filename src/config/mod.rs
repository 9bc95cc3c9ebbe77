//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML/JSON)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → ApplicationBuilder::build(config)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → Application::rebuild(config)
//!     → atomic swap of the live Application
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full rebuild
//! - All fields have defaults to allow minimal configs
//! - Unrecognised keys are kept in `extra` for collaborators
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError, Format};
pub use schema::{AppConfig, ListenerConfig, MiddlewareConfig, ObservabilityConfig, ProxyMount, TimeoutConfig};
pub use watcher::ConfigWatcher;

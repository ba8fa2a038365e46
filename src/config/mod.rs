//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! devhost.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → shared via ArcSwap with the HTTP handlers
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of Arc<ServerConfig>
//!     → next request observes new runtime and timeout settings
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - The site registry (config.json) is not part of this; it belongs to `sites`

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    HomeConfig, ListenerConfig, LogFormat, ObservabilityConfig, RuntimeConfig, ServerConfig,
    TimeoutConfig, TlsConfig,
};
pub use watcher::ConfigWatcher;

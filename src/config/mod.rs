//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared with subsystems at startup
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of the memory store's key table
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only the key table reloads live
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use watcher::{apply_key_updates, ConfigWatcher};
pub use schema::{
    KeyConfig, ListenerConfig, LogFormat, ObservabilityConfig, ProxyConfig, StoreBackend,
    StoreConfig, TimeoutConfig, UpstreamConfig, UsageConfig,
};

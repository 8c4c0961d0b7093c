//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → CLI overrides applied by the binary
//!     → ProxyConfig (validated, immutable)
//!     → handed to ProxyServer::start
//! ```
//!
//! # Design Decisions
//! - Config is immutable once the server starts
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::BalanceStrategy;
pub use schema::BufferConfig;
pub use schema::ListenerConfig;
pub use schema::MonitorConfig;
pub use schema::ProxyConfig;
pub use schema::WorkerConfig;
pub use validation::{validate_config, ValidationError};

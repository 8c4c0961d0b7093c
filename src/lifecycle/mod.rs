//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (server.rs):
//!     Validate config → Build pool → Bind listener → Spawn dispatcher/listener
//!
//! Shutdown (shutdown.rs):
//!     trigger() → listener exits → queue disconnects
//!     → dispatcher tells every worker to stop → workers close their sockets
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Shutdown cascades through the same queues that carry connections

pub mod shutdown;

pub use shutdown::Shutdown;

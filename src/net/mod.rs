//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (blocking accept loop, bounded queue)
//!     → dispatcher picks a worker
//!     → endpoint.rs (socket + readiness interest inside the worker)
//!     → connection.rs (identity, half-close state, probes)
//!
//! Endpoint States:
//!     Connecting → Connected → Half-closed → Closed → Released
//! ```
//!
//! # Design Decisions
//! - Accept is blocking on its own thread; everything after is non-blocking
//! - Each direction of a socket closes independently
//! - Probes let other threads observe open-state without touching sockets

pub mod connection;
pub mod endpoint;
pub mod listener;

pub use connection::{ChannelState, ConnectionId, EndpointProbe, Role};
pub use endpoint::{ConnectStatus, Endpoint, Readiness};
pub use listener::{Accepted, Listener, ListenerError};

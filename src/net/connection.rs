//! Connection identity and half-close state tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Track per-endpoint half-close state (input / output / connected)
//! - Publish open-state through a probe readable from other threads

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a client/host connection pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Which side of a pair an endpoint faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Host,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Host => f.write_str("host"),
        }
    }
}

/// Half-close state of one socket endpoint.
///
/// Once both directions are closed the endpoint is fully closed and stays so.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelState {
    pub input_closed: bool,
    pub output_closed: bool,
    pub connected: bool,
}

impl ChannelState {
    /// State of an accepted socket.
    pub fn connected() -> Self {
        Self {
            connected: true,
            ..Self::default()
        }
    }

    /// State of an outbound socket whose connect is still in flight.
    pub fn connecting() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.input_closed && self.output_closed
    }
}

/// Thread-safe view of an endpoint for collaborators outside its worker.
#[derive(Debug)]
pub struct EndpointProbe {
    id: ConnectionId,
    role: Role,
    name: String,
    input_closed: AtomicBool,
    output_closed: AtomicBool,
    open: AtomicBool,
}

impl EndpointProbe {
    pub fn new(id: ConnectionId, role: Role, name: String) -> Self {
        Self {
            id,
            role,
            name,
            input_closed: AtomicBool::new(false),
            output_closed: AtomicBool::new(false),
            open: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Peer address or destination, for humans.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// False once the socket handle has been closed.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn is_input_closed(&self) -> bool {
        self.input_closed.load(Ordering::Acquire)
    }

    pub fn is_output_closed(&self) -> bool {
        self.output_closed.load(Ordering::Acquire)
    }

    pub(crate) fn publish(&self, state: &ChannelState) {
        self.input_closed.store(state.input_closed, Ordering::Release);
        self.output_closed.store(state.output_closed, Ordering::Release);
    }

    pub(crate) fn mark_released(&self) {
        self.open.store(false, Ordering::Release);
    }
}

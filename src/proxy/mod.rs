//! Proxy core: per-pair state machines.
//!
//! # Data Flow
//! ```text
//! Worker readiness event (token → pair, side)
//!     → ProxyConnection::handle
//!         → ClientHandler (client.rs): parse request line, open host socket
//!         → HostHandler (host.rs): finish connect, queue CONNECT response
//!         → bridge.rs: shuttle bytes through the pair's two buffers
//!     → SharedConnectionContext::sync (apply interest changes)
//!     → SharedConnectionContext::cleanup (release closed sockets, buffers)
//! ```
//!
//! # Design Decisions
//! - Each handler is a small enum state machine; a step consumes the
//!   current state and returns the next one
//! - Both handlers of a pair live on one worker thread, so the shared
//!   context needs no locking
//! - Half-close is tracked per direction; a socket is released only after
//!   both of its directions are closed

pub mod bridge;
pub mod client;
pub mod context;
pub mod host;
pub mod io;
pub mod request;

use std::time::{Duration, Instant};

use mio::Registry;

use crate::monitor::Monitor;
use crate::net::{Readiness, Role};

pub use client::{ClientHandler, ClientState};
pub use context::{client_token, decode_token, host_token, SharedConnectionContext};
pub use host::{HostHandler, HostState};
pub use request::{Destination, RequestError, RequestLine};

/// Collaborators a handler may call during a step.
#[derive(Debug, Clone, Copy)]
pub struct HandlerEnv<'a> {
    pub monitor: &'a dyn Monitor,
}

/// A client/host pair with both of its handlers.
#[derive(Debug)]
pub struct ProxyConnection {
    ctx: SharedConnectionContext,
    client: ClientHandler,
    host: HostHandler,
}

impl ProxyConnection {
    pub fn new(ctx: SharedConnectionContext) -> Self {
        Self {
            ctx,
            client: ClientHandler::new(),
            host: HostHandler::new(),
        }
    }

    pub fn context(&self) -> &SharedConnectionContext {
        &self.ctx
    }

    /// Register the client socket. Returns true if the pair is already dead.
    pub fn register(&mut self, registry: &Registry) -> bool {
        self.ctx.sync(registry);
        self.ctx.cleanup(registry)
    }

    /// Run the handler for `role` once, then apply its effects.
    ///
    /// Returns true when the pair is finished and can be dropped.
    pub fn handle(&mut self, role: Role, ready: Readiness, env: &HandlerEnv<'_>, registry: &Registry) -> bool {
        if let Some(endpoint) = self.ctx.endpoint_mut(role) {
            endpoint.set_readiness(ready);
            match role {
                Role::Client => self.client.handle(&mut self.ctx, env),
                Role::Host => self.host.handle(&mut self.ctx, env),
            }
            if let Some(endpoint) = self.ctx.endpoint_mut(role) {
                endpoint.clear_readiness();
            }
        }

        self.ctx.sync(registry);
        self.ctx.cleanup(registry)
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        self.ctx.idle_for(now)
    }

    pub fn open_sockets(&self) -> usize {
        self.ctx.open_sockets()
    }

    /// Drop the pair immediately, releasing sockets and buffers.
    pub fn abort(&mut self, registry: &Registry) {
        self.ctx.abort(registry);
    }
}

//! State shared by the two handlers of one client/host pair.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use crate::buffer::{BufferPool, ConnectionBuffers};
use crate::net::{ChannelState, ConnectionId, Endpoint, EndpointProbe, Role};

/// Token of the client socket of pair `key`.
pub fn client_token(key: usize) -> Token {
    Token(key << 1)
}

/// Token of the host socket of pair `key`.
pub fn host_token(key: usize) -> Token {
    Token((key << 1) | 1)
}

/// Split a token back into its pair key and side.
pub fn decode_token(token: Token) -> (usize, Role) {
    let role = if token.0 & 1 == 0 { Role::Client } else { Role::Host };
    (token.0 >> 1, role)
}

/// Everything both sides of a pair read and write.
///
/// Both handlers of a pair run on the same worker thread, so the context
/// is owned outright and never locked.
#[derive(Debug)]
pub struct SharedConnectionContext {
    id: ConnectionId,
    key: usize,
    pub(crate) client: Endpoint,
    pub(crate) host: Option<Endpoint>,
    pub(crate) buffers: ConnectionBuffers,
    https: bool,
    last_activity: Instant,
}

impl SharedConnectionContext {
    /// Wrap a freshly accepted client. Its read interest is registered on
    /// the first `sync`.
    pub fn new(key: usize, stream: TcpStream, peer: SocketAddr, pool: &Arc<BufferPool>) -> Self {
        let id = ConnectionId::new();
        let probe = Arc::new(EndpointProbe::new(id, Role::Client, peer.to_string()));
        let client = Endpoint::new(
            stream,
            client_token(key),
            probe,
            ChannelState::connected(),
            Interest::READABLE,
        );

        Self {
            id,
            key,
            client,
            host: None,
            buffers: ConnectionBuffers::new(pool),
            https: false,
            last_activity: Instant::now(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn key(&self) -> usize {
        self.key
    }

    pub fn client(&self) -> &Endpoint {
        &self.client
    }

    pub fn host(&self) -> Option<&Endpoint> {
        self.host.as_ref()
    }

    pub fn buffers(&self) -> &ConnectionBuffers {
        &self.buffers
    }

    pub fn endpoint_mut(&mut self, role: Role) -> Option<&mut Endpoint> {
        match role {
            Role::Client => Some(&mut self.client),
            Role::Host => self.host.as_mut(),
        }
    }

    pub fn is_https(&self) -> bool {
        self.https
    }

    pub fn mark_https(&mut self) {
        self.https = true;
    }

    /// Attach the outbound socket. It waits for connect completion
    /// (write readiness) once synced.
    pub fn attach_host(&mut self, stream: TcpStream, destination: String) {
        let probe = Arc::new(EndpointProbe::new(self.id, Role::Host, destination));
        self.host = Some(Endpoint::new(
            stream,
            host_token(self.key),
            probe,
            ChannelState::connecting(),
            Interest::WRITABLE,
        ));
    }

    /// Record that bytes moved through the pair.
    pub fn touch(&mut self, bytes: usize) {
        if bytes > 0 {
            self.last_activity = Instant::now();
        }
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Open socket handles in this pair.
    pub fn open_sockets(&self) -> usize {
        let host = self.host.as_ref().map_or(0, |host| usize::from(!host.is_released()));
        usize::from(!self.client.is_released()) + host
    }

    /// Close both directions of both sockets.
    pub fn close_all(&mut self) {
        self.client.close();
        if let Some(host) = self.host.as_mut() {
            host.close();
        }
    }

    /// Push pending interest changes to the multiplexer.
    ///
    /// A pair whose registration fails cannot make progress and is closed.
    pub fn sync(&mut self, registry: &Registry) {
        let mut failed = false;
        if let Err(e) = self.client.sync(registry) {
            tracing::error!(connection_id = %self.id, peer = %self.client.name(), error = %e, "Failed to register client socket");
            failed = true;
        }
        if let Some(host) = self.host.as_mut() {
            if let Err(e) = host.sync(registry) {
                tracing::error!(connection_id = %self.id, peer = %host.name(), error = %e, "Failed to register host socket");
                failed = true;
            }
        }
        if failed {
            self.close_all();
        }
    }

    /// Release fully closed sockets and, once both are gone, the buffers.
    ///
    /// Returns true when the whole pair is finished.
    pub fn cleanup(&mut self, registry: &Registry) -> bool {
        if self.client.release_if_closed(registry) {
            tracing::debug!(connection_id = %self.id, peer = %self.client.name(), "Client socket closed");
        }
        if let Some(host) = self.host.as_mut() {
            if host.release_if_closed(registry) {
                tracing::debug!(connection_id = %self.id, peer = %host.name(), "Host socket closed");
            }
        }

        let finished = self.client.is_released() && self.host.as_ref().map_or(true, Endpoint::is_released);
        if finished && !self.buffers.is_released() {
            self.buffers.release();
            tracing::debug!(connection_id = %self.id, "Connection pair closed");
        }
        finished
    }

    /// Close and release everything immediately.
    pub fn abort(&mut self, registry: &Registry) {
        self.close_all();
        self.client.release(registry);
        if let Some(host) = self.host.as_mut() {
            host.release(registry);
        }
        self.buffers.release();
    }
}

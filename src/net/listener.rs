//! TCP listener implementation.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections in a dedicated blocking loop
//! - Switch accepted sockets to non-blocking mode
//! - Hand them to the dispatcher through a bounded queue

use std::net::{SocketAddr, TcpListener};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::time::Duration;

use crate::config::ListenerConfig;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;

/// Pause after a failed accept so fd exhaustion does not become a hot loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(std::io::Error),
    /// Failed to accept connection.
    Accept(std::io::Error),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
        }
    }
}

impl std::error::Error for ListenerError {}

/// A client socket ready to be handed to a worker.
#[derive(Debug)]
pub struct Accepted {
    pub stream: mio::net::TcpStream,
    pub peer: SocketAddr,
}

/// A blocking TCP listener feeding the dispatcher queue.
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind to the configured address.
    pub fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let inner = TcpListener::bind(config.socket_address()).map_err(ListenerError::Bind)?;
        let local_addr = inner.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local_addr,
            accept_queue_capacity = config.accept_queue_capacity,
            "Listener bound"
        );

        Ok(Self { inner, local_addr })
    }

    /// Block until a client connects, returning it in non-blocking mode.
    pub fn accept(&self) -> Result<Accepted, ListenerError> {
        let (stream, peer) = self.inner.accept().map_err(ListenerError::Accept)?;
        stream.set_nonblocking(true).map_err(ListenerError::Accept)?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        tracing::debug!(peer = %peer, "Connection accepted");

        Ok(Accepted {
            stream: mio::net::TcpStream::from_std(stream),
            peer,
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept until shutdown or until the dispatcher goes away.
    pub fn run(self, queue: SyncSender<Accepted>, shutdown: Shutdown) {
        tracing::info!(address = %self.local_addr, "Waiting for client connections");

        loop {
            let accepted = self.accept();
            if shutdown.is_triggered() {
                tracing::info!("Listener received shutdown signal, exiting loop");
                break;
            }

            let accepted = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!(error = %e, "Accept failed");
                    std::thread::sleep(ACCEPT_ERROR_BACKOFF);
                    continue;
                }
            };
            metrics::record_connection_accepted();

            match queue.try_send(accepted) {
                Ok(()) => {}
                Err(TrySendError::Full(accepted)) => {
                    tracing::warn!(peer = %accepted.peer, "Accept queue full, waiting for dispatcher");
                    if let Err(rejected) = queue.send(accepted) {
                        tracing::error!(peer = %rejected.0.peer, "Dispatcher gone, closing client socket");
                        break;
                    }
                }
                Err(TrySendError::Disconnected(accepted)) => {
                    tracing::error!(peer = %accepted.peer, "Dispatcher gone, closing client socket");
                    break;
                }
            }
        }
    }
}

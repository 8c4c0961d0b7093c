//! One socket of a proxied pair plus its readiness bookkeeping.
//!
//! An endpoint records which readiness it wants (`arm` / `disarm`) during a
//! handler invocation and applies the change to the multiplexer once, in
//! [`Endpoint::sync`]. Re-registering with a changed interest makes the OS
//! re-evaluate readiness, so arming write interest on a writable socket
//! yields an event on the next poll.

use std::io::{self, ErrorKind};
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;

use mio::net::TcpStream;
use mio::{event::Event, Interest, Registry, Token};

use crate::net::connection::{ChannelState, ConnectionId, EndpointProbe, Role};

/// Readiness reported for an endpoint in the current worker cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

impl Readiness {
    pub fn from_event(event: &Event) -> Self {
        Self {
            readable: event.is_readable() || event.is_read_closed(),
            writable: event.is_writable() || event.is_write_closed(),
            error: event.is_error(),
        }
    }
}

/// Outcome of checking an in-flight non-blocking connect.
#[derive(Debug)]
pub enum ConnectStatus {
    Pending,
    Connected(SocketAddr),
    Failed(io::Error),
}

#[derive(Debug)]
pub struct Endpoint {
    stream: Option<TcpStream>,
    token: Token,
    state: ChannelState,
    interest: Option<Interest>,
    registered: bool,
    dirty: bool,
    ready: Readiness,
    probe: Arc<EndpointProbe>,
}

impl Endpoint {
    /// Wrap `stream`. It is registered with `interest` on the next `sync`.
    pub fn new(
        stream: TcpStream,
        token: Token,
        probe: Arc<EndpointProbe>,
        state: ChannelState,
        interest: Interest,
    ) -> Self {
        Self {
            stream: Some(stream),
            token,
            state,
            interest: Some(interest),
            registered: false,
            dirty: true,
            ready: Readiness::default(),
            probe,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.probe.id()
    }

    pub fn role(&self) -> Role {
        self.probe.role()
    }

    pub fn name(&self) -> &str {
        self.probe.name()
    }

    pub fn probe(&self) -> &Arc<EndpointProbe> {
        &self.probe
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    pub fn interest(&self) -> Option<Interest> {
        self.interest
    }

    pub fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        self.stream.as_mut()
    }

    pub fn set_readiness(&mut self, ready: Readiness) {
        self.ready = ready;
    }

    pub fn clear_readiness(&mut self) {
        self.ready = Readiness::default();
    }

    pub fn readiness(&self) -> Readiness {
        self.ready
    }

    /// Readable this cycle and still accepting input.
    pub fn is_readable(&self) -> bool {
        self.ready.readable && !self.state.input_closed && self.stream.is_some()
    }

    /// Writable this cycle and still producing output.
    pub fn is_writable(&self) -> bool {
        self.ready.writable && !self.state.output_closed && self.stream.is_some()
    }

    /// Watch for `interest` in addition to what is already armed.
    pub fn arm(&mut self, interest: Interest) {
        if self.stream.is_none() {
            return;
        }
        let mut wanted = interest;
        if interest.is_readable() && self.state.input_closed {
            wanted = match wanted.remove(Interest::READABLE) {
                Some(rest) => rest,
                None => return,
            };
        }
        if wanted.is_writable() && self.state.output_closed {
            wanted = match wanted.remove(Interest::WRITABLE) {
                Some(rest) => rest,
                None => return,
            };
        }
        let next = match self.interest {
            Some(current) => current | wanted,
            None => wanted,
        };
        self.set_interest(Some(next));
    }

    /// Stop watching for `interest`.
    pub fn disarm(&mut self, interest: Interest) {
        let next = self.interest.and_then(|current| current.remove(interest));
        self.set_interest(next);
    }

    fn set_interest(&mut self, next: Option<Interest>) {
        if self.interest != next {
            self.interest = next;
            self.dirty = true;
        }
    }

    /// Shut down the read half. Idempotent.
    pub fn close_input(&mut self) {
        if self.state.input_closed {
            return;
        }
        self.shutdown(Shutdown::Read);
        self.state.input_closed = true;
        self.disarm(Interest::READABLE);
        self.probe.publish(&self.state);
    }

    /// Shut down the write half. Idempotent.
    pub fn close_output(&mut self) {
        if self.state.output_closed {
            return;
        }
        self.shutdown(Shutdown::Write);
        self.state.output_closed = true;
        self.disarm(Interest::WRITABLE);
        self.probe.publish(&self.state);
    }

    /// Close both directions; the handle is released on the next cleanup.
    pub fn close(&mut self) {
        self.close_input();
        self.close_output();
    }

    fn shutdown(&self, how: Shutdown) {
        let Some(stream) = self.stream.as_ref() else {
            return;
        };
        if let Err(e) = stream.shutdown(how) {
            // The peer may already be gone; that is not worth more than debug.
            if e.kind() == ErrorKind::NotConnected {
                tracing::debug!(connection_id = %self.id(), peer = %self.name(), how = ?how, "Shutdown on disconnected socket");
            } else {
                tracing::error!(connection_id = %self.id(), peer = %self.name(), how = ?how, error = %e, "Failed to shut down socket");
            }
        }
    }

    /// Inspect an in-flight connect after a readiness event.
    pub fn poll_connect(&mut self) -> ConnectStatus {
        let Some(stream) = self.stream.as_ref() else {
            return ConnectStatus::Failed(io::Error::new(ErrorKind::NotConnected, "socket released"));
        };
        match stream.take_error() {
            Ok(Some(e)) | Err(e) => return ConnectStatus::Failed(e),
            Ok(None) => {}
        }
        match stream.peer_addr() {
            Ok(addr) => ConnectStatus::Connected(addr),
            Err(e) if e.kind() == ErrorKind::NotConnected => ConnectStatus::Pending,
            Err(e) => ConnectStatus::Failed(e),
        }
    }

    pub fn mark_connected(&mut self) {
        self.state.connected = true;
    }

    /// Apply any interest change to the multiplexer.
    pub fn sync(&mut self, registry: &Registry) -> io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let Some(stream) = self.stream.as_mut() else {
            self.dirty = false;
            return Ok(());
        };
        match (self.registered, self.interest) {
            (false, Some(interest)) => {
                registry.register(stream, self.token, interest)?;
                self.registered = true;
            }
            (true, Some(interest)) => registry.reregister(stream, self.token, interest)?,
            (true, None) => {
                registry.deregister(stream)?;
                self.registered = false;
            }
            (false, None) => {}
        }
        self.dirty = false;
        Ok(())
    }

    /// Close the handle once both directions are closed.
    ///
    /// Returns true only on the call that actually released it.
    pub fn release_if_closed(&mut self, registry: &Registry) -> bool {
        if !self.state.is_closed() {
            return false;
        }
        self.release(registry)
    }

    /// Deregister and close the handle regardless of half-close state.
    pub fn release(&mut self, registry: &Registry) -> bool {
        let Some(mut stream) = self.stream.take() else {
            return false;
        };
        if self.registered {
            if let Err(e) = registry.deregister(&mut stream) {
                tracing::debug!(connection_id = %self.id(), peer = %self.name(), error = %e, "Deregister failed");
            }
            self.registered = false;
        }
        self.state.input_closed = true;
        self.state.output_closed = true;
        self.interest = None;
        self.probe.publish(&self.state);
        self.probe.mark_released();
        tracing::trace!(connection_id = %self.id(), role = %self.role(), peer = %self.name(), "Socket released");
        true
    }

    pub fn is_released(&self) -> bool {
        self.stream.is_none()
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.probe.mark_released();
    }
}

//! Non-blocking transfer loops between an endpoint and a buffer.
//!
//! Readiness is edge-triggered, so both loops keep going until the socket
//! reports `WouldBlock` or the buffer can take no more.

use std::io::{self, ErrorKind};

use crate::buffer::{DirectionalBuffer, ReadStatus};
use crate::net::Endpoint;
use crate::observability::metrics;

/// How a fill pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// The socket has nothing more for now.
    Drained(usize),
    /// The buffer is full; the socket may still have data.
    Full(usize),
    /// The peer ended its output or the read failed.
    Eof(usize),
}

impl Fill {
    pub fn bytes(&self) -> usize {
        match *self {
            Fill::Drained(n) | Fill::Full(n) | Fill::Eof(n) => n,
        }
    }
}

/// How a drain pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// Every buffered byte was written.
    Flushed(usize),
    /// The socket stopped accepting bytes before the buffer emptied.
    Blocked(usize),
    /// The write failed; the peer is gone.
    Failed(usize),
}

impl Drain {
    pub fn bytes(&self) -> usize {
        match *self {
            Drain::Flushed(n) | Drain::Blocked(n) | Drain::Failed(n) => n,
        }
    }
}

/// Read from `endpoint` into `buffer` until the socket or the buffer runs dry.
pub fn fill(endpoint: &mut Endpoint, buffer: &mut DirectionalBuffer) -> Fill {
    let mut total = 0;
    loop {
        if buffer.is_full() {
            return Fill::Full(total);
        }
        let Some(stream) = endpoint.stream_mut() else {
            return Fill::Eof(total);
        };
        match buffer.read_from(stream) {
            Ok(ReadStatus::Read(0)) => return Fill::Full(total),
            Ok(ReadStatus::Read(n)) => total += n,
            Ok(ReadStatus::Eof) => {
                tracing::debug!(connection_id = %endpoint.id(), role = %endpoint.role(), peer = %endpoint.name(), "Got EOF");
                return Fill::Eof(total);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Fill::Drained(total),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                log_io_error(endpoint, "read", &e);
                return Fill::Eof(total);
            }
        }
    }
}

/// Write `buffer` into `endpoint` until it is empty or the socket pushes back.
pub fn drain(endpoint: &mut Endpoint, buffer: &mut DirectionalBuffer, direction: &'static str) -> Drain {
    let mut total = 0;
    let outcome = loop {
        if buffer.is_empty() {
            break Drain::Flushed(total);
        }
        let Some(stream) = endpoint.stream_mut() else {
            break Drain::Failed(total);
        };
        match buffer.write_to(stream) {
            Ok(0) => {
                let e = io::Error::new(ErrorKind::WriteZero, "socket accepted no bytes");
                log_io_error(endpoint, "write", &e);
                break Drain::Failed(total);
            }
            Ok(n) => total += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => break Drain::Blocked(total),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                log_io_error(endpoint, "write", &e);
                break Drain::Failed(total);
            }
        }
    };
    if total > 0 {
        metrics::record_bytes(direction, total);
    }
    outcome
}

/// Peer resets and broken pipes are routine for a proxy; anything else is not.
pub fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset | ErrorKind::BrokenPipe | ErrorKind::ConnectionAborted
    )
}

fn log_io_error(endpoint: &Endpoint, op: &'static str, e: &io::Error) {
    if is_disconnect(e) {
        tracing::debug!(connection_id = %endpoint.id(), role = %endpoint.role(), peer = %endpoint.name(), op, error = %e, "Peer disconnected");
    } else {
        tracing::error!(connection_id = %endpoint.id(), role = %endpoint.role(), peer = %endpoint.name(), op, error = %e, "Socket I/O failed");
    }
}

//! Byte shuttling between the two endpoints of a bridged pair.
//!
//! Both handlers use the same two moves with their roles swapped: the
//! client reads into upstream and writes from downstream, the host the
//! reverse.
//!
//! Read interest is dropped while the target buffer is full and restored
//! as soon as a write frees space. Write interest is dropped while the
//! source buffer is empty and restored by the next read into it.

use mio::Interest;

use crate::buffer::DirectionalBuffer;
use crate::net::Endpoint;
use crate::proxy::io::{self, Drain, Fill};

/// Bytes read by the client and written to the host.
pub const UPSTREAM: &str = "upstream";
/// Bytes read from the host and written to the client.
pub const DOWNSTREAM: &str = "downstream";

/// `source` is readable: move its bytes into `buffer` for `sink`.
///
/// Returns the number of bytes read.
pub fn forward_input(source: &mut Endpoint, sink: &mut Endpoint, buffer: &mut DirectionalBuffer) -> usize {
    if sink.state().output_closed {
        tracing::debug!(connection_id = %source.id(), role = %source.role(), "Peer output closed, closing input");
        source.close_input();
        return 0;
    }

    let fill = io::fill(source, buffer);
    match fill {
        Fill::Eof(_) => source.close_input(),
        Fill::Full(_) => source.disarm(Interest::READABLE),
        Fill::Drained(_) => {}
    }
    if !buffer.is_empty() || source.state().input_closed {
        sink.arm(Interest::WRITABLE);
    }
    fill.bytes()
}

/// `sink` is writable: flush `buffer`, which `source` fills.
///
/// Returns the number of bytes written.
pub fn flush_output(
    sink: &mut Endpoint,
    source: &mut Endpoint,
    buffer: &mut DirectionalBuffer,
    direction: &'static str,
) -> usize {
    if buffer.is_empty() {
        finish_or_idle(sink, source);
        return 0;
    }

    let drain = io::drain(sink, buffer, direction);
    if let Drain::Failed(_) = drain {
        sink.close_output();
        source.close_input();
        return drain.bytes();
    }

    if drain.bytes() > 0 {
        source.arm(Interest::READABLE);
    }
    if buffer.is_empty() {
        finish_or_idle(sink, source);
    }
    drain.bytes()
}

/// Nothing left to send: pass on the EOF if the source is done, otherwise
/// stop watching for writability until more data arrives.
fn finish_or_idle(sink: &mut Endpoint, source: &Endpoint) {
    if source.state().input_closed {
        tracing::debug!(connection_id = %sink.id(), role = %sink.role(), "Peer input closed and buffer drained, closing output");
        sink.close_output();
    } else {
        sink.disarm(Interest::WRITABLE);
    }
}

//! Client-side state machine.
//!
//! ```text
//! ParsingInitialRequest ── header complete, host socket opened ──▶ Bridging
//!         │
//!         └── EOF / malformed / unreachable ──▶ pair closed
//! ```

use mio::net::TcpStream;
use mio::Interest;

use crate::observability::metrics;
use crate::proxy::bridge::{self, DOWNSTREAM};
use crate::proxy::context::SharedConnectionContext;
use crate::proxy::io::{self, Fill};
use crate::proxy::request::{self, RequestError, RequestLine};
use crate::proxy::HandlerEnv;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    #[default]
    ParsingInitialRequest,
    Bridging,
}

impl ClientState {
    /// Run one transition for a readiness notification on the client socket.
    pub fn step(self, ctx: &mut SharedConnectionContext, env: &HandlerEnv<'_>) -> Self {
        match self {
            ClientState::ParsingInitialRequest => parse_initial_request(ctx, env),
            ClientState::Bridging => {
                relay(ctx);
                ClientState::Bridging
            }
        }
    }
}

/// Drives the client socket of one pair.
#[derive(Debug, Default)]
pub struct ClientHandler {
    state: ClientState,
}

impl ClientHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn handle(&mut self, ctx: &mut SharedConnectionContext, env: &HandlerEnv<'_>) {
        self.state = self.state.step(ctx, env);
    }
}

fn parse_initial_request(ctx: &mut SharedConnectionContext, _env: &HandlerEnv<'_>) -> ClientState {
    if !ctx.client.is_readable() {
        return ClientState::ParsingInitialRequest;
    }

    let fill = io::fill(&mut ctx.client, &mut ctx.buffers.upstream);
    ctx.touch(fill.bytes());
    let eof = matches!(fill, Fill::Eof(_));

    let Some(head) = request::find_header(ctx.buffers.upstream.view_reader()) else {
        if eof {
            tracing::debug!(connection_id = %ctx.id(), peer = %ctx.client.name(), "Client closed before sending a request");
            ctx.close_all();
        } else if ctx.buffers.upstream.is_full() {
            let capacity = ctx.buffers.upstream.capacity();
            reject(ctx, RequestError::HeaderTooLarge(capacity));
        } else {
            tracing::debug!(connection_id = %ctx.id(), buffered = ctx.buffers.upstream.size(), "Request header incomplete");
        }
        return ClientState::ParsingInitialRequest;
    };

    tracing::info!(connection_id = %ctx.id(), peer = %ctx.client.name(), request_line = %head.request_line, "Got initial request line");

    // The request arrived together with the client's FIN: treat it as a
    // half-close and pass it on once the buffered bytes reach the host.
    if eof {
        ctx.client.close_input();
    }

    let line = match RequestLine::parse(&head.request_line) {
        Ok(line) => line,
        Err(e) => {
            reject(ctx, e);
            return ClientState::ParsingInitialRequest;
        }
    };

    if line.is_connect() {
        ctx.mark_https();
        ctx.buffers.upstream.discard(head.len);
    }

    if let Err(e) = open_host(ctx, &line) {
        reject(ctx, e);
        return ClientState::ParsingInitialRequest;
    }

    // Nothing to read or write on the client until the host connects.
    ctx.client.disarm(Interest::READABLE);
    ClientState::Bridging
}

fn open_host(ctx: &mut SharedConnectionContext, line: &RequestLine) -> Result<(), RequestError> {
    let destination = line.destination()?;
    let addr = destination.resolve()?;
    let stream = TcpStream::connect(addr).map_err(|source| RequestError::Connect {
        destination: destination.to_string(),
        source,
    })?;

    tracing::debug!(connection_id = %ctx.id(), destination = %destination, address = %addr, https = ctx.is_https(), "Connecting to host");
    ctx.attach_host(stream, destination.to_string());
    Ok(())
}

fn reject(ctx: &mut SharedConnectionContext, e: RequestError) {
    if e.is_protocol_error() {
        tracing::error!(connection_id = %ctx.id(), peer = %ctx.client.name(), error = %e, "Rejecting client request");
        metrics::record_protocol_error(e.reason());
    } else {
        tracing::error!(connection_id = %ctx.id(), peer = %ctx.client.name(), error = %e, "Failed to open host connection");
        metrics::record_connect_failure();
    }
    ctx.close_all();
}

fn relay(ctx: &mut SharedConnectionContext) {
    let Some(host) = ctx.host.as_mut() else {
        return;
    };
    if !host.state().connected {
        return;
    }

    let mut moved = 0;
    if ctx.client.is_readable() {
        moved += bridge::forward_input(&mut ctx.client, host, &mut ctx.buffers.upstream);
    }
    if ctx.client.is_writable() {
        moved += bridge::flush_output(&mut ctx.client, host, &mut ctx.buffers.downstream, DOWNSTREAM);
    }
    ctx.touch(moved);
}

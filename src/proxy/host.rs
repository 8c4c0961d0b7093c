//! Host-side state machine.
//!
//! ```text
//! WaitForConnect ── connect completed ──▶ Bridging
//!       │
//!       └── connect failed ──▶ pair closed
//! ```

use mio::Interest;

use crate::net::ConnectStatus;
use crate::observability::metrics;
use crate::proxy::bridge::{self, UPSTREAM};
use crate::proxy::context::SharedConnectionContext;
use crate::proxy::request::CONNECT_ESTABLISHED;
use crate::proxy::HandlerEnv;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostState {
    #[default]
    WaitForConnect,
    Bridging,
}

impl HostState {
    /// Run one transition for a readiness notification on the host socket.
    pub fn step(self, ctx: &mut SharedConnectionContext, env: &HandlerEnv<'_>) -> Self {
        match self {
            HostState::WaitForConnect => wait_for_connect(ctx, env),
            HostState::Bridging => {
                relay(ctx);
                HostState::Bridging
            }
        }
    }
}

/// Drives the host socket of one pair.
#[derive(Debug, Default)]
pub struct HostHandler {
    state: HostState,
}

impl HostHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn handle(&mut self, ctx: &mut SharedConnectionContext, env: &HandlerEnv<'_>) {
        self.state = self.state.step(ctx, env);
    }
}

fn wait_for_connect(ctx: &mut SharedConnectionContext, env: &HandlerEnv<'_>) -> HostState {
    let id = ctx.id();
    let https = ctx.is_https();
    let Some(host) = ctx.host.as_mut() else {
        return HostState::WaitForConnect;
    };
    let ready = host.readiness();
    if !(ready.readable || ready.writable || ready.error) {
        return HostState::WaitForConnect;
    }

    let addr = match host.poll_connect() {
        ConnectStatus::Pending => return HostState::WaitForConnect,
        ConnectStatus::Failed(e) => {
            tracing::error!(connection_id = %id, destination = %host.name(), error = %e, "Failed to connect to host");
            metrics::record_connect_failure();
            ctx.close_all();
            return HostState::WaitForConnect;
        }
        ConnectStatus::Connected(addr) => addr,
    };

    host.mark_connected();
    host.arm(Interest::READABLE | Interest::WRITABLE);
    ctx.client.arm(Interest::READABLE | Interest::WRITABLE);

    if https {
        if let Err(e) = ctx.buffers.downstream.append(CONNECT_ESTABLISHED) {
            tracing::error!(connection_id = %id, error = %e, "No room for CONNECT response");
            ctx.close_all();
            return HostState::WaitForConnect;
        }
    }

    env.monitor.collect_channel_pair(ctx.client.probe(), host.probe());
    tracing::info!(connection_id = %id, destination = %host.name(), address = %addr, https, "Connected to host");
    HostState::Bridging
}

fn relay(ctx: &mut SharedConnectionContext) {
    let Some(host) = ctx.host.as_mut() else {
        return;
    };

    let mut moved = 0;
    if host.is_readable() {
        moved += bridge::forward_input(host, &mut ctx.client, &mut ctx.buffers.downstream);
    }
    if host.is_writable() {
        moved += bridge::flush_output(host, &mut ctx.client, &mut ctx.buffers.upstream, UPSTREAM);
    }
    ctx.touch(moved);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::monitor::{ChannelMonitor, Monitor};
    use crate::net::Readiness;
    use mio::net::TcpStream;
    use mio::Poll;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    struct Fixture {
        poll: Poll,
        ctx: SharedConnectionContext,
        _client_peer: std::net::TcpStream,
    }

    fn fixture(host: TcpStream, target: std::net::SocketAddr, https: bool) -> Fixture {
        let poll = Poll::new().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client_peer = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, addr) = listener.accept().unwrap();
        stream.set_nonblocking(true).unwrap();

        let pool = Arc::new(BufferPool::new(0, 8, 256));
        let mut ctx = SharedConnectionContext::new(5, TcpStream::from_std(stream), addr, &pool);
        if https {
            ctx.mark_https();
        }
        ctx.client.disarm(Interest::READABLE);
        ctx.attach_host(host, target.to_string());
        ctx.sync(poll.registry());
        Fixture { poll, ctx, _client_peer: client_peer }
    }

    fn step_until(
        fx: &mut Fixture,
        handler: &mut HostHandler,
        monitor: &dyn Monitor,
        done: impl Fn(&HostHandler, &SharedConnectionContext) -> bool,
    ) {
        let env = HandlerEnv { monitor };
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(handler, &fx.ctx) {
            assert!(Instant::now() < deadline, "host handler made no progress");
            let host = fx.ctx.host.as_mut().unwrap();
            host.set_readiness(Readiness { writable: true, ..Readiness::default() });
            handler.handle(&mut fx.ctx, &env);
            if let Some(host) = fx.ctx.host.as_mut() {
                host.clear_readiness();
            }
            fx.ctx.sync(fx.poll.registry());
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn connected_tunnel_queues_established_response() {
        let upstream = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let target = upstream.local_addr().unwrap();
        let mut fx = fixture(TcpStream::connect(target).unwrap(), target, true);
        let monitor = ChannelMonitor::new(None, false);

        let mut handler = HostHandler::new();
        step_until(&mut fx, &mut handler, &monitor, |h, _| h.state() == HostState::Bridging);

        let mut queued = Vec::new();
        std::io::Read::read_to_end(&mut fx.ctx.buffers().downstream.view_reader(), &mut queued).unwrap();
        assert_eq!(queued, CONNECT_ESTABLISHED);
        assert!(fx.ctx.host().unwrap().state().connected);
        assert_eq!(
            fx.ctx.client().interest(),
            Some(Interest::READABLE | Interest::WRITABLE)
        );
        assert_eq!(monitor.tracked(), 1);
    }

    #[test]
    fn plain_connect_writes_nothing_to_client() {
        let upstream = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let target = upstream.local_addr().unwrap();
        let mut fx = fixture(TcpStream::connect(target).unwrap(), target, false);
        let monitor = ChannelMonitor::new(None, false);

        let mut handler = HostHandler::new();
        step_until(&mut fx, &mut handler, &monitor, |h, _| h.state() == HostState::Bridging);
        assert!(fx.ctx.buffers().downstream.is_empty());
    }

    #[test]
    fn refused_connect_closes_both_sockets() {
        let refused = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        // Loopback may refuse synchronously; that path is handled when the
        // client opens the host socket.
        let Ok(stream) = TcpStream::connect(refused) else {
            return;
        };
        let mut fx = fixture(stream, refused, true);
        let monitor = ChannelMonitor::new(None, false);

        let mut handler = HostHandler::new();
        step_until(&mut fx, &mut handler, &monitor, |_, ctx| ctx.client().state().is_closed());

        assert_eq!(handler.state(), HostState::WaitForConnect);
        assert!(fx.ctx.host().unwrap().state().is_closed());
        assert!(fx.ctx.cleanup(fx.poll.registry()));
        assert_eq!(monitor.tracked(), 0);
    }
}

//! Worker threads.
//!
//! # Data Flow
//! ```text
//! Dispatcher (dispatcher.rs)
//!     → WorkerHandle::send(Register) + Waker::wake
//!
//! Worker thread, per cycle:
//!     → drain inbox (register sockets / shutdown)
//!     → Poll::poll (readiness, or idle sweep deadline)
//!     → ProxyConnection::handle per ready socket
//!     → idle sweep
//!     → publish open-socket count
//! ```
//!
//! # Design Decisions
//! - One `mio::Poll` per worker; every socket of a pair lives on one worker
//! - A worker that fails removes itself from the shared set and closes
//!   everything it owns; the dispatcher starts a replacement on demand

pub mod dispatcher;
pub mod handle;

use std::collections::HashMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use mio::{Events, Poll, Token, Waker};
use thiserror::Error;

use crate::buffer::BufferPool;
use crate::monitor::Monitor;
use crate::net::{Accepted, Readiness};
use crate::observability::metrics;
use crate::proxy::{decode_token, HandlerEnv, ProxyConnection, SharedConnectionContext};

pub use dispatcher::Dispatcher;
pub use handle::{Command, WorkerHandle};

/// Token reserved for the inbox waker. Its pair key is never allocated.
const WAKE_TOKEN: Token = Token(usize::MAX);

/// Bounds on how long a worker sleeps between idle sweeps.
const MIN_SWEEP: Duration = Duration::from_millis(100);
const MAX_SWEEP: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to create poll: {0}")]
    Poll(#[source] io::Error),

    #[error("failed to wake worker: {0}")]
    Wake(#[source] io::Error),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("worker {0} is gone")]
    Gone(usize),
}

/// Workers currently accepting connections.
pub type WorkerSet = Arc<Mutex<Vec<WorkerHandle>>>;

/// Lock the worker set, ignoring poisoning: the vector stays consistent
/// because every mutation is a single push or retain.
pub(crate) fn lock_workers(workers: &WorkerSet) -> MutexGuard<'_, Vec<WorkerHandle>> {
    workers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything a new worker needs besides its id.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub events_capacity: usize,
    pub idle_timeout: Option<Duration>,
    pub pool: Arc<BufferPool>,
    pub monitor: Arc<dyn Monitor>,
}

pub struct Worker {
    id: usize,
    name: String,
    poll: Poll,
    inbox: Receiver<Command>,
    connections: HashMap<usize, ProxyConnection>,
    next_key: usize,
    published: Arc<AtomicUsize>,
    workers: WorkerSet,
    settings: WorkerSettings,
}

impl Worker {
    /// Start a worker thread and return its handle.
    ///
    /// The caller adds the handle to `workers`; the worker removes it again
    /// if it dies.
    pub fn spawn(id: usize, settings: WorkerSettings, workers: WorkerSet) -> Result<WorkerHandle, WorkerError> {
        let poll = Poll::new().map_err(WorkerError::Poll)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN).map_err(WorkerError::Poll)?);
        let (tx, rx) = mpsc::channel();
        let published = Arc::new(AtomicUsize::new(0));
        let name = format!("worker-{id}");

        let handle = WorkerHandle::new(id, name.clone(), tx, waker, Arc::clone(&published));
        let worker = Worker {
            id,
            name: name.clone(),
            poll,
            inbox: rx,
            connections: HashMap::new(),
            next_key: 0,
            published,
            workers,
            settings,
        };

        thread::Builder::new()
            .name(name)
            .spawn(move || worker.run())
            .map_err(WorkerError::Spawn)?;

        Ok(handle)
    }

    fn run(mut self) {
        tracing::info!(worker = %self.name, "Worker started");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.event_loop()));
        match outcome {
            Ok(Ok(())) => tracing::info!(worker = %self.name, "Worker stopped"),
            Ok(Err(e)) => {
                tracing::error!(worker = %self.name, error = %e, "Worker failed");
                self.leave_worker_set();
            }
            Err(_) => {
                tracing::error!(worker = %self.name, "Worker panicked");
                self.leave_worker_set();
            }
        }

        self.close_all();
    }

    fn event_loop(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(self.settings.events_capacity);
        let sweep = self
            .settings
            .idle_timeout
            .map(|idle| (idle / 2).clamp(MIN_SWEEP, MAX_SWEEP));

        loop {
            if !self.drain_inbox() {
                return Ok(());
            }

            if let Err(e) = self.poll.poll(&mut events, sweep) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e);
            }

            for event in events.iter() {
                if event.token() == WAKE_TOKEN {
                    continue;
                }
                self.dispatch(event.token(), Readiness::from_event(event));
            }

            self.sweep_idle();
            self.publish_count();
        }
    }

    /// Apply queued commands. Returns false once the worker should stop.
    fn drain_inbox(&mut self) -> bool {
        loop {
            match self.inbox.try_recv() {
                Ok(Command::Register(accepted)) => self.register(accepted),
                Ok(Command::Shutdown) => {
                    tracing::info!(worker = %self.name, "Shutdown requested");
                    return false;
                }
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => {
                    tracing::info!(worker = %self.name, "Inbox closed");
                    return false;
                }
            }
        }
    }

    fn register(&mut self, accepted: Accepted) {
        let key = self.next_key;
        self.next_key += 1;

        let ctx = SharedConnectionContext::new(key, accepted.stream, accepted.peer, &self.settings.pool);
        tracing::debug!(worker = %self.name, connection_id = %ctx.id(), peer = %accepted.peer, "Registered client");

        let mut connection = ProxyConnection::new(ctx);
        if !connection.register(self.poll.registry()) {
            self.connections.insert(key, connection);
        }
        self.publish_count();
    }

    fn dispatch(&mut self, token: Token, ready: Readiness) {
        let (key, role) = decode_token(token);
        let Some(connection) = self.connections.get_mut(&key) else {
            return;
        };

        let env = HandlerEnv {
            monitor: self.settings.monitor.as_ref(),
        };
        if connection.handle(role, ready, &env, self.poll.registry()) {
            self.connections.remove(&key);
        }
    }

    fn sweep_idle(&mut self) {
        let Some(idle) = self.settings.idle_timeout else {
            return;
        };
        let now = Instant::now();
        let registry = self.poll.registry();
        self.connections.retain(|_, connection| {
            if connection.idle_for(now) < idle {
                return true;
            }
            tracing::info!(connection_id = %connection.context().id(), idle_secs = idle.as_secs(), "Closing idle connection");
            connection.abort(registry);
            false
        });
    }

    fn publish_count(&self) {
        let open = self.connections.values().map(ProxyConnection::open_sockets).sum();
        self.published.store(open, Ordering::Relaxed);
        metrics::set_buffers_in_use(self.settings.pool.in_use());
    }

    fn leave_worker_set(&self) {
        metrics::record_worker_failure();
        let mut workers = lock_workers(&self.workers);
        workers.retain(|handle| handle.id() != self.id);
        metrics::set_active_workers(workers.len());
    }

    fn close_all(&mut self) {
        let registry = self.poll.registry();
        let count = self.connections.len();
        for (_, mut connection) in self.connections.drain() {
            connection.abort(registry);
        }
        self.published.store(0, Ordering::Relaxed);
        if count > 0 {
            tracing::info!(worker = %self.name, pairs = count, "Closed remaining connections");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::NoopMonitor;
    use std::io::{Read, Write};

    fn settings(idle_timeout: Option<Duration>) -> WorkerSettings {
        WorkerSettings {
            events_capacity: 64,
            idle_timeout,
            pool: Arc::new(BufferPool::new(0, 16, 1024)),
            monitor: Arc::new(NoopMonitor),
        }
    }

    fn accepted(listener: &std::net::TcpListener) -> (Accepted, std::net::TcpStream) {
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, peer) = listener.accept().unwrap();
        stream.set_nonblocking(true).unwrap();
        (
            Accepted {
                stream: mio::net::TcpStream::from_std(stream),
                peer,
            },
            client,
        )
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn worker_relays_plain_request() {
        let origin = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let origin_addr = origin.local_addr().unwrap();
        let front = std::net::TcpListener::bind("127.0.0.1:0").unwrap();

        let workers: WorkerSet = Arc::default();
        let handle = Worker::spawn(0, settings(None), Arc::clone(&workers)).unwrap();
        lock_workers(&workers).push(handle.clone());

        let (socket, mut client) = accepted(&front);
        handle.send(Command::Register(socket)).unwrap();

        let request = format!("GET http://{origin_addr}/ HTTP/1.1\r\n\r\n");
        client.write_all(request.as_bytes()).unwrap();

        let (mut upstream, _) = origin.accept().unwrap();
        let mut received = vec![0u8; request.len()];
        upstream.read_exact(&mut received).unwrap();
        assert_eq!(received, request.as_bytes());

        upstream.write_all(b"HTTP/1.1 204 No Content\r\n\r\n").unwrap();
        drop(upstream);

        let mut response = Vec::new();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        client.read_to_end(&mut response).unwrap();
        assert_eq!(response, b"HTTP/1.1 204 No Content\r\n\r\n");

        handle.send(Command::Shutdown).unwrap();
    }

    #[test]
    fn idle_pairs_are_closed() {
        let front = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let workers: WorkerSet = Arc::default();
        let handle = Worker::spawn(1, settings(Some(Duration::from_millis(200))), workers).unwrap();

        let (socket, mut client) = accepted(&front);
        handle.send(Command::Register(socket)).unwrap();
        wait_for(|| handle.connection_count() == 1);

        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).unwrap_or(0), 0);
        wait_for(|| handle.connection_count() == 0);

        handle.send(Command::Shutdown).unwrap();
    }

    #[test]
    fn shutdown_closes_open_clients() {
        let front = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let workers: WorkerSet = Arc::default();
        let handle = Worker::spawn(2, settings(None), workers).unwrap();

        let (socket, mut client) = accepted(&front);
        handle.send(Command::Register(socket)).unwrap();
        wait_for(|| handle.connection_count() == 1);

        handle.send(Command::Shutdown).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).unwrap_or(0), 0);
    }
}

//! The dispatcher's view of a running worker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use mio::Waker;

use crate::net::Accepted;
use crate::worker::WorkerError;

/// Message delivered to a worker's inbox.
#[derive(Debug)]
pub enum Command {
    /// Take ownership of an accepted client socket.
    Register(Accepted),
    /// Close every socket and stop.
    Shutdown,
}

/// Handle to one worker thread.
///
/// Clones share the inbox, the waker and the connection count.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    id: usize,
    name: String,
    inbox: Sender<Command>,
    waker: Arc<Waker>,
    connections: Arc<AtomicUsize>,
}

impl WorkerHandle {
    pub(crate) fn new(
        id: usize,
        name: String,
        inbox: Sender<Command>,
        waker: Arc<Waker>,
        connections: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            id,
            name,
            inbox,
            waker,
            connections,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open sockets last published by the worker. Advisory only.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Queue `command` and wake the worker's poll.
    pub fn send(&self, command: Command) -> Result<(), WorkerError> {
        self.inbox.send(command).map_err(|_| WorkerError::Gone(self.id))?;
        self.waker.wake().map_err(WorkerError::Wake)
    }

    /// Count a handed-off client before the worker republishes its total,
    /// so a burst of accepts does not all land on one worker.
    pub(crate) fn note_dispatched(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }
}

//! Hands accepted sockets to workers.

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use crate::config::WorkerConfig;
use crate::load_balancer::{self, LoadBalancer};
use crate::net::Accepted;
use crate::observability::metrics;
use crate::worker::{lock_workers, Command, Worker, WorkerSet, WorkerSettings};

/// Single consumer of the accept queue.
pub struct Dispatcher {
    queue: Receiver<Accepted>,
    workers: WorkerSet,
    max_workers: usize,
    balancer: Box<dyn LoadBalancer>,
    settings: WorkerSettings,
    next_worker_id: usize,
}

impl Dispatcher {
    pub fn new(queue: Receiver<Accepted>, config: &WorkerConfig, settings: WorkerSettings) -> Self {
        Self {
            queue,
            workers: WorkerSet::default(),
            max_workers: config.count,
            balancer: load_balancer::from_strategy(config.strategy),
            settings,
            next_worker_id: 0,
        }
    }

    /// Shared view of the live workers.
    pub fn workers(&self) -> WorkerSet {
        Arc::clone(&self.workers)
    }

    /// Dispatch until the listener drops its end of the queue.
    pub fn run(mut self) {
        tracing::info!(max_workers = self.max_workers, "Dispatcher started");

        while let Ok(accepted) = self.queue.recv() {
            self.dispatch(accepted);
        }

        tracing::info!("Accept queue closed, stopping workers");
        let workers = std::mem::take(&mut *lock_workers(&self.workers));
        for worker in &workers {
            if let Err(e) = worker.send(Command::Shutdown) {
                tracing::debug!(worker = %worker.name(), error = %e, "Worker already stopped");
            }
        }
        metrics::set_active_workers(0);
        tracing::info!("Dispatcher stopped");
    }

    fn dispatch(&mut self, accepted: Accepted) {
        let mut workers = lock_workers(&self.workers);

        if workers.len() < self.max_workers {
            let id = self.next_worker_id;
            match Worker::spawn(id, self.settings.clone(), Arc::clone(&self.workers)) {
                Ok(handle) => {
                    self.next_worker_id += 1;
                    workers.push(handle);
                    metrics::set_active_workers(workers.len());
                    tracing::info!(worker_id = id, live = workers.len(), "Started worker");
                }
                Err(e) => tracing::error!(error = %e, "Failed to start worker"),
            }
        }

        let loads: Vec<usize> = workers.iter().map(|worker| worker.connection_count()).collect();
        let Some(target) = self.balancer.next_index(&loads).and_then(|index| workers.get(index)) else {
            tracing::error!(peer = %accepted.peer, "No worker available, dropping connection");
            return;
        };

        let peer = accepted.peer;
        target.note_dispatched();
        match target.send(Command::Register(accepted)) {
            Ok(()) => {
                tracing::debug!(peer = %peer, worker = %target.name(), ?loads, "Dispatched connection");
            }
            Err(e) => {
                tracing::error!(peer = %peer, worker = %target.name(), error = %e, "Failed to hand off connection");
            }
        }
    }
}

//! Server assembly: listener → dispatcher → workers.
//!
//! # Responsibilities
//! - Validate configuration and build the shared buffer pool
//! - Bind the listener and start the listener, dispatcher and reporter
//!   threads
//! - Hand back a [`ProxyHandle`] for shutdown and joining

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream};
use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

use crate::buffer::BufferPool;
use crate::config::{validate_config, ProxyConfig, ValidationError};
use crate::lifecycle::Shutdown;
use crate::monitor::reporter::spawn_reporter;
use crate::monitor::{ChannelMonitor, Monitor, NoopMonitor};
use crate::net::{Listener, ListenerError};
use crate::worker::{Dispatcher, WorkerSettings};

const WAKE_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {}", format_validation(.0))]
    Config(Vec<ValidationError>),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },
}

fn format_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A configured, not yet started proxy.
pub struct ProxyServer {
    config: ProxyConfig,
    pool: Arc<BufferPool>,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig) -> Self {
        let pool = Arc::new(BufferPool::new(
            config.buffers.min_buffers,
            config.buffers.max_buffers,
            config.buffers.size,
        ));
        Self { config, pool }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// The pool every pair takes its buffers from.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// The monitor implied by `monitor.enabled` / `monitor.debug`.
    pub fn configured_monitor(&self) -> Arc<dyn Monitor> {
        if self.config.monitor.enabled {
            Arc::new(ChannelMonitor::new(Some(Arc::clone(&self.pool)), self.config.monitor.debug))
        } else {
            Arc::new(NoopMonitor)
        }
    }

    /// Bind and start serving. Returns once every thread is running.
    pub fn start(self, monitor: Arc<dyn Monitor>) -> Result<ProxyHandle, ServerError> {
        validate_config(&self.config).map_err(ServerError::Config)?;

        let listener = Listener::bind(&self.config.listener)?;
        let local_addr = listener.local_addr();
        let shutdown = Shutdown::new();

        let (queue_tx, queue_rx) = sync_channel(self.config.listener.accept_queue_capacity);
        let idle_timeout = match self.config.timeouts.idle_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let settings = WorkerSettings {
            events_capacity: self.config.workers.events_capacity,
            idle_timeout,
            pool: Arc::clone(&self.pool),
            monitor: Arc::clone(&monitor),
        };
        let dispatcher = Dispatcher::new(queue_rx, &self.config.workers, settings);

        let mut handle = ProxyHandle {
            local_addr,
            shutdown: shutdown.clone(),
            pool: Arc::clone(&self.pool),
            threads: Vec::new(),
        };

        handle.threads.push(spawn("dispatcher", move || dispatcher.run())?);

        let listener_shutdown = shutdown.clone();
        handle
            .threads
            .push(spawn("listener", move || listener.run(queue_tx, listener_shutdown))?);

        if self.config.monitor.enabled {
            let interval = Duration::from_secs(self.config.monitor.update_interval_secs);
            let reporter = spawn_reporter(monitor, interval, shutdown)
                .map_err(|source| ServerError::Spawn { name: "monitor", source })?;
            handle.threads.push(reporter);
        }

        tracing::info!(
            address = %local_addr,
            max_workers = self.config.workers.count,
            buffer_size = self.config.buffers.size,
            "Proxy started"
        );
        Ok(handle)
    }
}

fn spawn<F>(name: &'static str, f: F) -> Result<JoinHandle<()>, ServerError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.into())
        .spawn(f)
        .map_err(|source| ServerError::Spawn { name, source })
}

/// A running proxy.
///
/// Dropping the handle shuts the proxy down.
#[derive(Debug)]
pub struct ProxyHandle {
    local_addr: SocketAddr,
    shutdown: Shutdown,
    pool: Arc<BufferPool>,
    threads: Vec<JoinHandle<()>>,
}

impl ProxyHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// A trigger that stops this proxy from another thread, such as a
    /// signal handler.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            local_addr: self.local_addr,
            shutdown: self.shutdown.clone(),
        }
    }

    /// Stop accepting, stop every worker and join the server threads.
    pub fn shutdown(mut self) {
        self.stop();
    }

    /// Block until the server threads exit.
    pub fn wait(mut self) {
        self.join();
    }

    fn stop(&mut self) {
        self.stop_handle().stop();
        self.join();
    }

    fn join(&mut self) {
        for thread in self.threads.drain(..) {
            let name = thread.thread().name().unwrap_or("unnamed").to_string();
            if thread.join().is_err() {
                tracing::error!(thread = %name, "Server thread panicked");
            }
        }
    }
}

/// Cloneable shutdown trigger for a running proxy.
#[derive(Debug, Clone)]
pub struct StopHandle {
    local_addr: SocketAddr,
    shutdown: Shutdown,
}

impl StopHandle {
    /// Trigger shutdown and wake the listener. Does not wait for threads.
    pub fn stop(&self) {
        if self.shutdown.trigger() {
            tracing::info!("Shutting down proxy");
            self.wake_listener();
        }
    }

    /// The listener blocks in accept; a throwaway connection lets it see
    /// the trigger.
    fn wake_listener(&self) {
        let mut target = self.local_addr;
        if target.ip().is_unspecified() {
            let loopback = match target.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            };
            target.set_ip(loopback);
        }
        if let Err(e) = TcpStream::connect_timeout(&target, WAKE_CONNECT_TIMEOUT) {
            tracing::debug!(address = %target, error = %e, "Listener wake-up connect failed");
        }
    }
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListenerConfig;

    fn local_config() -> ProxyConfig {
        ProxyConfig {
            listener: ListenerConfig {
                bind_address: "127.0.0.1".into(),
                port: 0,
                ..ListenerConfig::default()
            },
            ..ProxyConfig::default()
        }
    }

    #[test]
    fn invalid_config_is_rejected_before_binding() {
        let mut config = local_config();
        config.buffers.size = 0;
        let server = ProxyServer::new(config);
        let monitor = server.configured_monitor();
        let err = server.start(monitor).unwrap_err();
        assert!(matches!(err, ServerError::Config(ref errors) if !errors.is_empty()));
        assert!(err.to_string().starts_with("invalid configuration"));
    }

    #[test]
    fn starts_and_shuts_down() {
        let server = ProxyServer::new(local_config());
        let monitor = server.configured_monitor();
        let handle = server.start(monitor).unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        handle.shutdown();
    }

    #[test]
    fn stop_handle_ends_wait_from_another_thread() {
        let server = ProxyServer::new(local_config());
        let monitor = server.configured_monitor();
        let handle = server.start(monitor).unwrap();
        let addr = handle.local_addr();
        let stopper = handle.stop_handle();

        let trigger = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            stopper.stop();
            stopper.stop();
        });
        handle.wait();
        trigger.join().unwrap();

        assert!(std::net::TcpStream::connect_timeout(&addr, Duration::from_millis(200)).is_err());
    }

    #[test]
    fn monitor_follows_config() {
        let mut config = local_config();
        config.monitor.enabled = true;
        let server = ProxyServer::new(config);
        let monitor = server.configured_monitor();
        assert!(format!("{monitor:?}").starts_with("ChannelMonitor"));
    }
}

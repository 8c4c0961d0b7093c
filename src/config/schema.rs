//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the forwarding proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, port, accept queue).
    pub listener: ListenerConfig,

    /// Worker pool sizing and load balancing.
    pub workers: WorkerConfig,

    /// Per-connection buffer sizing and pool bounds.
    pub buffers: BufferConfig,

    /// Active-connection monitor.
    pub monitor: MonitorConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface to bind (e.g., "0.0.0.0").
    pub bind_address: String,

    /// TCP port to listen on. 0 picks an ephemeral port.
    pub port: u16,

    /// Capacity of the queue between the listener and the dispatcher.
    pub accept_queue_capacity: usize,
}

impl ListenerConfig {
    /// The `host:port` string handed to the socket layer.
    pub fn socket_address(&self) -> String {
        if self.bind_address.contains(':') {
            format!("[{}]:{}", self.bind_address, self.port)
        } else {
            format!("{}:{}", self.bind_address, self.port)
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 9999,
            accept_queue_capacity: 1024,
        }
    }
}

/// Strategy used by the dispatcher to pick a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStrategy {
    /// Worker with the fewest open sockets.
    #[default]
    LeastConnections,
    /// Rotate through workers.
    RoundRobin,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum number of worker threads. Workers are started lazily.
    pub count: usize,

    /// Load balancing strategy.
    pub strategy: BalanceStrategy,

    /// Readiness events fetched per poll.
    pub events_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            strategy: BalanceStrategy::LeastConnections,
            events_capacity: 1024,
        }
    }
}

/// Buffer configuration.
///
/// Each proxied pair holds two buffers: upstream (client -> host) and
/// downstream (host -> client).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Size of one directional buffer in bytes.
    pub size: usize,

    /// Buffers allocated up front.
    pub min_buffers: usize,

    /// Upper bound on pooled allocations. Beyond it, buffers are plain
    /// heap allocations that are not returned to the pool.
    pub max_buffers: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            size: 10 * 1024,
            min_buffers: 64,
            max_buffers: 4096,
        }
    }
}

/// Monitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Track active pairs and periodically log a report.
    pub enabled: bool,

    /// Include per-direction half-close state in reports.
    pub debug: bool,

    /// Report interval in seconds.
    pub update_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debug: false,
            update_interval_secs: 20,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Close pairs that moved no bytes for this many seconds. 0 disables.
    pub idle_secs: u64,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

//! Forwarding HTTP/CONNECT proxy
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────────┐
//!                 │                      FORWARD PROXY                        │
//!                 │                                                           │
//!   Client ───────┼─▶ ┌──────────┐  queue  ┌────────────┐  inbox  ┌────────┐  │
//!                 │   │ listener │───────▶│ dispatcher │───────▶│ worker │──┼──▶ Host
//!                 │   └──────────┘        └────────────┘  +wake  │  poll  │  │
//!                 │                                              └────────┘  │
//!                 │                                         client ⇄ buffers ⇄ host
//!                 │                                                           │
//!                 │   ┌────────┐ ┌────────┐ ┌─────────┐ ┌───────────────────┐ │
//!                 │   │ config │ │ buffer │ │ monitor │ │   observability   │ │
//!                 │   │        │ │  pool  │ │         │ │ tracing + metrics │ │
//!                 │   └────────┘ └────────┘ └─────────┘ └───────────────────┘ │
//!                 └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use forward_proxy::config::{load_config, BalanceStrategy, ProxyConfig};
use forward_proxy::observability::{logging, metrics};
use forward_proxy::ProxyServer;

#[derive(Parser, Debug)]
#[command(name = "forward-proxy")]
#[command(about = "Forwarding HTTP/CONNECT proxy", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on.
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum number of worker threads.
    #[arg(short, long)]
    workers: Option<usize>,

    /// Worker selection strategy.
    #[arg(long, value_enum)]
    strategy: Option<Strategy>,

    /// Size of each directional buffer in bytes.
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Buffers allocated at startup.
    #[arg(long)]
    min_buffers: Option<usize>,

    /// Maximum pooled buffers.
    #[arg(long)]
    max_buffers: Option<usize>,

    /// Periodically log active connection pairs.
    #[arg(long)]
    monitor: bool,

    /// Include half-close state in monitor reports.
    #[arg(long)]
    debug: bool,

    /// Seconds between monitor reports.
    #[arg(long)]
    update_interval: Option<u64>,

    /// Close pairs idle for this many seconds (0 disables).
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Log level when RUST_LOG is unset.
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum Strategy {
    LeastConnections,
    RoundRobin,
}

impl From<Strategy> for BalanceStrategy {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::LeastConnections => BalanceStrategy::LeastConnections,
            Strategy::RoundRobin => BalanceStrategy::RoundRobin,
        }
    }
}

impl Cli {
    fn apply(self, config: &mut ProxyConfig) {
        if let Some(bind) = self.bind {
            config.listener.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(workers) = self.workers {
            config.workers.count = workers;
        }
        if let Some(strategy) = self.strategy {
            config.workers.strategy = strategy.into();
        }
        if let Some(size) = self.buffer_size {
            config.buffers.size = size;
        }
        if let Some(min) = self.min_buffers {
            config.buffers.min_buffers = min;
        }
        if let Some(max) = self.max_buffers {
            config.buffers.max_buffers = max;
        }
        if self.monitor {
            config.monitor.enabled = true;
        }
        if self.debug {
            config.monitor.debug = true;
        }
        if let Some(interval) = self.update_interval {
            config.monitor.update_interval_secs = interval;
        }
        if let Some(idle) = self.idle_timeout {
            config.timeouts.idle_secs = idle;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match cli.config.as_deref() {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    cli.apply(&mut config);

    logging::init(&config.observability);
    tracing::info!("forward-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        port = config.listener.port,
        workers = config.workers.count,
        buffer_size = config.buffers.size,
        min_buffers = config.buffers.min_buffers,
        max_buffers = config.buffers.max_buffers,
        monitor = config.monitor.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let server = ProxyServer::new(config);
    let monitor = server.configured_monitor();
    let handle = server.start(monitor)?;

    let stopper = handle.stop_handle();
    ctrlc::set_handler(move || {
        tracing::info!("Received shutdown signal");
        stopper.stop();
    })?;
    handle.wait();

    tracing::info!("Shutdown complete");
    Ok(())
}

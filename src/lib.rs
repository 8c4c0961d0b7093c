//! Forwarding HTTP/CONNECT proxy on readiness-multiplexed worker threads.

pub mod buffer;
pub mod config;
pub mod lifecycle;
pub mod load_balancer;
pub mod monitor;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod server;
pub mod worker;

pub use config::schema::ProxyConfig;
pub use lifecycle::Shutdown;
pub use monitor::{ChannelMonitor, Monitor, NoopMonitor};
pub use server::{ProxyHandle, ProxyServer, ServerError, StopHandle};

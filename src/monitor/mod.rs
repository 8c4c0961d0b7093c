//! Active connection monitor.
//!
//! # Data Flow
//! ```text
//! Host connect completes (worker thread)
//!     → Monitor::collect_channel_pair(client probe, host probe)
//!
//! Reporter thread (reporter.rs), every update interval:
//!     → Monitor::report() prunes pairs whose sockets are both released
//!     → JSON report logged
//! ```
//!
//! # Design Decisions
//! - The monitor is injected into the server, never looked up globally
//! - Workers only touch it once per pair; probes are atomics, so reports
//!   never lock a worker's sockets

pub mod reporter;

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::buffer::BufferPool;
use crate::net::{ConnectionId, EndpointProbe};

/// Collaborator notified of bridged pairs.
pub trait Monitor: Send + Sync + fmt::Debug {
    /// Record a pair that reached the bridging state.
    fn collect_channel_pair(&self, client: &Arc<EndpointProbe>, host: &Arc<EndpointProbe>);

    /// Snapshot of tracked pairs, dropping the fully released ones.
    fn report(&self) -> MonitorReport;
}

/// Monitor used when monitoring is disabled.
#[derive(Debug, Default)]
pub struct NoopMonitor;

impl Monitor for NoopMonitor {
    fn collect_channel_pair(&self, _client: &Arc<EndpointProbe>, _host: &Arc<EndpointProbe>) {}

    fn report(&self) -> MonitorReport {
        MonitorReport::default()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorReport {
    pub active_pairs: usize,
    pub pairs: Vec<PairReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffers_in_use: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PairReport {
    pub connection_id: u64,
    pub client: EndpointReport,
    pub host: EndpointReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointReport {
    pub name: String,
    pub open: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_closed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_closed: Option<bool>,
}

impl EndpointReport {
    fn from_probe(probe: &EndpointProbe, debug: bool) -> Self {
        Self {
            name: probe.name().to_string(),
            open: probe.is_open(),
            input_closed: debug.then(|| probe.is_input_closed()),
            output_closed: debug.then(|| probe.is_output_closed()),
        }
    }
}

/// Monitor that tracks every bridged pair until both sockets are released.
#[derive(Debug)]
pub struct ChannelMonitor {
    pairs: DashMap<ConnectionId, (Arc<EndpointProbe>, Arc<EndpointProbe>)>,
    pool: Option<Arc<BufferPool>>,
    debug: bool,
}

impl ChannelMonitor {
    pub fn new(pool: Option<Arc<BufferPool>>, debug: bool) -> Self {
        Self {
            pairs: DashMap::new(),
            pool,
            debug,
        }
    }

    /// Pairs currently tracked, including ones not yet pruned.
    pub fn tracked(&self) -> usize {
        self.pairs.len()
    }
}

impl Monitor for ChannelMonitor {
    fn collect_channel_pair(&self, client: &Arc<EndpointProbe>, host: &Arc<EndpointProbe>) {
        self.pairs
            .insert(client.id(), (Arc::clone(client), Arc::clone(host)));
    }

    fn report(&self) -> MonitorReport {
        self.pairs
            .retain(|_, (client, host)| client.is_open() || host.is_open());

        let mut pairs: Vec<PairReport> = self
            .pairs
            .iter()
            .map(|entry| {
                let (client, host) = entry.value();
                PairReport {
                    connection_id: entry.key().as_u64(),
                    client: EndpointReport::from_probe(client, self.debug),
                    host: EndpointReport::from_probe(host, self.debug),
                }
            })
            .collect();
        pairs.sort_by_key(|pair| pair.connection_id);

        MonitorReport {
            active_pairs: pairs.len(),
            pairs,
            buffers_in_use: self.pool.as_ref().map(|pool| pool.in_use()),
        }
    }
}

//! Worker selection.
//!
//! # Data Flow
//! ```text
//! Dispatcher receives an accepted socket
//!     → snapshot each worker's open-socket count
//!     → Apply selection algorithm:
//!         - least_conn.rs (pick the worker with the fewest sockets)
//!         - round_robin.rs (rotate through workers)
//!     → index of the worker that gets the socket
//! ```
//!
//! # Design Decisions
//! - Balancers see only a slice of loads, never the workers themselves
//! - Counts are advisory snapshots; a worker may change them concurrently

pub mod least_conn;
pub mod round_robin;

use crate::config::BalanceStrategy;

pub use least_conn::LeastConnections;
pub use round_robin::RoundRobin;

/// Picks which worker receives the next connection.
pub trait LoadBalancer: Send + std::fmt::Debug {
    /// Index into `loads` of the chosen worker, or `None` if there is none.
    fn next_index(&self, loads: &[usize]) -> Option<usize>;
}

/// Build the balancer for a configured strategy.
pub fn from_strategy(strategy: BalanceStrategy) -> Box<dyn LoadBalancer> {
    match strategy {
        BalanceStrategy::LeastConnections => Box::new(LeastConnections::new()),
        BalanceStrategy::RoundRobin => Box::new(RoundRobin::new()),
    }
}

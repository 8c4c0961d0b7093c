//! Least Connections selection strategy.

use crate::load_balancer::LoadBalancer;

/// Least connections selector.
/// Selects the worker with the minimum number of open sockets.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for LeastConnections {
    fn next_index(&self, loads: &[usize]) -> Option<usize> {
        // In case of tie, the first one is selected (stability)
        loads
            .iter()
            .enumerate()
            .min_by_key(|(_, load)| **load)
            .map(|(index, _)| index)
    }
}

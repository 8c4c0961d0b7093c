//! Round-robin selection strategy.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::load_balancer::LoadBalancer;

/// Round-robin selector.
/// Stores an internal counter to rotate through workers.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_index(&self, loads: &[usize]) -> Option<usize> {
        if loads.is_empty() {
            return None;
        }
        Some(self.counter.fetch_add(1, Ordering::Relaxed) % loads.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let loads = [5, 0];

        assert_eq!(lb.next_index(&loads), Some(0));
        assert_eq!(lb.next_index(&loads), Some(1));
        assert_eq!(lb.next_index(&loads), Some(0));
        assert_eq!(lb.next_index(&[]), None);
    }
}

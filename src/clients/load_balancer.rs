use crate::config::LoadBalanceStrategy;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Selects pool members for the alb provider
#[derive(Debug, Clone)]
pub struct LoadBalancer {
    size: usize,
    strategy: LoadBalanceStrategy,
    round_robin_counter: Arc<AtomicUsize>,
    connection_counts: Arc<Vec<AtomicUsize>>,
}

/// In-flight marker for one selected member; released on drop
#[derive(Debug)]
pub struct Selection {
    index: usize,
    connection_counts: Arc<Vec<AtomicUsize>>,
}

impl Selection {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for Selection {
    fn drop(&mut self) {
        if let Some(count) = self.connection_counts.get(self.index) {
            count.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

impl LoadBalancer {
    pub fn new(size: usize, strategy: LoadBalanceStrategy) -> Self {
        Self {
            size,
            strategy,
            round_robin_counter: Arc::new(AtomicUsize::new(0)),
            connection_counts: Arc::new((0..size).map(|_| AtomicUsize::new(0)).collect()),
        }
    }

    pub fn strategy(&self) -> LoadBalanceStrategy {
        self.strategy
    }

    /// Pick a member; `None` when the pool is empty
    pub fn select(&self) -> Option<Selection> {
        if self.size == 0 {
            return None;
        }

        let index = match self.strategy {
            LoadBalanceStrategy::RoundRobin => self.round_robin(),
            LoadBalanceStrategy::Random => rand::thread_rng().gen_range(0..self.size),
            LoadBalanceStrategy::LeastConnections => self.least_connections(),
        };

        self.connection_counts[index].fetch_add(1, Ordering::Relaxed);
        Some(Selection {
            index,
            connection_counts: self.connection_counts.clone(),
        })
    }

    /// Requests currently in flight to a member
    pub fn in_flight(&self, index: usize) -> usize {
        self.connection_counts
            .get(index)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn round_robin(&self) -> usize {
        self.round_robin_counter.fetch_add(1, Ordering::Relaxed) % self.size
    }

    fn least_connections(&self) -> usize {
        self.connection_counts
            .iter()
            .enumerate()
            .min_by_key(|(_, count)| count.load(Ordering::Relaxed))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin() {
        let lb = LoadBalancer::new(3, LoadBalanceStrategy::RoundRobin);

        let picks: Vec<usize> = (0..4).map(|_| lb.select().unwrap().index()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_random() {
        let lb = LoadBalancer::new(3, LoadBalanceStrategy::Random);
        for _ in 0..10 {
            assert!(lb.select().unwrap().index() < 3);
        }
    }

    #[test]
    fn test_least_connections() {
        let lb = LoadBalancer::new(2, LoadBalanceStrategy::LeastConnections);

        let first = lb.select().unwrap();
        assert_eq!(first.index(), 0);
        assert_eq!(lb.in_flight(0), 1);

        // member 0 is busy, so member 1 is chosen
        let second = lb.select().unwrap();
        assert_eq!(second.index(), 1);

        drop(first);
        assert_eq!(lb.in_flight(0), 0);
        assert_eq!(lb.select().unwrap().index(), 0);
    }

    #[test]
    fn test_empty_pool() {
        let lb = LoadBalancer::new(0, LoadBalanceStrategy::RoundRobin);
        assert!(lb.select().is_none());
    }
}

//! # Instance Selection
//!
//! Discovery answers "give me one healthy instance of type X". The candidates handed to
//! a balancer are already filtered by the liveness predicate; the balancer only decides
//! which of them to return.
//!
//! ## Rust Concepts Used
//!
//! - `AtomicUsize` keeps the round-robin cursor lock-free across request handlers
//! - `Send + Sync` lets one balancer instance serve every request concurrently

use metrics::counter;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use crate::discovery::ServiceInfo;
use crate::observability::metrics::DISCOVERY_SELECTIONS_TOTAL;

/// Picks one instance out of a set of live candidates
pub trait LoadBalancer: Send + Sync {
    /// Index of the selected instance, `None` when `instances` is empty
    fn select_instance(&self, instances: &[ServiceInfo]) -> Option<usize>;

    fn algorithm_name(&self) -> &'static str;
}

fn record_selection(algorithm: &'static str, selected: &ServiceInfo) {
    counter!(DISCOVERY_SELECTIONS_TOTAL, "algorithm" => algorithm).increment(1);
    debug!(
        service_type = %selected.service_type,
        service_id = %selected.service_id,
        algorithm = algorithm,
        "Selected service instance"
    );
}

/// Always the first candidate
#[derive(Debug, Default)]
pub struct FirstAvailableBalancer;

impl LoadBalancer for FirstAvailableBalancer {
    fn select_instance(&self, instances: &[ServiceInfo]) -> Option<usize> {
        let selected = instances.first()?;
        record_selection(self.algorithm_name(), selected);
        Some(0)
    }

    fn algorithm_name(&self) -> &'static str {
        "first"
    }
}

/// Cycles through candidates with an atomic cursor
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn select_instance(&self, instances: &[ServiceInfo]) -> Option<usize> {
        if instances.is_empty() {
            return None;
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % instances.len();
        record_selection(self.algorithm_name(), &instances[index]);
        Some(index)
    }

    fn algorithm_name(&self) -> &'static str {
        "round_robin"
    }
}

/// Weighted random choice; instances with weight 0 are only picked when every weight is 0
#[derive(Debug, Default)]
pub struct WeightedBalancer;

impl LoadBalancer for WeightedBalancer {
    fn select_instance(&self, instances: &[ServiceInfo]) -> Option<usize> {
        if instances.is_empty() {
            return None;
        }

        let total_weight: u64 = instances.iter().map(|i| u64::from(i.weight)).sum();
        let mut rng = rand::thread_rng();

        if total_weight == 0 {
            let index = rng.gen_range(0..instances.len());
            record_selection(self.algorithm_name(), &instances[index]);
            return Some(index);
        }

        let mut remaining = rng.gen_range(0..total_weight);
        for (index, instance) in instances.iter().enumerate() {
            let weight = u64::from(instance.weight);
            if remaining < weight {
                record_selection(self.algorithm_name(), instance);
                return Some(index);
            }
            remaining -= weight;
        }

        None
    }

    fn algorithm_name(&self) -> &'static str {
        "weighted"
    }
}

/// Lowest reported `load / max_load`; instances that report no load rank last
#[derive(Debug, Default)]
pub struct LeastLoadBalancer;

impl LoadBalancer for LeastLoadBalancer {
    fn select_instance(&self, instances: &[ServiceInfo]) -> Option<usize> {
        let (index, selected) = instances.iter().enumerate().min_by(|(_, a), (_, b)| {
            let a = a.load_ratio().unwrap_or(f64::INFINITY);
            let b = b.load_ratio().unwrap_or(f64::INFINITY);
            a.total_cmp(&b)
        })?;

        record_selection(self.algorithm_name(), selected);
        Some(index)
    }

    fn algorithm_name(&self) -> &'static str {
        "load"
    }
}

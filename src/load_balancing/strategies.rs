use std::str::FromStr;
use std::sync::Arc;

use super::balancer::{
    FirstAvailableBalancer, LeastLoadBalancer, LoadBalancer, RoundRobinBalancer, WeightedBalancer,
};
use crate::core::error::GatewayError;

/// Selection strategy named in discovery requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BalancingStrategy {
    Load,
    Weighted,
    RoundRobin,
    #[default]
    First,
}

impl FromStr for BalancingStrategy {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "first" => Ok(BalancingStrategy::First),
            "load" | "least_load" => Ok(BalancingStrategy::Load),
            "weighted" | "weight" => Ok(BalancingStrategy::Weighted),
            "round_robin" | "roundrobin" | "rr" => Ok(BalancingStrategy::RoundRobin),
            other => Err(GatewayError::validation(
                "strategy",
                format!("unknown selection strategy '{}'", other),
            )),
        }
    }
}

/// One balancer per strategy, shared by every discovery request
pub struct StrategySet {
    first: Arc<dyn LoadBalancer>,
    load: Arc<dyn LoadBalancer>,
    weighted: Arc<dyn LoadBalancer>,
    round_robin: Arc<dyn LoadBalancer>,
}

impl StrategySet {
    pub fn new() -> Self {
        Self {
            first: Arc::new(FirstAvailableBalancer),
            load: Arc::new(LeastLoadBalancer),
            weighted: Arc::new(WeightedBalancer),
            round_robin: Arc::new(RoundRobinBalancer::new()),
        }
    }

    pub fn get(&self, strategy: BalancingStrategy) -> Arc<dyn LoadBalancer> {
        match strategy {
            BalancingStrategy::First => self.first.clone(),
            BalancingStrategy::Load => self.load.clone(),
            BalancingStrategy::Weighted => self.weighted.clone(),
            BalancingStrategy::RoundRobin => self.round_robin.clone(),
        }
    }
}

impl Default for StrategySet {
    fn default() -> Self {
        Self::new()
    }
}

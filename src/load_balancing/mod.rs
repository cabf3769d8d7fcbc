pub mod balancer;
pub mod strategies;

pub use balancer::{
    FirstAvailableBalancer, LeastLoadBalancer, LoadBalancer, RoundRobinBalancer, WeightedBalancer,
};
pub use strategies::{BalancingStrategy, StrategySet};

//! Cross-instance coordination primitives.

pub mod lock;

pub use lock::DistributedLock;

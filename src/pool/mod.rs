//! Read/write-splitting pool over a master and weighted replicas
//!
//! This module provides:
//! - Weighted-random replica selection via a flattened weight list
//! - Time-boxed suppression of failing replicas with lazy re-admission
//! - Operation dispatch with one bounded retry for failed reads
//! - Lifecycle fan-out across every connection in the pool

pub mod adapter;
pub mod availability;
pub mod weighted;

pub use adapter::{PoolId, ReplicaPool, DEFAULT_SUPPRESSION_TTL};
pub use availability::AvailabilityStack;
pub use weighted::WeightedSet;

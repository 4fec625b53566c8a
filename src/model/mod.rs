//! Model Module
//!
//! Entities persisted in the store. Every value here is a transient
//! projection of store state: it is read fresh for each operation and
//! discarded afterwards.
//!
//! ## Entities
//! - [`Pool`]: a network's reserved subnet, with optional sub-range and gateway
//! - [`SubnetReservation`]: the global record that keeps subnets disjoint
//! - [`Address`]: one reserved host address inside a pool
//! - [`PoolNode`]: marks a host as actively using a pool

mod address;
mod node;
mod pool;
mod subnet;

pub use address::Address;
pub use node::PoolNode;
pub use pool::{Pool, PoolRelease};
pub use subnet::SubnetReservation;

use std::time::Duration;

use crate::error::{IpamError, Result};

/// Re-reads spent waiting on a racer that is between two of its writes
pub(crate) const SETTLE_ROUNDS: u32 = 10;

/// Pause between settle re-reads
pub(crate) const SETTLE_INTERVAL: Duration = Duration::from_millis(5);

/// Check that an identifier can be used as a single key segment
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains('/') || id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(IpamError::InvalidKey(format!("invalid identifier {:?}", id)));
    }
    Ok(())
}

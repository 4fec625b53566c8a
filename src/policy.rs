//! Allocation policy
//!
//! Pure allocation strategy: picks a candidate subnet or address. No I/O and
//! no exclusion logic beyond what the caller passes in, so policies can be
//! swapped without touching the reservation protocol.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::cidr;
use crate::config::{Config, MAX_SUBNET_PREFIX};
use crate::error::{IpamError, Result};

/// Allocation strategy
pub trait Policy: Send + Sync {
    /// Pick a subnet that overlaps none of `reserved`
    fn allocate_subnet(&self, reserved: &[Ipv4Net]) -> Option<Ipv4Net>;

    /// Pick one of the `available` addresses
    fn allocate_address(&self, available: &[Ipv4Addr]) -> Option<Ipv4Addr>;
}

/// Lowest-valued candidate wins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirstFitPolicy {
    supernet: Ipv4Net,
    prefix_len: u8,
}

impl FirstFitPolicy {
    /// Create a policy carving `/prefix_len` subnets out of `supernet`
    pub fn new(supernet: Ipv4Net, prefix_len: u8) -> Result<Self> {
        if prefix_len < supernet.prefix_len() || prefix_len > MAX_SUBNET_PREFIX {
            return Err(IpamError::Config(format!(
                "cannot allocate /{} subnets from {}",
                prefix_len, supernet
            )));
        }
        Ok(Self {
            supernet: supernet.trunc(),
            prefix_len,
        })
    }

    /// Create from the allocation parameters in `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.supernet, config.subnet_prefix_len)
    }

    pub fn supernet(&self) -> Ipv4Net {
        self.supernet
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }
}

impl Policy for FirstFitPolicy {
    fn allocate_subnet(&self, reserved: &[Ipv4Net]) -> Option<Ipv4Net> {
        first_fit_subnet(&self.supernet, self.prefix_len, reserved)
    }

    fn allocate_address(&self, available: &[Ipv4Addr]) -> Option<Ipv4Addr> {
        available.first().copied()
    }
}

/// First `/prefix_len` subnet of `supernet`, ascending, clear of `reserved`
pub fn first_fit_subnet(supernet: &Ipv4Net, prefix_len: u8, reserved: &[Ipv4Net]) -> Option<Ipv4Net> {
    let mut candidates = supernet.subnets(prefix_len).ok()?;

    // Only reservations inside the supernet can block a candidate
    let blocking: Vec<Ipv4Net> = reserved
        .iter()
        .filter(|net| cidr::overlaps(net, supernet))
        .copied()
        .collect();

    candidates.find(|candidate| !blocking.iter().any(|net| cidr::overlaps(net, candidate)))
}

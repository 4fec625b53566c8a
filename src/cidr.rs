//! CIDR sets
//!
//! Value operations over IPv4 address ranges: membership, inclusion, overlap,
//! host enumeration and ordered set difference. Everything is ordered
//! ascending by numeric address value.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

/// Check if `addr` lies inside `range`
pub fn contains(range: &Ipv4Net, addr: Ipv4Addr) -> bool {
    range.contains(&addr)
}

/// Check if `inner` lies entirely inside `outer`
pub fn includes(outer: &Ipv4Net, inner: &Ipv4Net) -> bool {
    outer.contains(inner)
}

/// Check if two ranges share any address
pub fn overlaps(a: &Ipv4Net, b: &Ipv4Net) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

/// Host addresses of a range, excluding its network and broadcast addresses
///
/// `/31` and `/32` ranges have no network/broadcast and yield every address.
pub fn hosts(range: &Ipv4Net) -> impl Iterator<Item = Ipv4Addr> {
    range.hosts()
}

/// Every address of a range
pub fn addresses(range: &Ipv4Net) -> impl Iterator<Item = Ipv4Addr> {
    let start = u32::from(range.network());
    let end = u32::from(range.broadcast());
    (start..=end).map(Ipv4Addr::from)
}

/// Candidates not covered by `excluded`, in candidate order
pub fn difference<I>(candidates: I, excluded: &CidrSet) -> Vec<Ipv4Addr>
where
    I: IntoIterator<Item = Ipv4Addr>,
{
    candidates
        .into_iter()
        .filter(|addr| !excluded.contains_addr(*addr))
        .collect()
}

/// A set of address ranges
///
/// Kept sorted and aggregated, so lookups are a binary search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CidrSet {
    nets: Vec<Ipv4Net>,
}

impl CidrSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from ranges
    pub fn from_nets<I: IntoIterator<Item = Ipv4Net>>(nets: I) -> Self {
        let nets: Vec<Ipv4Net> = nets.into_iter().map(|n| n.trunc()).collect();
        Self {
            nets: Ipv4Net::aggregate(&nets),
        }
    }

    /// Build from single addresses
    pub fn from_addrs<I: IntoIterator<Item = Ipv4Addr>>(addrs: I) -> Self {
        Self::from_nets(addrs.into_iter().map(Ipv4Net::from))
    }

    /// Add a range
    pub fn insert_net(&mut self, net: Ipv4Net) {
        self.nets.push(net.trunc());
        self.nets = Ipv4Net::aggregate(&self.nets);
    }

    /// Add a single address
    pub fn insert_addr(&mut self, addr: Ipv4Addr) {
        self.insert_net(Ipv4Net::from(addr));
    }

    /// Membership test for one address
    pub fn contains_addr(&self, addr: Ipv4Addr) -> bool {
        let value = u32::from(addr);
        // Last range starting at or before `addr`
        let idx = self.nets.partition_point(|n| u32::from(n.network()) <= value);
        idx > 0 && self.nets[idx - 1].contains(&addr)
    }

    /// Check if `net` lies entirely inside the set
    pub fn contains_net(&self, net: &Ipv4Net) -> bool {
        let net = net.trunc();
        self.nets.iter().any(|n| n.contains(&net))
    }

    /// Check if `net` shares any address with the set
    pub fn overlaps(&self, net: &Ipv4Net) -> bool {
        self.nets.iter().any(|n| overlaps(n, net))
    }

    /// Aggregated ranges, ascending
    pub fn nets(&self) -> &[Ipv4Net] {
        &self.nets
    }

    /// Number of addresses covered
    pub fn len(&self) -> u64 {
        self.nets
            .iter()
            .map(|n| 1u64 << (32 - u32::from(n.prefix_len())))
            .sum()
    }

    /// Check if the set covers nothing
    pub fn is_empty(&self) -> bool {
        self.nets.is_empty()
    }
}

impl FromIterator<Ipv4Addr> for CidrSet {
    fn from_iter<I: IntoIterator<Item = Ipv4Addr>>(iter: I) -> Self {
        Self::from_addrs(iter)
    }
}

impl FromIterator<Ipv4Net> for CidrSet {
    fn from_iter<I: IntoIterator<Item = Ipv4Net>>(iter: I) -> Self {
        Self::from_nets(iter)
    }
}

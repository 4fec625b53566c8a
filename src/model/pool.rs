//! Pools
//!
//! `pools/<id>` holds the pool record. A pool owns one subnet reservation, an
//! address directory and a node-usage marker directory; see
//! [`Pool::create_or_get`] and [`Pool::release`] for how they are tied
//! together without multi-key transactions.

use std::net::Ipv4Addr;
use std::thread;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use super::{Address, PoolNode, SubnetReservation, SETTLE_INTERVAL, SETTLE_ROUNDS};
use crate::cidr::{self, CidrSet};
use crate::error::Result;
use crate::store::Keyspace;

const DIR: &str = "pools";

/// A network's address pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    pub id: String,
    pub subnet: Ipv4Net,
    pub iprange: Option<Ipv4Net>,
    pub gateway: Option<Ipv4Addr>,
}

/// Outcome of releasing a pool on one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolRelease {
    /// Last user left; the pool and all its records are gone
    Deleted,
    /// Other nodes still use the pool
    Retained,
    /// No such pool
    Absent,
}

#[derive(Serialize, Deserialize)]
struct Record {
    subnet: Ipv4Net,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iprange: Option<Ipv4Net>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gateway: Option<Ipv4Addr>,
}

impl Pool {
    pub fn new(id: impl Into<String>, subnet: Ipv4Net) -> Self {
        Self {
            id: id.into(),
            subnet: subnet.trunc(),
            iprange: None,
            gateway: None,
        }
    }

    pub fn with_iprange(mut self, iprange: Option<Ipv4Net>) -> Self {
        self.iprange = iprange.map(|r| r.trunc());
        self
    }

    pub fn with_gateway(mut self, gateway: Option<Ipv4Addr>) -> Self {
        self.gateway = gateway;
        self
    }

    fn key(id: &str) -> String {
        format!("{}/{}", DIR, id)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&Record {
            subnet: self.subnet,
            iprange: self.iprange,
            gateway: self.gateway,
        })?)
    }

    pub fn from_json(id: &str, bytes: &[u8]) -> Result<Self> {
        let record: Record = serde_json::from_slice(bytes)?;
        Ok(Pool::new(id, record.subnet)
            .with_iprange(record.iprange)
            .with_gateway(record.gateway))
    }

    // =========================================================================
    // Store access
    // =========================================================================

    pub fn get(ks: &Keyspace, id: &str) -> Result<Option<Pool>> {
        ks.get(&Self::key(id))?
            .map(|bytes| Self::from_json(id, &bytes))
            .transpose()
    }

    /// All pools, ascending by id
    pub fn list(ks: &Keyspace) -> Result<Vec<Pool>> {
        let mut pools = Vec::new();
        for id in ks.list(DIR)? {
            // Deleted between list and get
            if let Some(pool) = Self::get(ks, &id)? {
                pools.push(pool);
            }
        }
        Ok(pools)
    }

    /// Every reserved subnet, ascending
    pub fn reserved_subnets(ks: &Keyspace) -> Result<Vec<Ipv4Net>> {
        SubnetReservation::list(ks)
    }

    /// Create the pool, or return the existing pool with the same id
    ///
    /// Fails with `Conflict` if the subnet overlaps another pool's
    /// reservation. The returned pool may differ from the arguments when a
    /// pool with this id already existed; callers must verify it.
    pub fn create_or_get(ks: &Keyspace, id: &str, subnet: Ipv4Net, iprange: Option<Ipv4Net>) -> Result<Pool> {
        let subnet = subnet.trunc();
        let gateway = cidr::hosts(&subnet).next();
        let pool = Pool::new(id, subnet)
            .with_iprange(iprange)
            .with_gateway(gateway);

        match SubnetReservation::reserve(ks, subnet, id) {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                return match Self::await_racer(ks, id, &subnet)? {
                    Some(existing) => {
                        tracing::debug!(pool = id, subnet = %existing.subnet, "pool created concurrently");
                        Ok(existing)
                    }
                    None => Err(e),
                };
            }
            Err(e) => return Err(e),
        }

        match ks.create(&Self::key(id), &pool.to_json()?) {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                SubnetReservation::delete(ks, &subnet)?;
                return match Self::get(ks, id)? {
                    Some(existing) => Ok(existing),
                    None => Err(e),
                };
            }
            Err(e) => {
                if let Err(rollback) = SubnetReservation::delete(ks, &subnet) {
                    tracing::warn!(pool = id, subnet = %subnet, error = %rollback, "failed to drop subnet reservation");
                }
                return Err(e);
            }
        }

        ks.mkdir(&Address::dir(id))?;

        tracing::debug!(pool = id, subnet = %subnet, iprange = ?pool.iprange, "pool created");
        Ok(pool)
    }

    /// Wait for a racer creating this same pool id to finish
    ///
    /// Called after our reservation hit `Conflict`. While an overlapping
    /// reservation owned by `id` exists without its pool record, a racer is
    /// between its two writes; re-read for a bounded time. `None` if no such
    /// pool turns up.
    fn await_racer(ks: &Keyspace, id: &str, subnet: &Ipv4Net) -> Result<Option<Pool>> {
        for round in 0..=SETTLE_ROUNDS {
            if let Some(pool) = Self::get(ks, id)? {
                return Ok(Some(pool));
            }
            let held = SubnetReservation::overlapping(ks, subnet)?
                .iter()
                .any(|r| r.pool_id == id);
            if !held || round == SETTLE_ROUNDS {
                break;
            }
            thread::sleep(SETTLE_INTERVAL);
        }
        Ok(None)
    }

    /// Drop `node`'s use of the pool, deleting the pool when it was the last
    ///
    /// The marker directory is removed with delete-if-empty, so of several
    /// nodes releasing concurrently exactly one sees it succeed.
    pub fn release(&self, ks: &Keyspace, node: &str) -> Result<PoolRelease> {
        PoolNode::delete(ks, &self.id, node)?;

        match PoolNode::rmdir(ks, &self.id) {
            Ok(()) => {}
            Err(e) if e.is_conflict() => return Ok(PoolRelease::Retained),
            Err(e) => return Err(e),
        }

        // Pool record last: while it exists, a request for this id joins it
        // instead of creating records the deletes below would wipe
        Address::delete_all(ks, &self.id)?;
        SubnetReservation::delete(ks, &self.subnet)?;
        ks.delete(&Self::key(&self.id))?;

        Ok(PoolRelease::Deleted)
    }

    // =========================================================================
    // Addresses
    // =========================================================================

    /// Range dynamic addresses are drawn from
    pub fn allocation_range(&self) -> Ipv4Net {
        self.iprange.unwrap_or(self.subnet)
    }

    /// Addresses currently reserved in this pool
    pub fn reserved_addresses(&self, ks: &Keyspace) -> Result<CidrSet> {
        Ok(CidrSet::from_addrs(Address::list(ks, &self.id)?))
    }

    /// Addresses free for dynamic allocation, ascending, read fresh
    pub fn available_addresses(&self, ks: &Keyspace) -> Result<Vec<Ipv4Addr>> {
        Ok(self.allocatable(&self.reserved_addresses(ks)?))
    }

    /// Allocation candidates minus `reserved` and the gateway
    pub fn allocatable(&self, reserved: &CidrSet) -> Vec<Ipv4Addr> {
        let mut excluded = reserved.clone();
        if let Some(gateway) = self.gateway {
            excluded.insert_addr(gateway);
        }

        match self.iprange {
            Some(range) => {
                if self.subnet.prefix_len() < 31 {
                    excluded.insert_addr(self.subnet.network());
                    excluded.insert_addr(self.subnet.broadcast());
                }
                cidr::difference(cidr::addresses(&range), &excluded)
            }
            None => cidr::difference(cidr::hosts(&self.subnet), &excluded),
        }
    }

    /// Reserve `addr` in this pool, `Conflict` if taken
    pub fn create_address(&self, ks: &Keyspace, addr: Ipv4Addr) -> Result<Address> {
        Address::create(ks, self, addr)
    }
}

//! Address records
//!
//! `addresses/<pool>/<a.b.c.d>` exists while the address is reserved. The
//! record carries the address annotated with the pool's prefix length.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use super::Pool;
use crate::error::{IpamError, Result};
use crate::store::Keyspace;

/// A host address reserved in a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub pool_id: String,
    cidr: Ipv4Net,
}

#[derive(Serialize, Deserialize)]
struct Record {
    address: Ipv4Net,
}

impl Address {
    /// Create an address value with the pool's prefix length
    pub fn new(pool_id: impl Into<String>, address: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        let cidr = Ipv4Net::new(address, prefix_len)
            .map_err(|e| IpamError::Serialization(format!("{}/{}: {}", address, prefix_len, e)))?;
        Ok(Self {
            pool_id: pool_id.into(),
            cidr,
        })
    }

    /// The bare address
    pub fn address(&self) -> Ipv4Addr {
        self.cidr.addr()
    }

    /// Address with the pool prefix, e.g. `10.81.100.100/16`
    pub fn cidr(&self) -> Ipv4Net {
        self.cidr
    }

    pub fn prefix_len(&self) -> u8 {
        self.cidr.prefix_len()
    }

    pub(crate) fn dir(pool_id: &str) -> String {
        format!("addresses/{}", pool_id)
    }

    fn key(pool_id: &str, addr: Ipv4Addr) -> String {
        format!("addresses/{}/{}", pool_id, addr)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&Record { address: self.cidr })?)
    }

    pub fn from_json(pool_id: &str, bytes: &[u8]) -> Result<Self> {
        let record: Record = serde_json::from_slice(bytes)?;
        Ok(Self {
            pool_id: pool_id.to_string(),
            cidr: record.address,
        })
    }

    /// Reserve `addr` in `pool`, `Conflict` if already reserved
    pub fn create(ks: &Keyspace, pool: &Pool, addr: Ipv4Addr) -> Result<Address> {
        let address = Address::new(&pool.id, addr, pool.subnet.prefix_len())?;
        ks.create(&Self::key(&pool.id, addr), &address.to_json()?)?;
        Ok(address)
    }

    pub fn get(ks: &Keyspace, pool_id: &str, addr: Ipv4Addr) -> Result<Option<Address>> {
        ks.get(&Self::key(pool_id, addr))?
            .map(|bytes| Self::from_json(pool_id, &bytes))
            .transpose()
    }

    /// Reserved addresses of a pool, ascending
    pub fn list(ks: &Keyspace, pool_id: &str) -> Result<Vec<Ipv4Addr>> {
        let mut addrs: Vec<Ipv4Addr> = ks
            .list(&Self::dir(pool_id))?
            .iter()
            .filter_map(|name| match name.parse() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    tracing::warn!(pool = pool_id, name = %name, "ignoring malformed address record");
                    None
                }
            })
            .collect();
        addrs.sort();
        Ok(addrs)
    }

    pub fn delete(ks: &Keyspace, pool_id: &str, addr: Ipv4Addr) -> Result<()> {
        ks.delete(&Self::key(pool_id, addr))
    }

    /// Drop every address of a pool
    pub fn delete_all(ks: &Keyspace, pool_id: &str) -> Result<()> {
        ks.delete_tree(&Self::dir(pool_id))
    }
}

//! Address request, release and reconciliation

use std::net::Ipv4Addr;

use super::{non_empty, parse_address, reject, Ipam};
use crate::cidr::{self, CidrSet};
use crate::error::{ErrorKind, Field, Result};
use crate::model::{self, Address, Pool};

/// Parameters of an address request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressRequest {
    pub pool_id: String,

    /// Explicit address; allocated from the pool if absent
    pub address: Option<String>,
}

impl AddressRequest {
    pub fn new(pool_id: impl Into<String>) -> Self {
        Self {
            pool_id: pool_id.into(),
            address: None,
        }
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

impl Ipam {
    /// Reserve an address in a pool
    pub fn request_address(&self, request: &AddressRequest) -> Result<Address> {
        let address = match non_empty(&request.address) {
            Some(value) => Some(parse_address(value).ok_or_else(|| {
                reject(Field::Address, ErrorKind::Invalid, format!("invalid address {:?}", value))
            })?),
            None => None,
        };

        let pool = self.existing_pool(&request.pool_id)?;

        match address {
            Some(addr) => {
                if !cidr::contains(&pool.subnet, addr) {
                    return Err(reject(
                        Field::Address,
                        ErrorKind::OutOfPool,
                        format!("address {} outside of pool subnet {}", addr, pool.subnet),
                    ));
                }

                tracing::info!(pool = %pool.id, address = %addr, subnet = %pool.subnet, "request static address");
                self.reserve_static_address(&pool, addr)
            }
            None => {
                tracing::info!(pool = %pool.id, subnet = %pool.subnet, "request dynamic address");
                self.allocate_dynamic_address(&pool)
            }
        }
    }

    fn reserve_static_address(&self, pool: &Pool, addr: Ipv4Addr) -> Result<Address> {
        pool.create_address(&self.keyspace, addr).map_err(|e| {
            if e.is_conflict() {
                reject(
                    Field::Address,
                    ErrorKind::Conflict,
                    format!("allocation conflict for address {}: {}", addr, e),
                )
            } else {
                e
            }
        })
    }

    fn allocate_dynamic_address(&self, pool: &Pool) -> Result<Address> {
        let ks = &self.keyspace;

        self.retry("request_address", || {
            let available = pool.available_addresses(ks)?;

            tracing::debug!(
                pool = %pool.id,
                range = %pool.allocation_range(),
                available = available.len(),
                "allocating address"
            );

            let addr = self.policy.allocate_address(&available).ok_or_else(|| {
                reject(Field::Address, ErrorKind::Allocate, "no addresses available for allocation")
            })?;

            pool.create_address(ks, addr)
        })
    }

    /// Release an address; releasing an unreserved address is a no-op
    pub fn release_address(&self, pool_id: &str, address: &str) -> Result<()> {
        let addr = parse_address(address.trim()).ok_or_else(|| {
            reject(Field::Address, ErrorKind::Invalid, format!("invalid address {:?}", address))
        })?;
        if model::validate_id(pool_id).is_err() {
            return Err(reject(
                Field::PoolId,
                ErrorKind::Invalid,
                format!("invalid pool id {:?}", pool_id),
            ));
        }

        Address::delete(&self.keyspace, pool_id, addr)?;
        tracing::info!(pool = pool_id, address = %addr, "release address");
        Ok(())
    }

    /// Release every stored address of a pool that is not in `active`
    ///
    /// The gateway is never released. Returns the released addresses,
    /// ascending.
    pub fn cleanup_addresses(&self, pool_id: &str, active: &[Ipv4Addr]) -> Result<Vec<Ipv4Addr>> {
        let pool = self.existing_pool(pool_id)?;

        let mut keep = CidrSet::from_addrs(active.iter().copied());
        if let Some(gateway) = pool.gateway {
            keep.insert_addr(gateway);
        }

        let stored = Address::list(&self.keyspace, &pool.id)?;
        let stale = cidr::difference(stored, &keep);

        for addr in &stale {
            Address::delete(&self.keyspace, &pool.id, *addr)?;
            tracing::info!(pool = %pool.id, address = %addr, "cleanup stale address");
        }

        tracing::info!(pool = %pool.id, active = active.len(), released = stale.len(), "cleanup pool addresses");
        Ok(stale)
    }

    fn existing_pool(&self, pool_id: &str) -> Result<Pool> {
        let not_found = || reject(Field::Pool, ErrorKind::NotFound, format!("pool not found: {}", pool_id));

        if model::validate_id(pool_id).is_err() {
            return Err(not_found());
        }
        Pool::get(&self.keyspace, pool_id)?.ok_or_else(not_found)
    }
}

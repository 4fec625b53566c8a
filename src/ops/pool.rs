//! Pool request and release

use ipnet::{IpNet, Ipv4Net};

use super::{non_empty, reject, Ipam};
use crate::error::{ErrorKind, Field, Result};
use crate::model::{self, Pool, PoolNode, PoolRelease};

/// Parameters of a pool request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolRequest {
    /// Network id the pool is named after
    pub network: String,

    /// Explicit subnet (`a.b.c.d/n`); allocated from the supernet if absent
    pub subnet: Option<String>,

    /// Sub-range of the subnet addresses are drawn from
    pub iprange: Option<String>,

    pub ipv6: Option<bool>,
}

impl PoolRequest {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            ..Self::default()
        }
    }

    pub fn subnet(mut self, subnet: impl Into<String>) -> Self {
        self.subnet = Some(subnet.into());
        self
    }

    pub fn iprange(mut self, iprange: impl Into<String>) -> Self {
        self.iprange = Some(iprange.into());
        self
    }

    pub fn ipv6(mut self, ipv6: bool) -> Self {
        self.ipv6 = Some(ipv6);
        self
    }

    fn validate(&self) -> Result<ValidPoolRequest<'_>> {
        let network = self.network.trim();
        if network.is_empty() {
            return Err(reject(Field::Network, ErrorKind::Required, "network is required"));
        }
        if model::validate_id(network).is_err() {
            return Err(reject(
                Field::Network,
                ErrorKind::Invalid,
                format!("invalid network id {:?}", network),
            ));
        }

        let subnet = parse_cidr(non_empty(&self.subnet), Field::Subnet)?;
        let iprange = parse_cidr(non_empty(&self.iprange), Field::IpRange)?;

        if self.ipv6.unwrap_or(false) {
            return Err(reject(Field::Ipv6, ErrorKind::NotSupported, "IPv6 is not supported"));
        }

        match (subnet, iprange) {
            (Some(subnet), Some(iprange)) if !subnet.contains(&iprange) => {
                return Err(reject(
                    Field::IpRange,
                    ErrorKind::OutOfPool,
                    format!("iprange {} outside of pool subnet {}", iprange, subnet),
                ));
            }
            (None, Some(iprange)) => {
                return Err(reject(
                    Field::Subnet,
                    ErrorKind::Required,
                    format!("iprange {} requires an explicit subnet", iprange),
                ));
            }
            _ => {}
        }

        Ok(ValidPoolRequest {
            network,
            subnet,
            iprange,
        })
    }
}

struct ValidPoolRequest<'a> {
    network: &'a str,
    subnet: Option<Ipv4Net>,
    iprange: Option<Ipv4Net>,
}

fn parse_cidr(value: Option<&str>, field: Field) -> Result<Option<Ipv4Net>> {
    let value = match value {
        Some(value) => value,
        None => return Ok(None),
    };

    match value.parse::<IpNet>() {
        Ok(IpNet::V4(net)) => Ok(Some(net.trunc())),
        Ok(IpNet::V6(_)) => Err(reject(
            Field::Ipv6,
            ErrorKind::NotSupported,
            format!("{} {} is IPv6", field, value),
        )),
        Err(_) => Err(reject(field, ErrorKind::Invalid, format!("invalid CIDR {:?}", value))),
    }
}

impl Ipam {
    /// Reserve a pool for a network, or join the existing one
    ///
    /// The pool is resolved by network id first; only a missing pool is
    /// allocated. Static subnet conflicts are terminal; dynamic allocation
    /// retries on `Conflict`. On success this node is recorded as a user of
    /// the pool.
    pub fn request_pool(&self, request: &PoolRequest) -> Result<Pool> {
        let params = request.validate()?;
        let ks = &self.keyspace;

        let pool = match Pool::get(ks, params.network)? {
            Some(pool) => {
                tracing::info!(pool = %pool.id, subnet = %pool.subnet, "request existing pool");
                pool
            }
            None => match params.subnet {
                Some(subnet) => {
                    tracing::info!(pool = params.network, subnet = %subnet, iprange = ?params.iprange, "request static pool");
                    self.reserve_static_pool(params.network, subnet, params.iprange)?
                }
                None => {
                    tracing::info!(pool = params.network, "request dynamic pool");
                    self.allocate_dynamic_pool(params.network)?
                }
            },
        };

        let pool = verify(&params, pool)?;

        PoolNode::create(ks, &pool.id, &self.node)?;
        Ok(pool)
    }

    fn reserve_static_pool(&self, network: &str, subnet: Ipv4Net, iprange: Option<Ipv4Net>) -> Result<Pool> {
        Pool::create_or_get(&self.keyspace, network, subnet, iprange).map_err(|e| {
            if e.is_conflict() {
                reject(Field::Subnet, ErrorKind::Conflict, format!("{} conflict: {}", subnet, e))
            } else {
                e
            }
        })
    }

    fn allocate_dynamic_pool(&self, network: &str) -> Result<Pool> {
        let ks = &self.keyspace;

        self.retry("request_pool", || {
            let reserved = Pool::reserved_subnets(ks)?;

            let subnet = self.policy.allocate_subnet(&reserved).ok_or_else(|| {
                reject(
                    Field::Subnet,
                    ErrorKind::Allocate,
                    format!("supernet exhausted with {} reserved subnets", reserved.len()),
                )
            })?;

            tracing::debug!(pool = network, subnet = %subnet, "allocated subnet");
            Pool::create_or_get(ks, network, subnet, None)
        })
    }

    /// Drop this node's use of a pool, deleting it if no other node uses it
    pub fn release_pool(&self, pool_id: &str) -> Result<PoolRelease> {
        if model::validate_id(pool_id).is_err() {
            return Err(reject(
                Field::PoolId,
                ErrorKind::Invalid,
                format!("invalid pool id {:?}", pool_id),
            ));
        }

        let pool = match Pool::get(&self.keyspace, pool_id)? {
            Some(pool) => pool,
            None => {
                tracing::debug!(pool = pool_id, "release unknown pool");
                return Ok(PoolRelease::Absent);
            }
        };

        let outcome = pool.release(&self.keyspace, &self.node)?;
        match outcome {
            PoolRelease::Deleted => tracing::info!(pool = pool_id, node = %self.node, "release pool: cleanup deleted"),
            _ => tracing::info!(pool = pool_id, node = %self.node, "release pool: cleanup skipped"),
        }
        Ok(outcome)
    }
}

/// Check an existing pool against the requested parameters
fn verify(params: &ValidPoolRequest<'_>, pool: Pool) -> Result<Pool> {
    if let Some(subnet) = params.subnet {
        if pool.subnet != subnet {
            return Err(reject(
                Field::Subnet,
                ErrorKind::Config,
                format!("pool {} exists with subnet {}, requested {}", pool.id, pool.subnet, subnet),
            ));
        }
    }

    if let Some(iprange) = params.iprange {
        if pool.iprange != Some(iprange) {
            let existing = pool
                .iprange
                .map(|r| r.to_string())
                .unwrap_or_else(|| "none".to_string());
            return Err(reject(
                Field::IpRange,
                ErrorKind::Config,
                format!("pool {} exists with iprange {}, requested {}", pool.id, existing, iprange),
            ));
        }
    }

    Ok(pool)
}

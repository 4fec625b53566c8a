//! Global subnet reservations
//!
//! `subnets/<network>-<prefix>` records which pool holds a subnet. Every pool
//! subnet goes through [`SubnetReservation::reserve`], which keeps all
//! reservations pairwise disjoint.

use std::net::Ipv4Addr;
use std::thread;

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

use super::{SETTLE_INTERVAL, SETTLE_ROUNDS};
use crate::cidr;
use crate::error::{IpamError, Result};
use crate::store::Keyspace;

const DIR: &str = "subnets";

/// A subnet held by a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetReservation {
    pub subnet: Ipv4Net,

    #[serde(rename = "pool")]
    pub pool_id: String,
}

impl SubnetReservation {
    fn name(subnet: &Ipv4Net) -> String {
        format!("{}-{}", subnet.network(), subnet.prefix_len())
    }

    fn key(subnet: &Ipv4Net) -> String {
        format!("{}/{}", DIR, Self::name(subnet))
    }

    fn parse_name(name: &str) -> Option<Ipv4Net> {
        let (addr, len) = name.split_once('-')?;
        let addr: Ipv4Addr = addr.parse().ok()?;
        Ipv4Net::new(addr, len.parse().ok()?).ok()
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Read the reservation for exactly `subnet`
    pub fn get(ks: &Keyspace, subnet: &Ipv4Net) -> Result<Option<SubnetReservation>> {
        ks.get(&Self::key(subnet))?
            .map(|bytes| Self::from_json(&bytes))
            .transpose()
    }

    /// All reserved subnets, ascending
    pub fn list(ks: &Keyspace) -> Result<Vec<Ipv4Net>> {
        let mut subnets: Vec<Ipv4Net> = ks
            .list(DIR)?
            .iter()
            .filter_map(|name| {
                let parsed = Self::parse_name(name);
                if parsed.is_none() {
                    tracing::warn!(name = %name, "ignoring malformed subnet reservation");
                }
                parsed
            })
            .collect();
        subnets.sort();
        Ok(subnets)
    }

    /// Reservations sharing any address with `subnet`, ascending
    pub fn overlapping(ks: &Keyspace, subnet: &Ipv4Net) -> Result<Vec<SubnetReservation>> {
        let mut found = Vec::new();
        for other in Self::list(ks)?.iter().filter(|other| cidr::overlaps(other, subnet)) {
            // Withdrawn between list and get
            if let Some(reservation) = Self::get(ks, other)? {
                found.push(reservation);
            }
        }
        Ok(found)
    }

    /// Reserve `subnet` for `pool_id`
    ///
    /// Fails with `Conflict` if any existing reservation overlaps. The record
    /// is created atomically, then the reservation set is re-read to catch a
    /// racer that created an overlapping reservation of a different size in
    /// between. Of two such racers the lower subnet (by network, then prefix
    /// length) wins: the higher one withdraws at once, the lower one waits a
    /// bounded time for it to go and withdraws itself if it stays.
    pub fn reserve(ks: &Keyspace, subnet: Ipv4Net, pool_id: &str) -> Result<SubnetReservation> {
        let subnet = subnet.trunc();

        let reserved = Self::list(ks)?;
        if let Some(other) = reserved.iter().find(|other| cidr::overlaps(other, &subnet)) {
            return Err(Self::conflict(ks, &subnet, other));
        }

        let reservation = SubnetReservation {
            subnet,
            pool_id: pool_id.to_string(),
        };
        ks.create(&Self::key(&subnet), &reservation.to_json()?)?;

        for round in 0..=SETTLE_ROUNDS {
            let rivals: Vec<Ipv4Net> = Self::list(ks)?
                .into_iter()
                .filter(|other| *other != subnet && cidr::overlaps(other, &subnet))
                .collect();

            let winner = match rivals.iter().find(|other| **other < subnet) {
                Some(lower) => Some(*lower),
                None if round == SETTLE_ROUNDS => rivals.first().copied(),
                None => None,
            };
            if let Some(other) = winner {
                ks.delete(&Self::key(&subnet))?;
                tracing::debug!(subnet = %subnet, other = %other, pool = pool_id, "subnet reservation withdrawn");
                return Err(Self::conflict(ks, &subnet, &other));
            }
            if rivals.is_empty() {
                break;
            }
            thread::sleep(SETTLE_INTERVAL);
        }

        tracing::debug!(subnet = %subnet, pool = pool_id, "subnet reserved");
        Ok(reservation)
    }

    /// Drop the reservation for `subnet`
    pub fn delete(ks: &Keyspace, subnet: &Ipv4Net) -> Result<()> {
        ks.delete(&Self::key(&subnet.trunc()))
    }

    fn conflict(ks: &Keyspace, subnet: &Ipv4Net, other: &Ipv4Net) -> IpamError {
        let owner = Self::get(ks, other)
            .ok()
            .flatten()
            .map(|r| r.pool_id)
            .unwrap_or_else(|| "unknown".to_string());
        IpamError::Conflict(format!("{} overlaps {} reserved by pool {}", subnet, other, owner))
    }
}

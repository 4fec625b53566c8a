//! Ops Module
//!
//! Request and release operations, the public surface a network plugin shim
//! drives.
//!
//! ## Responsibilities
//! - Validate requests before touching the store
//! - Static and dynamic pool/address reservation
//! - Bounded retry of dynamic allocation on `Conflict`
//! - Refcounted pool release and address reconciliation
//!
//! There is no locking here: every decision is re-derived from a fresh store
//! read, and the store's atomic create is the only critical section.

mod address;
mod pool;

use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnet::Ipv4Net;

pub use address::AddressRequest;
pub use pool::PoolRequest;

use crate::config::Config;
use crate::error::{ErrorKind, Field, IpamError, RequestError, Result};
use crate::policy::{FirstFitPolicy, Policy};
use crate::store::{Keyspace, Store};

/// IPAM engine bound to one store, policy and node identity
///
/// `Ipam` is `Send + Sync`; share it behind an `Arc` to serve concurrent
/// requests.
pub struct Ipam {
    keyspace: Keyspace,
    policy: Arc<dyn Policy>,
    node: String,
    max_attempts: usize,
}

impl Ipam {
    pub fn new(keyspace: Keyspace, policy: Arc<dyn Policy>, node: impl Into<String>, max_attempts: usize) -> Self {
        Self {
            keyspace,
            policy,
            node: node.into(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Build from config, using the first-fit policy
    pub fn from_config(store: Arc<dyn Store>, config: &Config) -> Result<Self> {
        config.validate()?;
        let keyspace = Keyspace::new(store, config.namespace.clone())?;
        let policy = FirstFitPolicy::from_config(config)?;
        Ok(Self::new(keyspace, Arc::new(policy), config.node_id.clone(), config.max_attempts))
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    /// Identity recorded in node-usage markers
    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Run `attempt` until it ends in anything but `Conflict`
    fn retry<T>(&self, operation: &'static str, mut attempt: impl FnMut() -> Result<T>) -> Result<T> {
        for n in 1..=self.max_attempts {
            match attempt() {
                Err(e) if e.is_conflict() => {
                    tracing::warn!(operation, attempt = n, error = %e, "retry on conflict");
                }
                result => return result,
            }
        }

        Err(IpamError::RetryLimit {
            operation,
            attempts: self.max_attempts,
        })
    }
}

fn reject(field: Field, kind: ErrorKind, message: impl Into<String>) -> IpamError {
    RequestError::new(field, kind, message).into()
}

/// Parse `a.b.c.d` or `a.b.c.d/n` to the bare address
pub(crate) fn parse_address(value: &str) -> Option<Ipv4Addr> {
    value
        .parse::<Ipv4Addr>()
        .ok()
        .or_else(|| value.parse::<Ipv4Net>().ok().map(|net| net.addr()))
}

/// Drop empty optional parameters
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

//! Node-usage markers
//!
//! `nodes/<pool>/<node>` exists while `node` uses the pool. The pool may only
//! be deleted once its marker directory is empty.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::Keyspace;

/// One host's claim on a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolNode {
    pub pool_id: String,
    pub node: String,
}

#[derive(Serialize, Deserialize)]
struct Record {
    node: String,
}

impl PoolNode {
    pub(crate) fn dir(pool_id: &str) -> String {
        format!("nodes/{}", pool_id)
    }

    fn key(pool_id: &str, node: &str) -> String {
        format!("nodes/{}/{}", pool_id, node)
    }

    /// Record that `node` uses the pool; no-op if already recorded
    pub fn create(ks: &Keyspace, pool_id: &str, node: &str) -> Result<PoolNode> {
        let value = serde_json::to_vec(&Record { node: node.to_string() })?;

        match ks.create(&Self::key(pool_id, node), &value) {
            Ok(()) => tracing::debug!(pool = pool_id, node, "pool node marker created"),
            Err(e) if e.is_conflict() => {}
            Err(e) => return Err(e),
        }

        Ok(PoolNode {
            pool_id: pool_id.to_string(),
            node: node.to_string(),
        })
    }

    /// Nodes currently using the pool
    pub fn list(ks: &Keyspace, pool_id: &str) -> Result<Vec<String>> {
        ks.list(&Self::dir(pool_id))
    }

    /// Drop `node`'s claim
    pub fn delete(ks: &Keyspace, pool_id: &str, node: &str) -> Result<()> {
        ks.delete(&Self::key(pool_id, node))
    }

    /// Remove the marker directory, `Conflict` while any node remains
    pub fn rmdir(ks: &Keyspace, pool_id: &str) -> Result<()> {
        ks.delete_if_empty(&Self::dir(pool_id))
    }
}

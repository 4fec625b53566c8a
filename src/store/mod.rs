//! Store Module
//!
//! Atomic key/directory primitives over a consistent key-value store.
//!
//! ## Responsibilities
//! - Single-key atomic operations (create-if-absent, delete-if-empty)
//! - Directory listing by key hierarchy
//! - Namespacing every record under a fixed root ([`Keyspace`])
//!
//! ## Key Layout
//! Keys are absolute, `/`-separated paths. Directories are implicit parents of
//! values, or created explicitly with [`Store::mkdir`].
//!
//! ```text
//! /ipam/pools/<id>
//! /ipam/subnets/<a.b.c.d>-<len>
//! /ipam/addresses/<id>/<a.b.c.d>
//! /ipam/nodes/<id>/<node>
//! ```
//!
//! There are no multi-key transactions. `create` and `delete_if_empty` are the
//! only synchronization primitives callers rely on.

mod memory;
mod remote;

use std::fmt;
use std::sync::Arc;

pub use memory::MemoryStore;
pub use remote::RemoteStore;

use crate::error::{IpamError, Result};

/// Backend contract for a consistent key-value store
pub trait Store: Send + Sync {
    /// Read a value, `None` if absent
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Create a value, failing with `Conflict` if the key exists
    ///
    /// Missing parent directories are created.
    fn create(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Create a directory if it does not exist
    fn mkdir(&self, key: &str) -> Result<()>;

    /// Immediate child names of a directory, sorted; empty if absent
    fn list(&self, key: &str) -> Result<Vec<String>>;

    /// Delete a value (no-op if absent)
    fn delete(&self, key: &str) -> Result<()>;

    /// Delete a directory, failing with `Conflict` if it has children
    fn delete_if_empty(&self, key: &str) -> Result<()>;

    /// Delete a directory and everything below it (no-op if absent)
    fn delete_tree(&self, key: &str) -> Result<()>;

    /// Health check
    fn ping(&self) -> Result<()>;
}

impl<S: Store + ?Sized> Store for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn create(&self, key: &str, value: &[u8]) -> Result<()> {
        (**self).create(key, value)
    }

    fn mkdir(&self, key: &str) -> Result<()> {
        (**self).mkdir(key)
    }

    fn list(&self, key: &str) -> Result<Vec<String>> {
        (**self).list(key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }

    fn delete_if_empty(&self, key: &str) -> Result<()> {
        (**self).delete_if_empty(key)
    }

    fn delete_tree(&self, key: &str) -> Result<()> {
        (**self).delete_tree(key)
    }

    fn ping(&self) -> Result<()> {
        (**self).ping()
    }
}

/// Validate an absolute store key
pub fn validate_key(key: &str) -> Result<()> {
    let rest = key
        .strip_prefix('/')
        .ok_or_else(|| IpamError::InvalidKey(format!("{:?} is not absolute", key)))?;

    if rest.is_empty() {
        return Err(IpamError::InvalidKey("root is not addressable".to_string()));
    }

    for segment in rest.split('/') {
        if segment.is_empty() || segment.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(IpamError::InvalidKey(format!("{:?} has an invalid segment", key)));
        }
    }

    Ok(())
}

/// Parent directory of a key, `None` for top-level keys
pub(crate) fn parent(key: &str) -> Option<&str> {
    match key.rfind('/') {
        Some(0) | None => None,
        Some(idx) => Some(&key[..idx]),
    }
}

/// Store handle scoped to a namespace root
///
/// Entities address records by relative path (`pools/kontena`); the keyspace
/// prefixes the root. Cloning is cheap.
#[derive(Clone)]
pub struct Keyspace {
    store: Arc<dyn Store>,
    root: String,
}

impl Keyspace {
    /// Create a keyspace rooted at `root` (e.g. `/ipam`)
    pub fn new(store: Arc<dyn Store>, root: impl Into<String>) -> Result<Self> {
        let root = root.into();
        validate_key(&root)?;
        Ok(Self { store, root })
    }

    /// Full store key for a relative path
    pub fn key(&self, path: &str) -> String {
        format!("{}/{}", self.root, path)
    }

    /// Namespace root
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        self.store.get(&self.key(path))
    }

    pub fn create(&self, path: &str, value: &[u8]) -> Result<()> {
        self.store.create(&self.key(path), value)
    }

    pub fn mkdir(&self, path: &str) -> Result<()> {
        self.store.mkdir(&self.key(path))
    }

    pub fn list(&self, path: &str) -> Result<Vec<String>> {
        self.store.list(&self.key(path))
    }

    pub fn delete(&self, path: &str) -> Result<()> {
        self.store.delete(&self.key(path))
    }

    pub fn delete_if_empty(&self, path: &str) -> Result<()> {
        self.store.delete_if_empty(&self.key(path))
    }

    pub fn delete_tree(&self, path: &str) -> Result<()> {
        self.store.delete_tree(&self.key(path))
    }
}

impl fmt::Debug for Keyspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keyspace").field("root", &self.root).finish()
    }
}

//! In-memory store
//!
//! BTreeMap-based directory tree with RwLock for concurrency. Every primitive
//! runs under the lock, which makes each one atomic and the whole store
//! linearizable within a process.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::{parent, validate_key, Store};
use crate::error::{IpamError, Result};
use crate::wal::Operation;

/// A node in the tree
#[derive(Debug, Clone, PartialEq)]
enum Node {
    Dir,
    Value(Vec<u8>),
}

/// Ordered map of absolute keys to nodes
#[derive(Debug, Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
}

impl Tree {
    /// Keys strictly below `key`, in order
    fn descendants<'a>(&'a self, key: &str) -> impl Iterator<Item = (&'a String, &'a Node)> + 'a {
        let prefix = format!("{}/", key);
        self.nodes
            .range(prefix.clone()..)
            .take_while(move |(k, _)| k.starts_with(&prefix))
    }

    fn has_children(&self, key: &str) -> bool {
        self.descendants(key).next().is_some()
    }

    fn expect_dir_or_absent(&self, key: &str) -> Result<()> {
        match self.nodes.get(key) {
            Some(Node::Value(_)) => Err(IpamError::InvalidKey(format!("{} is not a directory", key))),
            _ => Ok(()),
        }
    }

    fn check_parents(&self, key: &str) -> Result<()> {
        let mut current = parent(key);
        while let Some(dir) = current {
            self.expect_dir_or_absent(dir)?;
            current = parent(dir);
        }
        Ok(())
    }

    fn ensure_parents(&mut self, key: &str) {
        let mut current = parent(key);
        while let Some(dir) = current {
            self.nodes.entry(dir.to_string()).or_insert(Node::Dir);
            current = parent(dir);
        }
    }

    /// Validate an operation against current state
    ///
    /// Returns `false` when the operation is a no-op (idempotent delete,
    /// existing directory) and nothing needs to be logged or applied.
    fn check(&self, op: &Operation) -> Result<bool> {
        let key = op.key();
        validate_key(key)?;

        match op {
            Operation::Create { key, .. } => {
                if self.nodes.contains_key(key) {
                    return Err(IpamError::Conflict(key.clone()));
                }
                self.check_parents(key)?;
                Ok(true)
            }
            Operation::Mkdir { key } => match self.nodes.get(key) {
                Some(Node::Dir) => Ok(false),
                Some(Node::Value(_)) => Err(IpamError::Conflict(key.clone())),
                None => {
                    self.check_parents(key)?;
                    Ok(true)
                }
            },
            Operation::Delete { key } => match self.nodes.get(key) {
                Some(Node::Value(_)) => Ok(true),
                Some(Node::Dir) => Err(IpamError::InvalidKey(format!("{} is a directory", key))),
                None => Ok(false),
            },
            Operation::DeleteIfEmpty { key } => match self.nodes.get(key) {
                Some(Node::Dir) if self.has_children(key) => Err(IpamError::Conflict(key.clone())),
                Some(Node::Dir) => Ok(true),
                Some(Node::Value(_)) => Err(IpamError::InvalidKey(format!("{} is not a directory", key))),
                None => Ok(false),
            },
            Operation::DeleteTree { key } => {
                Ok(self.nodes.contains_key(key) || self.has_children(key))
            }
        }
    }

    /// Apply a checked operation
    fn apply(&mut self, op: Operation) {
        match op {
            Operation::Create { key, value } => {
                self.ensure_parents(&key);
                self.nodes.insert(key, Node::Value(value));
            }
            Operation::Mkdir { key } => {
                self.ensure_parents(&key);
                self.nodes.insert(key, Node::Dir);
            }
            Operation::Delete { key } | Operation::DeleteIfEmpty { key } => {
                self.nodes.remove(&key);
            }
            Operation::DeleteTree { key } => {
                let doomed: Vec<String> = self.descendants(&key).map(|(k, _)| k.clone()).collect();
                for k in doomed {
                    self.nodes.remove(&k);
                }
                self.nodes.remove(&key);
            }
        }
    }
}

/// In-memory directory-tree store
#[derive(Debug, Default)]
pub struct MemoryStore {
    tree: RwLock<Tree>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a mutation atomically
    ///
    /// `log` is called with the tree locked, after the operation has been
    /// validated and before it is applied. A failing `log` aborts the mutation.
    pub(crate) fn mutate<F>(&self, op: Operation, log: F) -> Result<()>
    where
        F: FnOnce(&Operation) -> Result<()>,
    {
        let mut tree = self.tree.write();
        if !tree.check(&op)? {
            return Ok(());
        }
        log(&op)?;
        tree.apply(op);
        Ok(())
    }

    /// Replay a logged operation, skipping ones that no longer apply
    pub(crate) fn replay(&self, op: Operation) -> bool {
        let mut tree = self.tree.write();
        match tree.check(&op) {
            Ok(true) => {
                tree.apply(op);
                true
            }
            _ => false,
        }
    }

    /// Operations that rebuild the current state from empty
    pub(crate) fn snapshot(&self) -> Vec<Operation> {
        let tree = self.tree.read();
        tree.nodes
            .iter()
            .map(|(key, node)| match node {
                Node::Dir => Operation::Mkdir { key: key.clone() },
                Node::Value(value) => Operation::Create {
                    key: key.clone(),
                    value: value.clone(),
                },
            })
            .collect()
    }

    /// Number of keys (directories included)
    pub fn len(&self) -> usize {
        self.tree.read().nodes.len()
    }

    /// Check if the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.tree.read().nodes.is_empty()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        match self.tree.read().nodes.get(key) {
            Some(Node::Value(value)) => Ok(Some(value.clone())),
            Some(Node::Dir) => Err(IpamError::InvalidKey(format!("{} is a directory", key))),
            None => Ok(None),
        }
    }

    fn create(&self, key: &str, value: &[u8]) -> Result<()> {
        self.mutate(
            Operation::Create {
                key: key.to_string(),
                value: value.to_vec(),
            },
            |_| Ok(()),
        )
    }

    fn mkdir(&self, key: &str) -> Result<()> {
        self.mutate(Operation::Mkdir { key: key.to_string() }, |_| Ok(()))
    }

    fn list(&self, key: &str) -> Result<Vec<String>> {
        validate_key(key)?;
        let tree = self.tree.read();
        tree.expect_dir_or_absent(key)?;

        let skip = key.len() + 1;
        let names = tree
            .descendants(key)
            .map(|(k, _)| &k[skip..])
            .filter(|name| !name.contains('/'))
            .map(str::to_string)
            .collect();
        Ok(names)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.mutate(Operation::Delete { key: key.to_string() }, |_| Ok(()))
    }

    fn delete_if_empty(&self, key: &str) -> Result<()> {
        self.mutate(Operation::DeleteIfEmpty { key: key.to_string() }, |_| Ok(()))
    }

    fn delete_tree(&self, key: &str) -> Result<()> {
        self.mutate(Operation::DeleteTree { key: key.to_string() }, |_| Ok(()))
    }

    fn ping(&self) -> Result<()> {
        Ok(())
    }
}

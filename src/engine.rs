//! Engine Module
//!
//! The durable store engine behind the store server.
//!
//! ## Responsibilities
//! - Serve the [`Store`] primitives from an in-memory tree
//! - Log every effective mutation to the WAL before applying it
//! - Recover the tree from the WAL on startup
//! - Compact the WAL once it grows past the configured threshold

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::config::{ServerConfig, WalSyncStrategy};
use crate::error::{IpamError, Result};
use crate::protocol::{encode_names, Command};
use crate::store::{MemoryStore, Store};
use crate::wal::{Operation, WalRecovery, WalWriter};

/// The durable store engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (create/mkdir/delete/...): Serialized by `write_lock`
///   - Only ONE write operation at a time
///   - Order: write_lock → tree (check) → WAL (append) → tree (apply)
///
/// - **Reads** (get/list): Concurrent
///   - No write_lock needed
///   - The tree uses an internal RwLock (many concurrent readers)
pub struct Engine {
    /// Engine configuration
    config: ServerConfig,

    /// Path of the write-ahead log
    wal_path: PathBuf,

    /// Write-ahead log for durability (exclusive access needed)
    wal: Mutex<WalWriter>,

    /// Live state
    tree: MemoryStore,

    /// Entries appended since the last compaction
    appended: AtomicU64,

    /// Serializes mutations and compaction
    write_lock: Mutex<()>,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const WAL_FILENAME: &'static str = "wal.log";
    const COMPACT_FILENAME: &'static str = "wal.log.compact";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Open/create data directory
    /// 2. Recover and replay the WAL if it exists
    /// 3. Rewrite the WAL from the recovered state
    /// 4. Ready to serve requests
    pub fn open(config: ServerConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let wal_path = config.data_dir.join(Self::WAL_FILENAME);
        let tree = MemoryStore::new();

        let mut recovered = 0;
        if wal_path.exists() {
            let (entries, result) = WalRecovery::recover(&wal_path)?;

            if result.entries_recovered > 0 || result.entries_corrupted > 0 {
                tracing::info!(
                    recovered = result.entries_recovered,
                    corrupted = result.entries_corrupted,
                    last_lsn = result.last_lsn,
                    "WAL recovery"
                );
            }

            for entry in entries {
                if !tree.replay(entry.operation) {
                    tracing::warn!(lsn = entry.lsn, "skipped WAL entry that no longer applies");
                }
            }
            recovered = result.entries_recovered;
        }

        if recovered > 0 {
            Self::rewrite(&config.data_dir, &wal_path, tree.snapshot())?;
        }

        let wal = WalWriter::open(&wal_path, config.wal_sync_strategy)?;

        tracing::debug!(keys = tree.len(), path = %wal_path.display(), "engine opened");

        Ok(Self {
            config,
            wal_path,
            wal: Mutex::new(wal),
            tree,
            appended: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = ServerConfig::builder().data_dir(path).build();
        Self::open(config)
    }

    /// Execute a protocol command
    ///
    /// GET misses are reported as `KeyNotFound`.
    pub fn execute(&self, command: Command) -> Result<Option<Vec<u8>>> {
        match command {
            Command::Get { key } => self.get(&key)?.map(Some).ok_or(IpamError::KeyNotFound),
            Command::Create { key, value } => {
                self.create(&key, &value)?;
                Ok(None)
            }
            Command::Mkdir { key } => {
                self.mkdir(&key)?;
                Ok(None)
            }
            Command::List { key } => Ok(Some(encode_names(&self.list(&key)?))),
            Command::Delete { key } => {
                self.delete(&key)?;
                Ok(None)
            }
            Command::DeleteIfEmpty { key } => {
                self.delete_if_empty(&key)?;
                Ok(None)
            }
            Command::DeleteTree { key } => {
                self.delete_tree(&key)?;
                Ok(None)
            }
            Command::Ping => Ok(Some(b"PONG".to_vec())),
        }
    }

    /// Log and apply a mutation
    fn mutate(&self, op: Operation) -> Result<()> {
        let _write_guard = self.write_lock.lock();

        let mut logged = false;
        self.tree.mutate(op, |op| {
            self.wal.lock().append(op.clone())?;
            logged = true;
            Ok(())
        })?;

        if logged {
            let appended = self.appended.fetch_add(1, Ordering::Relaxed) + 1;
            // The write is durable; a failed compaction leaves the counter
            // over the threshold so the next write tries again
            if appended >= self.config.compaction_threshold {
                if let Err(e) = self.compact_internal() {
                    tracing::warn!(error = %e, appended, "WAL compaction failed");
                }
            }
        }

        Ok(())
    }

    /// Rewrite the WAL from live state (public API)
    pub fn compact(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        self.compact_internal()
    }

    /// Internal compaction (called with write lock held)
    fn compact_internal(&self) -> Result<()> {
        let snapshot = self.tree.snapshot();
        let entries = snapshot.len();

        let mut wal = self.wal.lock();
        wal.sync()?;
        Self::rewrite(&self.config.data_dir, &self.wal_path, snapshot)?;
        *wal = WalWriter::open(&self.wal_path, self.config.wal_sync_strategy)?;
        self.appended.store(0, Ordering::Relaxed);

        tracing::debug!(entries, "WAL compacted");
        Ok(())
    }

    /// Replace the WAL at `wal_path` with `ops`, atomically via rename
    fn rewrite(data_dir: &Path, wal_path: &Path, ops: Vec<Operation>) -> Result<()> {
        let tmp_path = data_dir.join(Self::COMPACT_FILENAME);
        if tmp_path.exists() {
            fs::remove_file(&tmp_path)?;
        }

        {
            let mut tmp = WalWriter::open(&tmp_path, WalSyncStrategy::EveryNEntries { count: usize::MAX })?;
            for op in ops {
                tmp.append(op)?;
            }
            tmp.sync()?;
        }

        fs::rename(&tmp_path, wal_path)?;
        Ok(())
    }

    /// Close the engine gracefully
    ///
    /// Syncs any buffered WAL entries to disk
    pub fn close(self) -> Result<()> {
        self.wal.lock().sync()
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the WAL path
    pub fn wal_path(&self) -> &Path {
        &self.wal_path
    }

    /// Number of keys held (directories included)
    pub fn key_count(&self) -> usize {
        self.tree.len()
    }

    /// WAL entries appended since the last compaction
    pub fn wal_entries_since_compaction(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }

    /// Get the configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl Store for Engine {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.tree.get(key)
    }

    fn create(&self, key: &str, value: &[u8]) -> Result<()> {
        self.mutate(Operation::Create {
            key: key.to_string(),
            value: value.to_vec(),
        })
    }

    fn mkdir(&self, key: &str) -> Result<()> {
        self.mutate(Operation::Mkdir { key: key.to_string() })
    }

    fn list(&self, key: &str) -> Result<Vec<String>> {
        self.tree.list(key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.mutate(Operation::Delete { key: key.to_string() })
    }

    fn delete_if_empty(&self, key: &str) -> Result<()> {
        self.mutate(Operation::DeleteIfEmpty { key: key.to_string() })
    }

    fn delete_tree(&self, key: &str) -> Result<()> {
        self.mutate(Operation::DeleteTree { key: key.to_string() })
    }

    fn ping(&self) -> Result<()> {
        Ok(())
    }
}

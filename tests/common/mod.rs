//! Shared fixtures for the ipamkv test targets

#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ipamkv::error::{ErrorKind, Field, IpamError, Result};
use ipamkv::{FirstFitPolicy, Ipam, Keyspace, MemoryStore, Store};
use ipnet::Ipv4Net;
use parking_lot::Mutex;

pub const NAMESPACE: &str = "/ipam";

// =============================================================================
// Values
// =============================================================================

pub fn net(s: &str) -> Ipv4Net {
    s.parse().unwrap()
}

pub fn addr(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

// =============================================================================
// Engines
// =============================================================================

/// Keyspace over a fresh in-memory store
pub fn keyspace() -> Keyspace {
    keyspace_over(Arc::new(MemoryStore::new()))
}

pub fn keyspace_over(store: Arc<dyn Store>) -> Keyspace {
    Keyspace::new(store, NAMESPACE).unwrap()
}

/// `/24` subnets out of `10.80.0.0/12`
pub fn ipam(ks: &Keyspace, node: &str) -> Ipam {
    ipam_with(ks, node, "10.80.0.0/12", 24, 64)
}

pub fn ipam_with(ks: &Keyspace, node: &str, supernet: &str, prefix_len: u8, max_attempts: usize) -> Ipam {
    let policy = FirstFitPolicy::new(net(supernet), prefix_len).unwrap();
    Ipam::new(ks.clone(), Arc::new(policy), node, max_attempts)
}

// =============================================================================
// Assertions
// =============================================================================

/// Assert a field-tagged request error
pub fn assert_rejected<T: std::fmt::Debug>(result: Result<T>, field: Field, kind: ErrorKind) {
    match result {
        Err(IpamError::Request(e)) => {
            assert_eq!((e.field, e.kind), (field, kind), "unexpected error: {}", e);
        }
        other => panic!("expected {}: {}, got {:?}", field, kind, other),
    }
}

// =============================================================================
// Racing store double
// =============================================================================

struct Race {
    trigger: String,
    key: String,
    value: Vec<u8>,
    withdraw: bool,
}

struct Publish {
    key: String,
    value: Vec<u8>,
    reads: usize,
}

/// Memory store that lets a simulated competing writer slip in
///
/// A registered race fires once, on the first `create` whose key starts with
/// its trigger prefix: the racer's record is written first, then the real
/// create proceeds. A withdrawing racer deletes its record again right after
/// the next `list` is served. Keys under a `contended` prefix always conflict.
/// Deleted keys are logged in order.
#[derive(Default)]
pub struct RacingStore {
    inner: MemoryStore,
    races: Mutex<Vec<Race>>,
    withdrawing: Mutex<Option<String>>,
    publishes: Mutex<Vec<Publish>>,
    contended: Mutex<Option<String>>,
    creates: AtomicUsize,
    deleted: Mutex<Vec<String>>,
}

impl RacingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `key` just before the next create under `trigger`
    pub fn race_on(&self, trigger: &str, key: &str, value: &[u8]) {
        self.push_race(trigger, key, value, false);
    }

    /// Like [`race_on`](Self::race_on), with the racer backing off once it
    /// has seen the reservation set
    pub fn race_and_withdraw(&self, trigger: &str, key: &str, value: &[u8]) {
        self.push_race(trigger, key, value, true);
    }

    fn push_race(&self, trigger: &str, key: &str, value: &[u8], withdraw: bool) {
        self.races.lock().push(Race {
            trigger: trigger.to_string(),
            key: key.to_string(),
            value: value.to_vec(),
            withdraw,
        });
    }

    /// Write `key` once it has been read `reads` times, before the next read
    pub fn publish_after_reads(&self, key: &str, value: &[u8], reads: usize) {
        self.publishes.lock().push(Publish {
            key: key.to_string(),
            value: value.to_vec(),
            reads,
        });
    }

    /// Make every create under `prefix` fail with `Conflict`
    pub fn contend(&self, prefix: &str) {
        *self.contended.lock() = Some(prefix.to_string());
    }

    /// Number of creates attempted
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Keys deleted so far, in order
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }

    fn log_delete(&self, key: &str) {
        self.deleted.lock().push(key.to_string());
    }
}

impl Store for RacingStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let due = {
            let mut publishes = self.publishes.lock();
            let mut due = None;
            if let Some(idx) = publishes.iter().position(|p| p.key == key) {
                if publishes[idx].reads == 0 {
                    due = Some(publishes.remove(idx));
                } else {
                    publishes[idx].reads -= 1;
                }
            }
            due
        };
        if let Some(publish) = due {
            self.inner.create(&publish.key, &publish.value).unwrap();
        }

        self.inner.get(key)
    }

    fn create(&self, key: &str, value: &[u8]) -> Result<()> {
        self.creates.fetch_add(1, Ordering::SeqCst);

        if let Some(prefix) = self.contended.lock().as_deref() {
            if key.starts_with(prefix) {
                return Err(IpamError::Conflict(key.to_string()));
            }
        }

        let race = {
            let mut races = self.races.lock();
            races
                .iter()
                .position(|r| key.starts_with(&r.trigger))
                .map(|idx| races.remove(idx))
        };
        if let Some(race) = race {
            self.inner.create(&race.key, &race.value).unwrap();
            if race.withdraw {
                *self.withdrawing.lock() = Some(race.key);
            }
        }

        self.inner.create(key, value)
    }

    fn mkdir(&self, key: &str) -> Result<()> {
        self.inner.mkdir(key)
    }

    fn list(&self, key: &str) -> Result<Vec<String>> {
        let names = self.inner.list(key);
        if let Some(racer) = self.withdrawing.lock().take() {
            self.inner.delete(&racer).unwrap();
        }
        names
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.log_delete(key);
        self.inner.delete(key)
    }

    fn delete_if_empty(&self, key: &str) -> Result<()> {
        self.log_delete(key);
        self.inner.delete_if_empty(key)
    }

    fn delete_tree(&self, key: &str) -> Result<()> {
        self.log_delete(key);
        self.inner.delete_tree(key)
    }

    fn ping(&self) -> Result<()> {
        Ok(())
    }
}

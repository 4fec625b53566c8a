//! Tests for MemoryStore and Keyspace
//!
//! These tests verify:
//! - Atomic create-if-absent
//! - Implicit and explicit directories
//! - Delete, delete-if-empty and delete-tree semantics
//! - Key validation and namespacing

use std::sync::Arc;
use std::thread;

use ipamkv::error::IpamError;
use ipamkv::store::{validate_key, Keyspace, MemoryStore, Store};

// =============================================================================
// Create / Get Tests
// =============================================================================

#[test]
fn test_create_then_get() {
    let store = MemoryStore::new();

    store.create("/ipam/pools/kontena", b"{}").unwrap();

    assert_eq!(store.get("/ipam/pools/kontena").unwrap(), Some(b"{}".to_vec()));
    assert_eq!(store.get("/ipam/pools/other").unwrap(), None);
}

#[test]
fn test_create_existing_key_conflicts() {
    let store = MemoryStore::new();
    store.create("/ipam/pools/kontena", b"first").unwrap();

    match store.create("/ipam/pools/kontena", b"second") {
        Err(IpamError::Conflict(key)) => assert_eq!(key, "/ipam/pools/kontena"),
        other => panic!("expected conflict, got {:?}", other),
    }
    assert_eq!(store.get("/ipam/pools/kontena").unwrap(), Some(b"first".to_vec()));
}

#[test]
fn test_create_under_value_is_rejected() {
    let store = MemoryStore::new();
    store.create("/ipam/pools/kontena", b"").unwrap();

    assert!(matches!(
        store.create("/ipam/pools/kontena/child", b""),
        Err(IpamError::InvalidKey(_))
    ));
}

#[test]
fn test_get_directory_is_rejected() {
    let store = MemoryStore::new();
    store.mkdir("/ipam/addresses/kontena").unwrap();

    assert!(store.get("/ipam/addresses").is_err());
}

#[test]
fn test_concurrent_create_has_single_winner() {
    let store = Arc::new(MemoryStore::new());

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.create("/ipam/addresses/kontena/10.80.0.2", b"").is_ok())
        })
        .collect();

    let winners = handles.into_iter().filter_map(|h| h.join().unwrap().then_some(())).count();
    assert_eq!(winners, 1);
}

// =============================================================================
// Directory Tests
// =============================================================================

#[test]
fn test_list_immediate_children_sorted() {
    let store = MemoryStore::new();
    store.create("/ipam/addresses/b/10.0.0.1", b"").unwrap();
    store.create("/ipam/addresses/a/10.0.0.1", b"").unwrap();
    store.mkdir("/ipam/addresses/c").unwrap();

    assert_eq!(store.list("/ipam/addresses").unwrap(), vec!["a", "b", "c"]);
    assert_eq!(store.list("/ipam").unwrap(), vec!["addresses"]);
}

#[test]
fn test_list_missing_directory_is_empty() {
    let store = MemoryStore::new();

    assert!(store.list("/ipam/pools").unwrap().is_empty());
}

#[test]
fn test_list_ignores_sibling_prefixes() {
    let store = MemoryStore::new();
    store.create("/ipam/pool/x", b"").unwrap();
    store.create("/ipam/pools/y", b"").unwrap();

    assert_eq!(store.list("/ipam/pool").unwrap(), vec!["x"]);
}

#[test]
fn test_mkdir_is_idempotent() {
    let store = MemoryStore::new();

    store.mkdir("/ipam/addresses/kontena").unwrap();
    store.mkdir("/ipam/addresses/kontena").unwrap();

    assert_eq!(store.list("/ipam/addresses").unwrap(), vec!["kontena"]);
    assert!(store.list("/ipam/addresses/kontena").unwrap().is_empty());
}

#[test]
fn test_mkdir_over_value_conflicts() {
    let store = MemoryStore::new();
    store.create("/ipam/pools/kontena", b"").unwrap();

    assert!(store.mkdir("/ipam/pools/kontena").unwrap_err().is_conflict());
}

// =============================================================================
// Delete Tests
// =============================================================================

#[test]
fn test_delete_is_idempotent() {
    let store = MemoryStore::new();
    store.create("/ipam/pools/kontena", b"").unwrap();

    store.delete("/ipam/pools/kontena").unwrap();
    store.delete("/ipam/pools/kontena").unwrap();

    assert_eq!(store.get("/ipam/pools/kontena").unwrap(), None);
}

#[test]
fn test_delete_if_empty() {
    let store = MemoryStore::new();
    store.create("/ipam/nodes/kontena/node1", b"").unwrap();

    assert!(store.delete_if_empty("/ipam/nodes/kontena").unwrap_err().is_conflict());

    store.delete("/ipam/nodes/kontena/node1").unwrap();
    store.delete_if_empty("/ipam/nodes/kontena").unwrap();
    store.delete_if_empty("/ipam/nodes/kontena").unwrap();

    assert!(store.list("/ipam/nodes").unwrap().is_empty());
}

#[test]
fn test_delete_if_empty_single_winner() {
    let store = Arc::new(MemoryStore::new());
    store.mkdir("/ipam/nodes/kontena").unwrap();

    // Every caller succeeds (absent is a no-op), but the directory is gone exactly once
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.delete_if_empty("/ipam/nodes/kontena").is_ok())
        })
        .collect();

    assert!(handles.into_iter().all(|h| h.join().unwrap()));
    assert!(store.list("/ipam/nodes").unwrap().is_empty());
}

#[test]
fn test_delete_tree() {
    let store = MemoryStore::new();
    store.create("/ipam/addresses/kontena/10.0.0.1", b"").unwrap();
    store.create("/ipam/addresses/kontena/10.0.0.2", b"").unwrap();
    store.create("/ipam/addresses/kontenax/10.0.0.3", b"").unwrap();

    store.delete_tree("/ipam/addresses/kontena").unwrap();
    store.delete_tree("/ipam/addresses/kontena").unwrap();

    assert_eq!(store.list("/ipam/addresses").unwrap(), vec!["kontenax"]);
    assert_eq!(store.get("/ipam/addresses/kontenax/10.0.0.3").unwrap(), Some(Vec::new()));
}

// =============================================================================
// Key Validation Tests
// =============================================================================

#[test]
fn test_validate_key() {
    assert!(validate_key("/ipam/pools/kontena").is_ok());
    assert!(validate_key("/ipam/subnets/10.80.0.0-24").is_ok());

    for bad in ["", "/", "ipam", "/ipam/", "/ipam//pools", "/ipam/my pool", "/ipam/\tx"] {
        assert!(validate_key(bad).is_err(), "{:?} should be invalid", bad);
    }
}

// =============================================================================
// Keyspace Tests
// =============================================================================

#[test]
fn test_keyspace_prefixes_root() {
    let store = Arc::new(MemoryStore::new());
    let ks = Keyspace::new(store.clone(), "/ipam").unwrap();

    ks.create("pools/kontena", b"p").unwrap();

    assert_eq!(ks.key("pools/kontena"), "/ipam/pools/kontena");
    assert_eq!(store.get("/ipam/pools/kontena").unwrap(), Some(b"p".to_vec()));
    assert_eq!(ks.list("pools").unwrap(), vec!["kontena"]);
}

#[test]
fn test_keyspaces_are_isolated() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let a = Keyspace::new(store.clone(), "/a").unwrap();
    let b = Keyspace::new(store, "/b").unwrap();

    a.create("pools/kontena", b"").unwrap();

    assert!(b.list("pools").unwrap().is_empty());
    b.create("pools/kontena", b"").unwrap();
}

#[test]
fn test_keyspace_rejects_bad_root() {
    let store = Arc::new(MemoryStore::new());

    assert!(Keyspace::new(store.clone(), "ipam").is_err());
    assert!(Keyspace::new(store, "/ipam/").is_err());
}

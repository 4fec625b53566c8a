//! Tests for pool requests
//!
//! These tests verify:
//! - First-fit dynamic subnet allocation and exhaustion
//! - Static subnets with and without an iprange
//! - Idempotent create-or-get and configuration mismatches
//! - Request validation (never touches the store)
//! - Conflict retries, including racing writers and the retry ceiling

#[path = "../common/mod.rs"]
mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use common::{addr, assert_rejected, ipam, ipam_with, keyspace, keyspace_over, net, RacingStore};
use ipamkv::cidr;
use ipamkv::error::{ErrorKind, Field, IpamError};
use ipamkv::model::{Pool, PoolNode, SubnetReservation};
use ipamkv::PoolRequest;

// =============================================================================
// Dynamic Allocation Tests
// =============================================================================

#[test]
fn test_dynamic_pools_are_first_fit() {
    let ks = keyspace();
    let ipam = ipam(&ks, "node1");

    let kontena = ipam.request_pool(&PoolRequest::new("kontena")).unwrap();
    let other = ipam.request_pool(&PoolRequest::new("other")).unwrap();

    assert_eq!(kontena.subnet, net("10.80.0.0/24"));
    assert_eq!(other.subnet, net("10.80.1.0/24"));
}

#[test]
fn test_dynamic_pool_gets_first_host_as_gateway() {
    let ks = keyspace();
    let ipam = ipam(&ks, "node1");

    let pool = ipam.request_pool(&PoolRequest::new("kontena")).unwrap();

    assert_eq!(pool.gateway, Some(addr("10.80.0.1")));
    assert_eq!(pool.iprange, None);
    assert_eq!(Pool::get(&ks, "kontena").unwrap(), Some(pool));
}

#[test]
fn test_dynamic_pool_skips_static_reservations() {
    let ks = keyspace();
    let ipam = ipam(&ks, "node1");

    ipam.request_pool(&PoolRequest::new("static").subnet("10.80.0.0/16")).unwrap();
    let pool = ipam.request_pool(&PoolRequest::new("dynamic")).unwrap();

    assert_eq!(pool.subnet, net("10.81.0.0/24"));
}

#[test]
fn test_empty_parameters_are_discarded() {
    let ks = keyspace();
    let ipam = ipam(&ks, "node1");

    let request = PoolRequest {
        network: "kontena".to_string(),
        subnet: Some(String::new()),
        iprange: Some(String::new()),
        ipv6: None,
    };
    let pool = ipam.request_pool(&request).unwrap();

    assert_eq!(pool.subnet, net("10.80.0.0/24"));
}

#[test]
fn test_supernet_exhaustion_is_allocate_error() {
    let ks = keyspace();
    let ipam = ipam_with(&ks, "node1", "10.80.0.0/23", 24, 64);

    ipam.request_pool(&PoolRequest::new("a")).unwrap();
    ipam.request_pool(&PoolRequest::new("b")).unwrap();

    assert_rejected(ipam.request_pool(&PoolRequest::new("c")), Field::Subnet, ErrorKind::Allocate);
    assert_eq!(Pool::get(&ks, "c").unwrap(), None);
}

#[test]
fn test_concurrent_dynamic_pools_are_disjoint() {
    let ks = keyspace();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let ks = ks.clone();
            thread::spawn(move || {
                let ipam = ipam(&ks, "node1");
                ipam.request_pool(&PoolRequest::new(format!("net{}", i))).unwrap()
            })
        })
        .collect();

    let pools: Vec<Pool> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for (i, a) in pools.iter().enumerate() {
        for b in &pools[i + 1..] {
            assert!(!cidr::overlaps(&a.subnet, &b.subnet), "{} overlaps {}", a.subnet, b.subnet);
        }
    }
    assert_eq!(SubnetReservation::list(&ks).unwrap().len(), 8);
}

#[test]
fn test_concurrent_identical_requests_share_one_pool() {
    let ks = keyspace();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let ks = ks.clone();
            thread::spawn(move || {
                let ipam = ipam(&ks, &format!("node{}", i));
                ipam.request_pool(&PoolRequest::new("kontena")).unwrap()
            })
        })
        .collect();

    let subnets: HashSet<_> = handles.into_iter().map(|h| h.join().unwrap().subnet).collect();

    assert_eq!(subnets.len(), 1);
    assert_eq!(SubnetReservation::list(&ks).unwrap().len(), 1);
    assert_eq!(PoolNode::list(&ks, "kontena").unwrap().len(), 8);
}

// =============================================================================
// Static Allocation Tests
// =============================================================================

#[test]
fn test_static_pool_with_iprange() {
    let ks = keyspace();
    let ipam = ipam(&ks, "node1");

    let pool = ipam
        .request_pool(&PoolRequest::new("kontena").subnet("10.81.0.0/16").iprange("10.81.1.0/29"))
        .unwrap();

    assert_eq!(pool.id, "kontena");
    assert_eq!(pool.subnet, net("10.81.0.0/16"));
    assert_eq!(pool.iprange, Some(net("10.81.1.0/29")));
    assert_eq!(pool.gateway, Some(addr("10.81.0.1")));
    assert_eq!(pool.allocation_range(), net("10.81.1.0/29"));
}

#[test]
fn test_static_subnet_host_bits_are_masked() {
    let ks = keyspace();
    let ipam = ipam(&ks, "node1");

    let pool = ipam.request_pool(&PoolRequest::new("kontena").subnet("10.81.7.9/16")).unwrap();

    assert_eq!(pool.subnet, net("10.81.0.0/16"));
}

#[test]
fn test_static_subnet_outside_supernet_is_allowed() {
    let ks = keyspace();
    let ipam = ipam(&ks, "node1");

    let pool = ipam.request_pool(&PoolRequest::new("kontena").subnet("192.168.0.0/24")).unwrap();

    assert_eq!(pool.subnet, net("192.168.0.0/24"));
}

#[test]
fn test_static_overlap_is_terminal_conflict() {
    let ks = keyspace();
    let ipam = ipam(&ks, "node1");

    ipam.request_pool(&PoolRequest::new("a").subnet("10.81.0.0/16")).unwrap();

    assert_rejected(
        ipam.request_pool(&PoolRequest::new("b").subnet("10.81.1.0/24")),
        Field::Subnet,
        ErrorKind::Conflict,
    );
    assert_rejected(
        ipam.request_pool(&PoolRequest::new("c").subnet("10.81.0.0/16")),
        Field::Subnet,
        ErrorKind::Conflict,
    );
    assert_rejected(
        ipam.request_pool(&PoolRequest::new("d").subnet("10.0.0.0/8")),
        Field::Subnet,
        ErrorKind::Conflict,
    );

    assert_eq!(Pool::list(&ks).unwrap().len(), 1);
    assert_eq!(SubnetReservation::list(&ks).unwrap(), vec![net("10.81.0.0/16")]);
}

// =============================================================================
// Existing Pool Tests
// =============================================================================

#[test]
fn test_identical_static_request_is_idempotent() {
    let ks = keyspace();
    let ipam = ipam(&ks, "node1");
    let request = PoolRequest::new("kontena").subnet("10.81.0.0/16").iprange("10.81.1.0/29");

    let first = ipam.request_pool(&request).unwrap();
    let second = ipam.request_pool(&request).unwrap();

    assert_eq!(first, second);
    assert_eq!(PoolNode::list(&ks, "kontena").unwrap(), vec!["node1".to_string()]);
}

#[test]
fn test_dynamic_request_joins_existing_pool() {
    let ks = keyspace();
    let node1 = ipam(&ks, "node1");
    let node2 = ipam(&ks, "node2");

    let created = node1.request_pool(&PoolRequest::new("kontena").subnet("10.81.0.0/16")).unwrap();
    let joined = node2.request_pool(&PoolRequest::new("kontena")).unwrap();

    assert_eq!(created, joined);
    assert_eq!(
        PoolNode::list(&ks, "kontena").unwrap(),
        vec!["node1".to_string(), "node2".to_string()]
    );
}

#[test]
fn test_subnet_mismatch_is_config_error() {
    let ks = keyspace();
    let ipam = ipam(&ks, "node1");

    ipam.request_pool(&PoolRequest::new("kontena").subnet("10.81.0.0/16")).unwrap();

    assert_rejected(
        ipam.request_pool(&PoolRequest::new("kontena").subnet("10.82.0.0/16")),
        Field::Subnet,
        ErrorKind::Config,
    );
}

#[test]
fn test_iprange_mismatch_is_config_error() {
    let ks = keyspace();
    let ipam = ipam(&ks, "node1");

    ipam.request_pool(&PoolRequest::new("kontena").subnet("10.81.0.0/16")).unwrap();

    assert_rejected(
        ipam.request_pool(&PoolRequest::new("kontena").subnet("10.81.0.0/16").iprange("10.81.1.0/29")),
        Field::IpRange,
        ErrorKind::Config,
    );
}

#[test]
fn test_config_error_does_not_mark_node() {
    let ks = keyspace();
    let node1 = ipam(&ks, "node1");
    let node2 = ipam(&ks, "node2");

    node1.request_pool(&PoolRequest::new("kontena").subnet("10.81.0.0/16")).unwrap();
    let result = node2.request_pool(&PoolRequest::new("kontena").subnet("10.82.0.0/16"));

    assert!(result.is_err());
    assert_eq!(PoolNode::list(&ks, "kontena").unwrap(), vec!["node1".to_string()]);
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_validation_errors() {
    let ks = keyspace();
    let ipam = ipam(&ks, "node1");

    let cases = vec![
        (PoolRequest::new(""), Field::Network, ErrorKind::Required),
        (PoolRequest::new("a/b"), Field::Network, ErrorKind::Invalid),
        (PoolRequest::new("a b"), Field::Network, ErrorKind::Invalid),
        (PoolRequest::new("kontena").subnet("bogus"), Field::Subnet, ErrorKind::Invalid),
        (PoolRequest::new("kontena").subnet("10.81.0.0/33"), Field::Subnet, ErrorKind::Invalid),
        (
            PoolRequest::new("kontena").subnet("10.81.0.0/16").iprange("bogus"),
            Field::IpRange,
            ErrorKind::Invalid,
        ),
        (PoolRequest::new("kontena").ipv6(true), Field::Ipv6, ErrorKind::NotSupported),
        (PoolRequest::new("kontena").subnet("fd00::/64"), Field::Ipv6, ErrorKind::NotSupported),
        (
            PoolRequest::new("kontena").subnet("10.81.0.0/16").iprange("10.82.1.0/29"),
            Field::IpRange,
            ErrorKind::OutOfPool,
        ),
        (PoolRequest::new("kontena").iprange("10.81.1.0/29"), Field::Subnet, ErrorKind::Required),
    ];

    for (request, field, kind) in cases {
        assert_rejected(ipam.request_pool(&request), field, kind);
    }

    assert!(ks.list("pools").unwrap().is_empty());
    assert!(ks.list("subnets").unwrap().is_empty());
}

#[test]
fn test_ipv6_false_is_accepted() {
    let ks = keyspace();
    let ipam = ipam(&ks, "node1");

    assert!(ipam.request_pool(&PoolRequest::new("kontena").ipv6(false)).is_ok());
}

#[test]
fn test_request_error_display() {
    let ks = keyspace();
    let ipam = ipam(&ks, "node1");

    let err = ipam.request_pool(&PoolRequest::new("kontena").ipv6(true)).unwrap_err();

    assert_eq!(err.to_string(), "ipv6: not_supported: IPv6 is not supported");
}

// =============================================================================
// Retry Tests
// =============================================================================

#[test]
fn test_dynamic_retries_after_racing_overlap() {
    let store = Arc::new(RacingStore::new());
    let ks = keyspace_over(store.clone());
    let ipam = ipam(&ks, "node1");

    // A racer reserves a /16 covering our first candidate between our read and write
    store.race_on(
        "/ipam/subnets/",
        "/ipam/subnets/10.80.0.0-16",
        br#"{"subnet":"10.80.0.0/16","pool":"racer"}"#,
    );

    let pool = ipam.request_pool(&PoolRequest::new("kontena")).unwrap();

    assert_eq!(pool.subnet, net("10.81.0.0/24"));
    assert_eq!(
        SubnetReservation::list(&ks).unwrap(),
        vec![net("10.80.0.0/16"), net("10.81.0.0/24")]
    );
}

#[test]
fn test_dynamic_retries_after_racing_identical_subnet() {
    let store = Arc::new(RacingStore::new());
    let ks = keyspace_over(store.clone());
    let ipam = ipam(&ks, "node1");

    store.race_on(
        "/ipam/subnets/",
        "/ipam/subnets/10.80.0.0-24",
        br#"{"subnet":"10.80.0.0/24","pool":"racer"}"#,
    );

    let pool = ipam.request_pool(&PoolRequest::new("kontena")).unwrap();

    assert_eq!(pool.subnet, net("10.80.1.0/24"));
}

#[test]
fn test_retry_ceiling_is_internal_error() {
    let store = Arc::new(RacingStore::new());
    let ks = keyspace_over(store.clone());
    let ipam = ipam_with(&ks, "node1", "10.80.0.0/12", 24, 3);

    store.contend("/ipam/subnets/");

    match ipam.request_pool(&PoolRequest::new("kontena")) {
        Err(IpamError::RetryLimit { operation, attempts }) => {
            assert_eq!(operation, "request_pool");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected retry limit, got {:?}", other),
    }
    assert_eq!(store.creates(), 3);
    assert_eq!(Pool::get(&ks, "kontena").unwrap(), None);
}

#[test]
fn test_static_conflict_is_not_retried() {
    let store = Arc::new(RacingStore::new());
    let ks = keyspace_over(store.clone());
    let ipam = ipam(&ks, "node1");

    store.contend("/ipam/subnets/");

    assert_rejected(
        ipam.request_pool(&PoolRequest::new("kontena").subnet("10.81.0.0/16")),
        Field::Subnet,
        ErrorKind::Conflict,
    );
    assert_eq!(store.creates(), 1);
}

#[test]
fn test_static_request_joins_pool_created_concurrently() {
    let store = Arc::new(RacingStore::new());
    let ks = keyspace_over(store.clone());
    let ipam = ipam(&ks, "node2");

    // Another node holds the reservation and is about to write the pool record
    SubnetReservation::reserve(&ks, net("10.81.0.0/16"), "kontena").unwrap();
    store.publish_after_reads(
        "/ipam/pools/kontena",
        br#"{"subnet":"10.81.0.0/16","gateway":"10.81.0.1"}"#,
        2,
    );

    let pool = ipam
        .request_pool(&PoolRequest::new("kontena").subnet("10.81.0.0/16"))
        .unwrap();

    assert_eq!(pool.subnet, net("10.81.0.0/16"));
    assert_eq!(pool.gateway, Some(addr("10.81.0.1")));
    assert_eq!(SubnetReservation::list(&ks).unwrap(), vec![net("10.81.0.0/16")]);
    assert_eq!(PoolNode::list(&ks, "kontena").unwrap(), vec!["node2"]);
}

#[test]
fn test_static_request_gives_up_on_abandoned_reservation() {
    let ks = keyspace();
    let ipam = ipam(&ks, "node2");

    // Reserved under the same id, but no pool record ever follows
    SubnetReservation::reserve(&ks, net("10.81.0.0/16"), "kontena").unwrap();

    assert_rejected(
        ipam.request_pool(&PoolRequest::new("kontena").subnet("10.81.0.0/16")),
        Field::Subnet,
        ErrorKind::Conflict,
    );
    assert_eq!(Pool::get(&ks, "kontena").unwrap(), None);
}

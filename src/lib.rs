//! # ipamkv
//!
//! IP address management for container networks, coordinated through a
//! strongly-consistent key-value store:
//! - Non-overlapping IPv4 subnets handed out per network ("pools")
//! - Unique host addresses inside each pool
//! - Optimistic concurrency: atomic create is the only critical section
//! - Refcounted pool release across hosts
//!
//! The crate also ships the store itself: an in-memory directory tree made
//! durable by a write-ahead log and served over TCP.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Ipam (request / release ops)                 │
//! │           validate → resolve → reserve → verify              │
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │                              │
//!                ▼                              ▼
//!   ┌────────────────────────┐        ┌─────────────────┐
//!   │ Pool / Address /       │        │ Policy          │
//!   │ SubnetReservation      │        │ (first fit)     │
//!   └───────────┬────────────┘        └─────────────────┘
//!               │ Keyspace
//!               ▼
//!   ┌────────────────────────┐  TCP   ┌─────────────────┐
//!   │ Store: Memory / Remote │ ─────▶ │ Server → Engine │
//!   └────────────────────────┘        │  (tree + WAL)   │
//!                                     └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod cidr;
pub mod policy;
pub mod store;
pub mod model;
pub mod ops;

pub mod wal;
pub mod network;
pub mod protocol;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ErrorKind, Field, IpamError, RequestError, Result};
pub use config::{Config, ServerConfig};
pub use engine::Engine;
pub use model::{Address, Pool, PoolRelease};
pub use ops::{AddressRequest, Ipam, PoolRequest};
pub use policy::{FirstFitPolicy, Policy};
pub use store::{Keyspace, MemoryStore, RemoteStore, Store};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of ipamkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

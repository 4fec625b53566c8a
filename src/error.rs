//! Error types for ipamkv
//!
//! Provides a unified error type for all operations. Business failures of the
//! request/release operations are carried as field-tagged [`RequestError`]s so
//! that a protocol shim can map them onto its own error payloads.

use std::fmt;

use thiserror::Error;

/// Result type alias using IpamError
pub type Result<T> = std::result::Result<T, IpamError>;

/// Unified error type for ipamkv operations
#[derive(Debug, Error)]
pub enum IpamError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    // -------------------------------------------------------------------------
    // Store Errors
    // -------------------------------------------------------------------------
    /// Atomic create hit an existing key, or delete-if-empty hit a non-empty directory
    #[error("Conflict on {0}")]
    Conflict(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Key not found")]
    KeyNotFound,

    /// Error reported by a remote store server
    #[error("Store error: {0}")]
    Store(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Allocation Errors
    // -------------------------------------------------------------------------
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Conflict retries exceeded the configured ceiling
    #[error("{operation} gave up after {attempts} conflicting attempts")]
    RetryLimit { operation: &'static str, attempts: usize },
}

impl IpamError {
    /// Whether this is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, IpamError::Conflict(_))
    }

    /// The field-tagged request error, if this is one
    pub fn request(&self) -> Option<&RequestError> {
        match self {
            IpamError::Request(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for IpamError {
    fn from(e: serde_json::Error) -> Self {
        IpamError::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for IpamError {
    fn from(e: bincode::Error) -> Self {
        IpamError::Serialization(e.to_string())
    }
}

/// Request parameter an error is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Network,
    Pool,
    PoolId,
    Subnet,
    IpRange,
    Ipv6,
    Address,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Network => "network",
            Field::Pool => "pool",
            Field::PoolId => "pool_id",
            Field::Subnet => "subnet",
            Field::IpRange => "iprange",
            Field::Ipv6 => "ipv6",
            Field::Address => "address",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Symbolic error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing required parameter
    Required,
    /// Malformed parameter
    Invalid,
    /// Referenced pool does not exist
    NotFound,
    /// IPv6 requested
    NotSupported,
    /// Parameter lies outside the pool subnet
    OutOfPool,
    /// Explicitly requested resource is already taken
    Conflict,
    /// Existing pool was created with different parameters
    Config,
    /// Nothing left to allocate
    Allocate,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Required => "required",
            ErrorKind::Invalid => "invalid",
            ErrorKind::NotFound => "not_found",
            ErrorKind::NotSupported => "not_supported",
            ErrorKind::OutOfPool => "out_of_pool",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Config => "config",
            ErrorKind::Allocate => "allocate",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field-tagged request failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {kind}: {message}")]
pub struct RequestError {
    pub field: Field,
    pub kind: ErrorKind,
    pub message: String,
}

impl RequestError {
    pub fn new(field: Field, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            field,
            kind,
            message: message.into(),
        }
    }
}

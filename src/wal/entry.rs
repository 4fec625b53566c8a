//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{IpamError, Result};

/// Entry header: LSN (8) + CRC (4) + data length (4)
pub const HEADER_SIZE: usize = 16;

/// Largest accepted entry body (guards against garbage lengths)
pub const MAX_ENTRY_SIZE: usize = 64 * 1024 * 1024;

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// The operation to perform
    pub operation: Operation,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,
}

/// Store mutations that can be logged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Create a value that must not exist yet
    Create { key: String, value: Vec<u8> },

    /// Create a directory
    Mkdir { key: String },

    /// Delete a value
    Delete { key: String },

    /// Delete an empty directory
    DeleteIfEmpty { key: String },

    /// Delete a directory recursively
    DeleteTree { key: String },
}

impl Operation {
    /// Key the operation targets
    pub fn key(&self) -> &str {
        match self {
            Operation::Create { key, .. }
            | Operation::Mkdir { key }
            | Operation::Delete { key }
            | Operation::DeleteIfEmpty { key }
            | Operation::DeleteTree { key } => key,
        }
    }
}

impl WalEntry {
    /// Create an entry stamped with the current time
    pub fn new(lsn: u64, operation: Operation) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            lsn,
            operation,
            timestamp,
        }
    }

    /// Encode as `LSN (8) | CRC (4) | Len (4) | Data`
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let data = bincode::serialize(self)?;
        let crc = Self::checksum(self.lsn, &data);

        let mut bytes = Vec::with_capacity(HEADER_SIZE + data.len());
        bytes.extend_from_slice(&self.lsn.to_be_bytes());
        bytes.extend_from_slice(&crc.to_be_bytes());
        bytes.extend_from_slice(&(data.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&data);
        Ok(bytes)
    }

    /// Decode a complete entry, verifying its checksum
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let (lsn, crc, len) = Self::parse_header(bytes)?;

        if bytes.len() < HEADER_SIZE + len {
            return Err(IpamError::WalCorruption(format!(
                "truncated entry: expected {} data bytes, got {}",
                len,
                bytes.len() - HEADER_SIZE
            )));
        }

        Self::decode_body(lsn, crc, &bytes[HEADER_SIZE..HEADER_SIZE + len])
    }

    /// Parse a header into (lsn, crc, data length)
    pub(crate) fn parse_header(bytes: &[u8]) -> Result<(u64, u32, usize)> {
        if bytes.len() < HEADER_SIZE {
            return Err(IpamError::WalCorruption(format!(
                "incomplete header: expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let mut lsn = [0u8; 8];
        lsn.copy_from_slice(&bytes[0..8]);
        let crc = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let len = u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;

        if len > MAX_ENTRY_SIZE {
            return Err(IpamError::WalCorruption(format!("entry length {} exceeds limit", len)));
        }

        Ok((u64::from_be_bytes(lsn), crc, len))
    }

    /// Verify and decode an entry body
    pub(crate) fn decode_body(lsn: u64, crc: u32, data: &[u8]) -> Result<Self> {
        let actual = Self::checksum(lsn, data);
        if actual != crc {
            return Err(IpamError::WalCorruption(format!(
                "CRC mismatch at lsn {}: stored {:08x}, computed {:08x}",
                lsn, crc, actual
            )));
        }

        let entry: WalEntry = bincode::deserialize(data)?;
        if entry.lsn != lsn {
            return Err(IpamError::WalCorruption(format!(
                "LSN mismatch: header {}, body {}",
                lsn, entry.lsn
            )));
        }
        Ok(entry)
    }

    /// CRC over the LSN and the encoded body
    pub fn compute_crc(&self) -> Result<u32> {
        let data = bincode::serialize(self)?;
        Ok(Self::checksum(self.lsn, &data))
    }

    /// Total encoded size in bytes
    pub fn serialized_size(&self) -> Result<usize> {
        Ok(HEADER_SIZE + bincode::serialized_size(self)? as usize)
    }

    fn checksum(lsn: u64, data: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&lsn.to_be_bytes());
        hasher.update(data);
        hasher.finalize()
    }
}

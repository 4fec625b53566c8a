//! Store replies

use crate::error::{IpamError, Result};

/// Reply status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    NotFound = 0x01,
    Error = 0x02,
    /// A create hit an existing key or a directory removal found children
    Conflict = 0x03,
}

impl Status {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Status::Ok),
            0x01 => Some(Status::NotFound),
            0x02 => Some(Status::Error),
            0x03 => Some(Status::Conflict),
            _ => None,
        }
    }
}

/// One reply frame
///
/// The payload carries the value for GET, encoded names for LIST, the
/// contested key for CONFLICT and a message for ERROR.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: Status,
    pub payload: Option<Vec<u8>>,
}

impl Response {
    fn with_text(status: Status, text: &str) -> Self {
        Self {
            status,
            payload: Some(text.as_bytes().to_vec()),
        }
    }

    pub fn ok(payload: Option<Vec<u8>>) -> Self {
        Self {
            status: Status::Ok,
            payload,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: Status::NotFound,
            payload: None,
        }
    }

    pub fn error(message: &str) -> Self {
        Self::with_text(Status::Error, message)
    }

    pub fn conflict(key: &str) -> Self {
        Self::with_text(Status::Conflict, key)
    }

    /// Reply for an engine outcome
    pub fn from_result(result: Result<Option<Vec<u8>>>) -> Self {
        match result {
            Ok(payload) => Self::ok(payload),
            Err(IpamError::KeyNotFound) => Self::not_found(),
            Err(IpamError::Conflict(key)) => Self::conflict(&key),
            Err(e) => Self::error(&e.to_string()),
        }
    }

    /// Payload as (lossy) UTF-8 text
    pub fn text(&self) -> String {
        self.payload
            .as_deref()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .unwrap_or_default()
    }
}

//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//!
//! ### Request (Command) Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Cmd (1)  │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Payload by Command Type
//! - CREATE: key_len (4 bytes) + key + value
//! - PING:   empty
//! - others: key_len (4 bytes) + key
//!
//! ### LIST Response Payload
//! ```text
//! count (4) + [name_len (4) + name]*
//! ```

use std::io::{self, Read, Write};

use bytes::{Buf, BufMut, BytesMut};

use super::{Command, CommandType, Response, Status};
use crate::error::{IpamError, Result};

/// Header size: 1 byte command/status + 4 bytes length
pub const HEADER_SIZE: usize = 5;

/// Maximum payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

// =============================================================================
// Command Encoding/Decoding
// =============================================================================

/// Encode a command to bytes
///
/// Format: cmd_type (1) + payload_len (4) + payload
pub fn encode_command(command: &Command) -> Vec<u8> {
    let mut payload = BytesMut::new();

    match command {
        Command::Create { key, value } => {
            put_string(&mut payload, key);
            payload.put_slice(value);
        }
        Command::Ping => {}
        other => {
            if let Some(key) = other.key() {
                put_string(&mut payload, key);
            }
        }
    }

    frame(command.command_type() as u8, &payload)
}

/// Decode a command from bytes
pub fn decode_command(bytes: &[u8]) -> Result<Command> {
    let (cmd_type, payload) = unframe(bytes, "command")?;

    let cmd_type = CommandType::from_byte(cmd_type).ok_or_else(|| {
        IpamError::Protocol(format!("Unknown command type: 0x{:02x}", cmd_type))
    })?;

    let mut buf = payload;
    let command = match cmd_type {
        CommandType::Ping => Command::Ping,
        CommandType::Create => {
            let key = get_string(&mut buf, "CREATE")?;
            let value = buf.to_vec();
            buf = &[];
            Command::Create { key, value }
        }
        CommandType::Get => Command::Get { key: get_string(&mut buf, "GET")? },
        CommandType::Delete => Command::Delete { key: get_string(&mut buf, "DELETE")? },
        CommandType::Mkdir => Command::Mkdir { key: get_string(&mut buf, "MKDIR")? },
        CommandType::List => Command::List { key: get_string(&mut buf, "LIST")? },
        CommandType::DeleteIfEmpty => Command::DeleteIfEmpty { key: get_string(&mut buf, "RMDIR")? },
        CommandType::DeleteTree => Command::DeleteTree { key: get_string(&mut buf, "RMTREE")? },
    };

    if !buf.is_empty() {
        return Err(IpamError::Protocol(format!(
            "{:?} command: {} unexpected trailing bytes",
            cmd_type,
            buf.len()
        )));
    }

    Ok(command)
}

// =============================================================================
// Response Encoding/Decoding
// =============================================================================

/// Encode a response to bytes
///
/// Format: status (1) + payload_len (4) + payload
pub fn encode_response(response: &Response) -> Vec<u8> {
    let payload = response.payload.as_deref().unwrap_or(&[]);
    frame(response.status as u8, payload)
}

/// Decode a response from bytes
pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    let (status_byte, payload) = unframe(bytes, "response")?;

    let status = Status::from_byte(status_byte).ok_or_else(|| {
        IpamError::Protocol(format!("Unknown response status: 0x{:02x}", status_byte))
    })?;

    let payload = if payload.is_empty() {
        None
    } else {
        Some(payload.to_vec())
    };

    Ok(Response { status, payload })
}

// =============================================================================
// LIST payload
// =============================================================================

/// Encode directory child names
pub fn encode_names(names: &[String]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(4 + names.iter().map(|n| 4 + n.len()).sum::<usize>());
    buf.put_u32(names.len() as u32);
    for name in names {
        put_string(&mut buf, name);
    }
    buf.to_vec()
}

/// Decode directory child names
pub fn decode_names(bytes: &[u8]) -> Result<Vec<String>> {
    let mut buf = bytes;
    if buf.remaining() < 4 {
        return Err(IpamError::Protocol("LIST reply: missing name count".to_string()));
    }

    let count = buf.get_u32() as usize;
    let mut names = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        names.push(get_string(&mut buf, "LIST reply")?);
    }

    if buf.has_remaining() {
        return Err(IpamError::Protocol(format!(
            "LIST reply: {} unexpected trailing bytes",
            buf.remaining()
        )));
    }
    Ok(names)
}

// =============================================================================
// Framing helpers
// =============================================================================

fn frame(kind: u8, payload: &[u8]) -> Vec<u8> {
    let mut message = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    message.put_u8(kind);
    message.put_u32(payload.len() as u32);
    message.put_slice(payload);
    message.to_vec()
}

fn unframe<'a>(bytes: &'a [u8], what: &str) -> Result<(u8, &'a [u8])> {
    if bytes.len() < HEADER_SIZE {
        return Err(IpamError::Protocol(format!(
            "Incomplete {} header: expected {} bytes, got {}",
            what,
            HEADER_SIZE,
            bytes.len()
        )));
    }

    let kind = bytes[0];
    let payload_len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);

    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(IpamError::Protocol(format!(
            "{} payload too large: {} bytes (max {})",
            what, payload_len, MAX_PAYLOAD_SIZE
        )));
    }

    let total_len = HEADER_SIZE + payload_len as usize;
    if bytes.len() < total_len {
        return Err(IpamError::Protocol(format!(
            "Incomplete {} payload: expected {} bytes, got {}",
            what,
            total_len,
            bytes.len()
        )));
    }

    Ok((kind, &bytes[HEADER_SIZE..total_len]))
}

fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

fn get_string(buf: &mut &[u8], what: &str) -> Result<String> {
    if buf.remaining() < 4 {
        return Err(IpamError::Protocol(format!("{}: missing key length", what)));
    }

    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(IpamError::Protocol(format!(
            "{}: incomplete key (expected {}, got {})",
            what,
            len,
            buf.remaining()
        )));
    }

    let bytes = buf[..len].to_vec();
    buf.advance(len);
    String::from_utf8(bytes).map_err(|_| IpamError::Protocol(format!("{}: key is not UTF-8", what)))
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read one frame (header + payload) from a stream
fn read_frame<R: Read>(reader: &mut R, what: &str) -> Result<Vec<u8>> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let payload_len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(IpamError::Protocol(format!(
            "{} payload too large: {} bytes (max {})",
            what, payload_len, MAX_PAYLOAD_SIZE
        )));
    }

    let mut message = vec![0u8; HEADER_SIZE + payload_len as usize];
    message[..HEADER_SIZE].copy_from_slice(&header);
    reader.read_exact(&mut message[HEADER_SIZE..])?;
    Ok(message)
}

/// Read a complete command from a stream
///
/// Blocks until a complete command is received or an error occurs
pub fn read_command<R: Read>(reader: &mut R) -> Result<Command> {
    let message = read_frame(reader, "command")?;
    decode_command(&message)
}

/// Write a command to a stream
pub fn write_command<W: Write>(writer: &mut W, command: &Command) -> Result<()> {
    writer.write_all(&encode_command(command))?;
    writer.flush()?;
    Ok(())
}

/// Read a complete response from a stream
pub fn read_response<R: Read>(reader: &mut R) -> Result<Response> {
    let message = read_frame(reader, "response")?;
    decode_response(&message)
}

/// Write a response to a stream
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    writer.write_all(&encode_response(response))?;
    writer.flush()?;
    Ok(())
}

/// Whether `e` means the peer closed the connection
pub fn hung_up(e: &io::Error) -> bool {
    use io::ErrorKind::*;
    matches!(e.kind(), UnexpectedEof | ConnectionReset | ConnectionAborted | BrokenPipe)
}

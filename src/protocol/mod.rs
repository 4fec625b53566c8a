//! Protocol Module
//!
//! Defines the wire protocol between the store server and its clients.
//!
//! ## Protocol Format (V1 - Simple Binary)
//!
//! ### Request Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Cmd (1)  │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Commands
//! - 0x01: GET    - Payload: key
//! - 0x02: CREATE - Payload: key_len (4) + key + value
//! - 0x03: DEL    - Payload: key
//! - 0x04: PING   - Payload: empty
//! - 0x05: MKDIR  - Payload: key
//! - 0x06: LIST   - Payload: key
//! - 0x07: RMDIR  - Payload: key (fails with CONFLICT if non-empty)
//! - 0x08: RMTREE - Payload: key
//!
//! ### Response Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │Status(1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Status Codes
//! - 0x00: OK
//! - 0x01: NOT_FOUND
//! - 0x02: ERROR
//! - 0x03: CONFLICT

mod command;
mod response;
mod codec;

pub use command::{Command, CommandType};
pub use response::{Response, Status};
pub use codec::{
    encode_command, decode_command, encode_response, decode_response,
    encode_names, decode_names,
    read_command, write_command, read_response, write_response, hung_up,
    HEADER_SIZE, MAX_PAYLOAD_SIZE,
};

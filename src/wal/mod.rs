//! Write-Ahead Log
//!
//! Every accepted store mutation is appended here before it touches the
//! in-memory tree. On open, the engine replays the log and then rewrites it
//! from the live state, so the file only ever holds one snapshot plus the
//! mutations since.
//!
//! ## Entry Layout
//! ```text
//! LSN (8, BE) | CRC32 (4, BE) | Len (4, BE) | bincode(WalEntry)
//! ```
//!
//! The CRC covers the LSN bytes and the body. Recovery stops at the first
//! torn or corrupted entry and truncates the file there.

mod entry;
mod reader;
mod recovery;
mod writer;

pub use entry::{Operation, WalEntry, HEADER_SIZE};
pub use reader::{WalIterator, WalReader};
pub use recovery::{RecoveryResult, WalRecovery};
pub use writer::WalWriter;

//! Command definitions
//!
//! Represents store commands from clients.

/// Command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandType {
    Get = 0x01,
    Create = 0x02,
    Delete = 0x03,
    Ping = 0x04,
    Mkdir = 0x05,
    List = 0x06,
    DeleteIfEmpty = 0x07,
    DeleteTree = 0x08,
}

impl CommandType {
    /// Parse a wire byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(CommandType::Get),
            0x02 => Some(CommandType::Create),
            0x03 => Some(CommandType::Delete),
            0x04 => Some(CommandType::Ping),
            0x05 => Some(CommandType::Mkdir),
            0x06 => Some(CommandType::List),
            0x07 => Some(CommandType::DeleteIfEmpty),
            0x08 => Some(CommandType::DeleteTree),
            _ => None,
        }
    }
}

/// A parsed command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Get a value by key
    Get { key: String },

    /// Create a value if the key is absent
    Create { key: String, value: Vec<u8> },

    /// Delete a value
    Delete { key: String },

    /// Ping (health check)
    Ping,

    /// Create a directory
    Mkdir { key: String },

    /// List a directory's children
    List { key: String },

    /// Delete a directory if it has no children
    DeleteIfEmpty { key: String },

    /// Delete a directory recursively
    DeleteTree { key: String },
}

impl Command {
    /// Get the command type
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Get { .. } => CommandType::Get,
            Command::Create { .. } => CommandType::Create,
            Command::Delete { .. } => CommandType::Delete,
            Command::Ping => CommandType::Ping,
            Command::Mkdir { .. } => CommandType::Mkdir,
            Command::List { .. } => CommandType::List,
            Command::DeleteIfEmpty { .. } => CommandType::DeleteIfEmpty,
            Command::DeleteTree { .. } => CommandType::DeleteTree,
        }
    }

    /// Target key, if the command has one
    pub fn key(&self) -> Option<&str> {
        match self {
            Command::Get { key }
            | Command::Create { key, .. }
            | Command::Delete { key }
            | Command::Mkdir { key }
            | Command::List { key }
            | Command::DeleteIfEmpty { key }
            | Command::DeleteTree { key } => Some(key),
            Command::Ping => None,
        }
    }
}

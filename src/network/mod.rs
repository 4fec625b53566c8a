//! Network Module
//!
//! TCP server for the store engine.
//!
//! ## Architecture
//! - Single acceptor thread (non-blocking, polls the shutdown flag)
//! - Worker thread pool fed through a bounded channel
//! - Commands routed through Engine

mod server;
mod connection;

pub use server::Server;
pub use connection::Connection;

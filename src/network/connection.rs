//! Per-client session
//!
//! One session serves one TCP client: frames are read, executed against the
//! engine in order, and answered on the same stream.

use std::io::{self, BufReader, BufWriter};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::Engine;
use crate::error::{IpamError, Result};
use crate::protocol::{hung_up, read_command, write_response, Command, Response};

/// A served client connection
pub struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    engine: Arc<Engine>,
    peer: String,
}

impl Connection {
    pub fn new(stream: TcpStream, engine: Arc<Engine>) -> Result<Self> {
        let peer = match stream.peer_addr() {
            Ok(addr) => addr.to_string(),
            Err(_) => String::from("unknown"),
        };
        stream.set_nodelay(true)?;

        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
            engine,
            peer,
        })
    }

    /// Apply socket timeouts in milliseconds; 0 leaves the socket blocking
    pub fn set_timeouts(&mut self, read_ms: u64, write_ms: u64) -> Result<()> {
        let as_timeout = |ms: u64| (ms > 0).then(|| Duration::from_millis(ms));
        self.reader.get_ref().set_read_timeout(as_timeout(read_ms))?;
        self.writer.get_ref().set_write_timeout(as_timeout(write_ms))?;
        Ok(())
    }

    /// Serve requests until the client goes away
    ///
    /// A client hanging up (or idling past the read timeout) ends the session
    /// cleanly; malformed frames get an ERROR reply and end it with an error.
    pub fn handle(&mut self) -> Result<()> {
        tracing::debug!(peer = %self.peer, "session started");

        while let Some(command) = self.next_command()? {
            tracing::trace!(peer = %self.peer, ?command, "request");
            let response = Response::from_result(self.engine.execute(command));

            match write_response(&mut self.writer, &response) {
                Ok(()) => {}
                Err(IpamError::Io(ref e)) if hung_up(e) => {
                    tracing::debug!(peer = %self.peer, "client left before reply");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(peer = %self.peer, error = %e, "reply failed");
                    return Err(e);
                }
            }
        }

        tracing::debug!(peer = %self.peer, "session closed");
        Ok(())
    }

    /// Next request, `None` once the client is gone
    fn next_command(&mut self) -> Result<Option<Command>> {
        match read_command(&mut self.reader) {
            Ok(command) => Ok(Some(command)),
            Err(IpamError::Io(ref e)) if hung_up(e) || timed_out(e) => Ok(None),
            Err(e) => {
                tracing::warn!(peer = %self.peer, error = %e, "bad request");
                let _ = write_response(&mut self.writer, &Response::error(&e.to_string()));
                Err(e)
            }
        }
    }
}

// Windows reports TimedOut where Unix reports WouldBlock
fn timed_out(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

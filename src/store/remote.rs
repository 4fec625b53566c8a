//! Remote store client
//!
//! Speaks the store protocol to an `ipamkv-server`. One connection is kept
//! open and shared behind a mutex; requests on it are strictly sequential.
//! The server closes connections that sit idle, so a request on a kept
//! connection that is closed before any response arrives is sent once more
//! on a fresh one.

use std::io::{self, BufRead, BufReader, BufWriter};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use parking_lot::Mutex;

use super::Store;
use crate::config::Config;
use crate::error::{IpamError, Result};
use crate::protocol::{decode_names, hung_up, read_response, write_command, Command, Response, Status};

/// How a round trip failed
enum Exchange {
    /// The server closed the connection before answering
    Unanswered(io::Error),
    Failed(IpamError),
}

struct Link {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

/// Store client over TCP
pub struct RemoteStore {
    addr: String,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    link: Mutex<Option<Link>>,
}

impl RemoteStore {
    /// Create a client; the connection is opened lazily
    pub fn new(addr: impl Into<String>, read_timeout_ms: u64, write_timeout_ms: u64) -> Self {
        let timeout = |ms: u64| (ms > 0).then(|| Duration::from_millis(ms));
        Self {
            addr: addr.into(),
            read_timeout: timeout(read_timeout_ms),
            write_timeout: timeout(write_timeout_ms),
            link: Mutex::new(None),
        }
    }

    /// Create a client from IPAM config and check the server answers
    pub fn connect(config: &Config) -> Result<Self> {
        let store = Self::new(&config.store_addr, config.read_timeout_ms, config.write_timeout_ms);
        store.ping()?;
        Ok(store)
    }

    /// Server address
    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn open(&self) -> Result<Link> {
        let addr = self
            .addr
            .to_socket_addrs()
            .map_err(|e| IpamError::Network(format!("resolve {}: {}", self.addr, e)))?
            .next()
            .ok_or_else(|| IpamError::Network(format!("resolve {}: no addresses", self.addr)))?;

        let stream = match self.write_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        }
        .map_err(|e| IpamError::Network(format!("connect {}: {}", self.addr, e)))?;

        stream.set_nodelay(true)?;
        stream.set_read_timeout(self.read_timeout)?;
        stream.set_write_timeout(self.write_timeout)?;

        tracing::debug!(addr = %self.addr, "connected to store");

        Ok(Link {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
        })
    }

    /// Send one command and wait for its response
    ///
    /// Transport failures drop the connection and are reported as
    /// `Network` errors; the next call reconnects.
    fn call(&self, command: &Command) -> Result<Response> {
        let mut guard = self.link.lock();

        let mut fresh = false;
        loop {
            let link = match guard.take() {
                Some(link) => link,
                None => {
                    fresh = true;
                    self.open()?
                }
            };
            let link = guard.insert(link);

            match Self::exchange(link, command) {
                Ok(response) => {
                    tracing::trace!(?command, status = ?response.status, "store call");
                    return Ok(response);
                }
                Err(Exchange::Unanswered(e)) if !fresh => {
                    *guard = None;
                    tracing::debug!(addr = %self.addr, error = %e, "store connection closed, resending");
                }
                Err(Exchange::Unanswered(e)) | Err(Exchange::Failed(IpamError::Io(e))) => {
                    *guard = None;
                    return Err(IpamError::Network(format!("{}: {}", self.addr, e)));
                }
                Err(Exchange::Failed(e)) => {
                    *guard = None;
                    return Err(e);
                }
            }
        }
    }

    /// One request/response round trip on `link`
    fn exchange(link: &mut Link, command: &Command) -> std::result::Result<Response, Exchange> {
        match write_command(&mut link.writer, command) {
            Ok(()) => {}
            Err(IpamError::Io(e)) if hung_up(&e) => return Err(Exchange::Unanswered(e)),
            Err(e) => return Err(Exchange::Failed(e)),
        }

        match link.reader.fill_buf() {
            Ok([]) => {
                return Err(Exchange::Unanswered(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by server",
                )))
            }
            Ok(_) => {}
            Err(e) if hung_up(&e) => return Err(Exchange::Unanswered(e)),
            Err(e) => return Err(Exchange::Failed(e.into())),
        }

        read_response(&mut link.reader).map_err(Exchange::Failed)
    }

    /// Call and require an OK status, mapping the others onto errors
    fn call_ok(&self, command: Command) -> Result<Option<Vec<u8>>> {
        let response = self.call(&command)?;
        match response.status {
            Status::Ok => Ok(response.payload),
            Status::NotFound => Err(IpamError::KeyNotFound),
            Status::Conflict => Err(IpamError::Conflict(response.text())),
            Status::Error => Err(IpamError::Store(response.text())),
        }
    }
}

impl Store for RemoteStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.call_ok(Command::Get { key: key.to_string() }) {
            Ok(payload) => Ok(Some(payload.unwrap_or_default())),
            Err(IpamError::KeyNotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn create(&self, key: &str, value: &[u8]) -> Result<()> {
        self.call_ok(Command::Create {
            key: key.to_string(),
            value: value.to_vec(),
        })
        .map(|_| ())
    }

    fn mkdir(&self, key: &str) -> Result<()> {
        self.call_ok(Command::Mkdir { key: key.to_string() }).map(|_| ())
    }

    fn list(&self, key: &str) -> Result<Vec<String>> {
        let payload = self.call_ok(Command::List { key: key.to_string() })?;
        decode_names(payload.as_deref().unwrap_or(&[]))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.call_ok(Command::Delete { key: key.to_string() }).map(|_| ())
    }

    fn delete_if_empty(&self, key: &str) -> Result<()> {
        self.call_ok(Command::DeleteIfEmpty { key: key.to_string() }).map(|_| ())
    }

    fn delete_tree(&self, key: &str) -> Result<()> {
        self.call_ok(Command::DeleteTree { key: key.to_string() }).map(|_| ())
    }

    fn ping(&self) -> Result<()> {
        self.call_ok(Command::Ping).map(|_| ())
    }
}

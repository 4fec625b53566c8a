//! TCP Server
//!
//! Accepts connections and dispatches to worker threads.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender, TrySendError};

use crate::config::ServerConfig;
use crate::engine::Engine;
use crate::error::Result;
use crate::network::Connection;

/// How long the acceptor sleeps when no connection is pending
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// TCP server for the store engine
pub struct Server {
    config: ServerConfig,
    engine: Arc<Engine>,
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    /// Bind the listener for the given config and engine
    pub fn bind(config: ServerConfig, engine: Arc<Engine>) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr)?;
        listener.set_nonblocking(true)?;

        Ok(Self {
            config,
            engine,
            listener,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Flag that stops the accept loop when set
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Signal the server to shutdown gracefully
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Start the server (blocking until shutdown)
    ///
    /// Connections already handed to a worker are served to completion.
    pub fn run(&self) -> Result<()> {
        tracing::info!(
            addr = %self.local_addr()?,
            workers = self.config.workers,
            "store server listening"
        );

        let (tx, rx) = channel::bounded::<TcpStream>(self.config.max_connections.max(1));
        let workers = self.spawn_workers(&rx)?;
        drop(rx);

        let result = self.accept_loop(&tx);

        drop(tx);
        for worker in workers {
            let _ = worker.join();
        }

        tracing::info!("store server stopped");
        result
    }

    fn accept_loop(&self, tx: &Sender<TcpStream>) -> Result<()> {
        while !self.shutdown.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    match tx.try_send(stream) {
                        Ok(()) => tracing::trace!(%peer, "connection queued"),
                        Err(TrySendError::Full(_)) => {
                            tracing::warn!(%peer, "connection queue full, dropping client");
                        }
                        Err(TrySendError::Disconnected(_)) => break,
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::error!("accept failed: {}", e);
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    fn spawn_workers(&self, rx: &Receiver<TcpStream>) -> Result<Vec<JoinHandle<()>>> {
        (0..self.config.workers.max(1))
            .map(|id| {
                let rx = rx.clone();
                let engine = Arc::clone(&self.engine);
                let (read_ms, write_ms) = (self.config.read_timeout_ms, self.config.write_timeout_ms);

                thread::Builder::new()
                    .name(format!("ipamkv-worker-{}", id))
                    .spawn(move || {
                        for stream in rx.iter() {
                            let served = Connection::new(stream, Arc::clone(&engine)).and_then(|mut conn| {
                                conn.set_timeouts(read_ms, write_ms)?;
                                conn.handle()
                            });
                            if let Err(e) = served {
                                tracing::debug!(worker = id, "connection ended with error: {}", e);
                            }
                        }
                    })
                    .map_err(Into::into)
            })
            .collect()
    }
}

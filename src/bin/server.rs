//! ipamkv Store Server Binary
//!
//! Serves the durable store the IPAM engine coordinates through.

use std::sync::Arc;

use clap::Parser;
use ipamkv::network::Server;
use ipamkv::{Engine, ServerConfig};
use tracing_subscriber::{fmt, EnvFilter};

/// ipamkv store server
#[derive(Parser, Debug)]
#[command(name = "ipamkv-server")]
#[command(about = "Consistent key-value store backing ipamkv")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./ipamkv_data")]
    data_dir: String,

    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:2379")]
    listen: String,

    /// Worker threads
    #[arg(short, long, default_value = "16")]
    workers: usize,

    /// Maximum connections waiting for a worker
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Rewrite the WAL after this many entries
    #[arg(short, long, default_value = "10000")]
    compact_after: u64,

    /// Close connections idle for this long (milliseconds, 0 = never)
    #[arg(short, long, default_value = "2000")]
    idle_timeout_ms: u64,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ipamkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("ipamkv server v{}", ipamkv::VERSION);
    tracing::info!("Data directory: {}", args.data_dir);
    tracing::info!("Listen address: {}", args.listen);

    let config = ServerConfig::builder()
        .data_dir(&args.data_dir)
        .listen_addr(&args.listen)
        .workers(args.workers)
        .max_connections(args.max_connections)
        .compaction_threshold(args.compact_after)
        .read_timeout_ms(args.idle_timeout_ms)
        .build();

    let engine = match Engine::open(config.clone()) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!(keys = engine.key_count(), "Engine initialized");

    let server = match Server::bind(config, Arc::clone(&engine)) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", args.listen, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}

//! ipamkv CLI Client
//!
//! Admin and reconciliation commands against a running store server. IPAM
//! parameters come from the `IPAM_*` environment variables.

use std::net::Ipv4Addr;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use ipamkv::{
    Address, AddressRequest, Config, Ipam, IpamError, Pool, PoolRelease, PoolRequest, RemoteStore, Result, Store,
};
use serde_json::{json, Value};
use tracing_subscriber::{fmt, EnvFilter};

/// ipamkv CLI
#[derive(Parser, Debug)]
#[command(name = "ipamkv-cli")]
#[command(about = "Manage ipamkv pools and addresses")]
#[command(version)]
struct Args {
    /// Store server address (overrides IPAM_STORE)
    #[arg(short, long)]
    store: Option<String>,

    /// Node identity (overrides IPAM_NODE)
    #[arg(short, long)]
    node: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ping the store server
    Ping,

    /// Reserve a pool for a network
    RequestPool {
        /// Network id
        network: String,

        /// Explicit subnet (a.b.c.d/n)
        #[arg(long)]
        subnet: Option<String>,

        /// Sub-range of the subnet to allocate addresses from
        #[arg(long)]
        iprange: Option<String>,
    },

    /// Drop this node's use of a pool
    ReleasePool {
        pool: String,
    },

    /// Reserve an address in a pool
    RequestAddress {
        pool: String,

        /// Explicit address
        #[arg(long)]
        address: Option<String>,
    },

    /// Release an address
    ReleaseAddress {
        pool: String,
        address: String,
    },

    /// List all pools
    ListPools,

    /// List reserved addresses of a pool
    ListAddresses {
        pool: String,
    },

    /// Release addresses of a pool that are not in the given active set
    Cleanup {
        #[arg(long)]
        pool: String,

        /// Addresses still in use
        addresses: Vec<Ipv4Addr>,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", error_json(&e));
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<Value> {
    let mut config = Config::from_env()?;
    if let Some(store) = args.store {
        config.store_addr = store;
    }
    if let Some(node) = args.node {
        config.node_id = node;
    }

    let store = Arc::new(RemoteStore::connect(&config)?);
    let ipam = Ipam::from_config(store.clone(), &config)?;
    let ks = ipam.keyspace();

    let output = match args.command {
        Commands::Ping => {
            store.ping()?;
            json!({ "store": store.addr(), "status": "ok" })
        }
        Commands::RequestPool { network, subnet, iprange } => {
            let request = PoolRequest {
                network,
                subnet,
                iprange,
                ipv6: None,
            };
            pool_json(&ipam.request_pool(&request)?)
        }
        Commands::ReleasePool { pool } => {
            let outcome = match ipam.release_pool(&pool)? {
                PoolRelease::Deleted => "deleted",
                PoolRelease::Retained => "retained",
                PoolRelease::Absent => "absent",
            };
            json!({ "pool_id": pool, "release": outcome })
        }
        Commands::RequestAddress { pool, address } => {
            let request = AddressRequest { pool_id: pool, address };
            address_json(&ipam.request_address(&request)?)
        }
        Commands::ReleaseAddress { pool, address } => {
            ipam.release_address(&pool, &address)?;
            json!({ "pool_id": pool, "address": address })
        }
        Commands::ListPools => Value::Array(Pool::list(ks)?.iter().map(pool_json).collect()),
        Commands::ListAddresses { pool } => {
            let addresses = Address::list(ks, &pool)?;
            json!({ "pool_id": pool, "addresses": addresses })
        }
        Commands::Cleanup { pool, addresses } => {
            let released = ipam.cleanup_addresses(&pool, &addresses)?;
            json!({ "pool_id": pool, "active": addresses, "released": released })
        }
    };

    Ok(output)
}

fn pool_json(pool: &Pool) -> Value {
    json!({
        "pool_id": pool.id,
        "subnet": pool.subnet,
        "iprange": pool.iprange,
        "gateway": pool.gateway,
    })
}

fn address_json(address: &Address) -> Value {
    json!({
        "pool_id": address.pool_id,
        "address": address.cidr(),
    })
}

fn error_json(error: &IpamError) -> Value {
    match error.request() {
        Some(e) => json!({
            "error": { "field": e.field.as_str(), "kind": e.kind.as_str(), "message": e.message }
        }),
        None => json!({ "error": { "message": error.to_string() } }),
    }
}

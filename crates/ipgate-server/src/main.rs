//! ipgate-server: IP-whitelisting TCP gateway daemon.
//!
//! Relays configured outbound ports to private upstream services,
//! admitting only connections whose source IPv4 address is whitelisted,
//! and serves the fixed-port control protocol for adding whitelist
//! entries at runtime.

mod config;
mod control;
mod relay;
mod store;

use clap::Parser;
use config::GatewayConfig;
use control::ControlServer;
use relay::Relay;
use std::path::PathBuf;
use std::sync::Arc;
use store::IpStore;
use tracing::{error, info, warn};

/// ipgate-server — IP-whitelisting TCP gateway
#[derive(Parser, Debug)]
#[command(name = "ipgate-server", version, about = "IP-whitelisting TCP gateway")]
struct Cli {
    /// Gateway config file (routes, permanent whitelist, expiration clause)
    config: PathBuf,

    /// Control-plane listen port
    #[arg(long, default_value_t = 60102)]
    control_port: u16,

    /// Whitelist database file
    #[arg(long, default_value = "/var/gateway-ipdb")]
    database: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        control_port = cli.control_port,
        "starting ipgate-server"
    );

    let cfg = match GatewayConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            error!(path = %cli.config.display(), error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let store = match IpStore::open(&cli.database) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(path = %cli.database.display(), error = %e, "failed to open whitelist database");
            std::process::exit(1);
        }
    };

    // Seed the permanent whitelist before the forced-expiration override is
    // armed; config-file entries are exempt from it.
    for ip in &cfg.whitelist {
        info!(ip = %ip, "whitelisting address permanently");
        if let Err(e) = store.add(*ip, None) {
            warn!(ip = %ip, error = %e, "seed entry not persisted");
        }
    }
    if let Some(seconds) = cfg.forced_expiration {
        store.set_forced_expiration(seconds);
        info!(seconds, "forced expiration enabled");
    }

    for route in &cfg.routes {
        let relay = Relay::new(*route, Arc::clone(&store));
        match relay.bind().await {
            Ok(listener) => {
                tokio::spawn(relay.run(listener));
            }
            Err(e) => {
                error!(
                    outbound_port = route.outbound_port,
                    error = %e,
                    "relay bind failed"
                );
                std::process::exit(1);
            }
        }
    }

    let control = ControlServer::new(cli.control_port, Arc::clone(&store));
    match control.bind().await {
        Ok(listener) => control.run(listener).await,
        Err(e) => {
            error!(port = cli.control_port, error = %e, "control bind failed");
            std::process::exit(1);
        }
    }
}

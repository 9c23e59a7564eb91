// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Registry Server
//!
//! Standalone service registry: instances register and heartbeat on one
//! port, subscribers stream registry changes matching their interest on
//! another.
//!
//! # Usage
//!
//! ```bash
//! # Start server on default ports (7410 registration, 7411 discovery)
//! registry-server
//!
//! # Custom ports and lease
//! registry-server --registration-port 8410 --discovery-port 8411 --lease-duration 30
//!
//! # Load everything from a config file
//! registry-server --config registry.json
//! ```

use clap::Parser;
use registry_server::{RegistryServer, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Registry Server - instance registration and interest-based change streams
#[derive(Parser, Debug)]
#[command(name = "registry-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port for registration channels
    #[arg(long, default_value = "7410")]
    registration_port: u16,

    /// TCP port for interest (discovery) channels
    #[arg(long, default_value = "7411")]
    discovery_port: u16,

    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Instance lease duration in seconds
    #[arg(long, default_value = "90")]
    lease_duration: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Load or create config
    let config = if let Some(config_path) = args.config {
        info!("Loading config from {:?}", config_path);
        ServerConfig::from_file(&config_path)?
    } else {
        ServerConfig {
            bind_address: args.bind.parse()?,
            registration_port: args.registration_port,
            discovery_port: args.discovery_port,
            lease_duration_secs: args.lease_duration,
            ..Default::default()
        }
    };

    let registration = SocketAddr::new(config.bind_address, config.registration_port);
    let discovery = SocketAddr::new(config.bind_address, config.discovery_port);

    info!("+----------------------------------------------------+");
    info!(
        "|       Registry Server v{}                       |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  Register: {:38} |", registration);
    info!("|  Discover: {:38} |", discovery);
    info!(
        "|  Lease:    {:38} |",
        format!("{}s", config.lease_duration_secs)
    );
    info!(
        "|  Sweep:    {:38} |",
        format!("every {}s", config.eviction_interval_secs)
    );
    info!("+----------------------------------------------------+");

    // Create and run server
    let server = RegistryServer::new(config)?;

    // Handle shutdown signals
    let server_handle = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received, stopping server...");
        server_handle.shutdown();
    });

    server.run().await?;

    info!("Registry server stopped");
    Ok(())
}

//! BlueNet daemon binary
//!
//! Loads configuration, starts the UDP adapter and the mesh runtime, and
//! leaves the mesh cleanly on Ctrl+C.

use bluenet::mesh::Mesh;
use bluenet::socket::MemoryMessageStore;
use bluenet::transport::udp::UdpAdapter;
use bluenet::transport::{outbound_channel, packet_channel};
use bluenet::{Config, UdpConfig};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// BlueNet mesh daemon
#[derive(Parser, Debug)]
#[command(name = "bluenet", version, about)]
struct Args {
    /// Path to configuration file (overrides default search paths)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Initialize logging
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let args = Args::parse();

    info!("BlueNet starting");

    // Load configuration
    let (config, loaded_paths) = if let Some(config_path) = &args.config {
        // Explicit config file specified - load only that file
        match Config::load_file(config_path) {
            Ok(config) => (config, vec![config_path.clone()]),
            Err(e) => {
                error!("Failed to load configuration from {}: {}", config_path.display(), e);
                std::process::exit(1);
            }
        }
    } else {
        // Use default search paths
        match Config::load() {
            Ok(result) => result,
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        }
    };

    if loaded_paths.is_empty() {
        info!("No config files found, using defaults");
    } else {
        for path in &loaded_paths {
            info!(path = %path.display(), "Loaded config file");
        }
    }

    // Log identity status
    if !config.has_address() {
        warn!("No device address configured, generating a random one");
    }
    // Create local node identity
    let local = match config.create_node() {
        Ok(node) => node,
        Err(e) => {
            error!("Invalid identity: {}", e);
            std::process::exit(1);
        }
    };

    // Log node information
    info!("  address: {}", local.addr());
    info!("  name: {}", local.name());

    // Wire the adapter and the mesh together
    let buffers = config.node.buffers.clone();
    let (packet_tx, packet_rx) = packet_channel(buffers.packet_channel.max(1));
    let (outbound_tx, outbound_rx) = outbound_channel(buffers.outbound_channel.max(1));

    let udp_config = match &config.transports.udp {
        Some(udp) => udp.clone(),
        None => {
            info!("No UDP adapter configured, using defaults");
            UdpConfig::default()
        }
    };

    // Start the UDP adapter (spawns receive and writer loops)
    let mut adapter = UdpAdapter::new(udp_config, packet_tx, outbound_rx);
    if let Err(e) = adapter.start_async().await {
        error!("Failed to start UDP adapter: {}", e);
        std::process::exit(1);
    }
    if let Some(addr) = adapter.local_transport_addr() {
        info!(local_addr = %addr, mtu = adapter.mtu(), "UDP adapter up");
    }

    // Start the mesh worker (seeds configured peers)
    let mut mesh = Mesh::new(config, local, Box::new(MemoryMessageStore::new()));
    let handle = match mesh.start(packet_rx, outbound_tx) {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to start mesh: {}", e);
            std::process::exit(1);
        }
    };

    info!("BlueNet running, press Ctrl+C to exit");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    info!("BlueNet shutting down");

    // Leave the mesh, then stop the worker and the adapter
    match handle.quit().await {
        Ok(count) => info!(neighbors = count, "Sent quit to neighbors"),
        Err(e) => info!("Not leaving mesh: {}", e),
    }
    // Give the writer a moment to flush the quit frames.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    if let Err(e) = mesh.stop().await {
        warn!("Error stopping mesh: {}", e);
    }
    if let Err(e) = adapter.stop_async().await {
        warn!("Error stopping UDP adapter: {}", e);
    }

    info!("BlueNet shutdown complete");
}

//! Interchain Messaging Relayer Service
//!
//! Runs the chains described in the configuration and relays every message
//! sent between them.
//!
//! ## Overview
//!
//! The service:
//! 1. Builds the network (chains, validator sets, signature gateway)
//! 2. Watches each messenger for send events
//! 3. Aggregates validator signatures and delivers to the destination chain
//!
//! ## Security Requirements
//!
//! **CRITICAL**: The operator key is read from the environment variable named
//! in the config file and must never be logged.

use anyhow::Result;
use tracing::info;

use icm_gmp::config::{Config, CONFIG_PATH_ENV};
use icm_gmp::network::Network;
use icm_gmp::relayer::{Relayer, RelayerConfig};

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

/// Main application entry point that initializes and runs the relayer.
///
/// This function:
/// 1. Initializes logging and tracing
/// 2. Loads configuration from TOML file (or the built-in dev network)
/// 3. Builds the network and the relayer
/// 4. Runs the relay loop until shutdown
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    info!("Starting Interchain Messaging Relayer");

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("Interchain Messaging Relayer");
        println!();
        println!("Usage: icm-gmp [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --dev, -d         Use the built-in two-chain dev network");
        println!("  --config <path>   Use custom config file path");
        println!("  --help, -h        Show this help message");
        println!();
        println!("Environment variables:");
        println!("  ICM_GMP_CONFIG_PATH        Path to config file (overridden by --config)");
        println!("  ICM_GMP__<SECTION>__<KEY>  Override a single config value");
        return Ok(());
    }

    let mut config_path = None;
    let mut i = 1; // Skip program name
    while i < args.len() {
        if args[i] == "--config" && i + 1 < args.len() {
            config_path = Some(args[i + 1].clone());
            i += 1;
        }
        i += 1;
    }

    let config = if let Some(path) = config_path {
        info!("Using custom config: {}", path);
        Config::load_from(&path)?
    } else if args.iter().any(|arg| arg == "--dev" || arg == "-d") {
        info!("Using built-in dev network");
        let config = Config::local_dev();
        config.validate()?;
        config
    } else {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            info!("Using config from {}: {}", CONFIG_PATH_ENV, path);
        }
        Config::load()?
    };
    info!("Configuration loaded successfully");

    let network = Network::from_config(&config)?;
    let relayer_config = RelayerConfig::from_config(&config)?;
    let relayer = Relayer::new(relayer_config, network);

    info!("Relayer initialized successfully");

    // Run the relayer (this blocks until shutdown)
    relayer.run().await
}

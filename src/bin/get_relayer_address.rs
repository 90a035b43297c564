//! Get Relayer Address
//!
//! Reads the icm-gmp configuration and the operator key from the environment
//! and prints the relayer's EVM-style address (`keccak256(pubkey)[12..]`).
//! Message senders list this address in `allowed_relayers`.

use anyhow::Result;
use icm_gmp::config::Config;
use icm_gmp::relayer::RelayerConfig;

fn main() -> Result<()> {
    let config = Config::load()?;
    let relayer = RelayerConfig::from_config(&config)?;

    println!("{}", relayer.relayer_address);

    Ok(())
}

//! Ed25519 Key Generation Utility
//!
//! Generates a fresh key for the relayer operator or a validator.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin generate_keys
//! ```
//!
//! The private key goes into the environment variable named by
//! `relayer.private_key_env` (or a chain's `validator_key_envs`) in
//! `config/icm-gmp.toml`. The relayer's on-chain address is printed too.

use base64::{engine::general_purpose, Engine as _};
use icm_gmp::crypto::{generate_signing_key, RelayerIdentity};

fn main() -> anyhow::Result<()> {
    let signing_key = generate_signing_key();
    let verifying_key = signing_key.verifying_key();

    let private_key_b64 = general_purpose::STANDARD.encode(signing_key.as_bytes());
    let public_key_b64 = general_purpose::STANDARD.encode(verifying_key.as_bytes());
    let relayer_address = RelayerIdentity::from_seed(signing_key.as_bytes())?.address()?;

    println!("Generated Ed25519 Key Pair:");
    println!("Private Key (base64): {}", private_key_b64);
    println!("Public Key (base64): {}", public_key_b64);
    println!("Relayer Address: {}", relayer_address);
    println!();
    println!("Export the private key in the variable named in config/icm-gmp.toml.");
    Ok(())
}

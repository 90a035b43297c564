//! Cryptographic Operations Module
//!
//! Key handling for the relayer service and deterministic address derivation
//! for simulated deployments.
//!
//! - Validators sign envelope digests with Ed25519.
//! - The relayer operator is identified on chain by an EVM-style address
//!   derived from a secp256k1 key (`keccak256(uncompressed_pubkey)[12..]`).
//! - Contract addresses come from an [`AddressAllocator`]: a pure function of
//!   `(deployer, ordinal)`, so the same deployment plan yields the same
//!   addresses on every chain and in every process.
//!
//! ## Security Requirements
//!
//! **CRITICAL**: Private keys are read from environment variables and must never
//! be logged. Dev validator keys are derived from public data and are only for
//! local networks.

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use ed25519_dalek::SigningKey;
use k256::ecdsa::SigningKey as EcdsaSigningKey;
use rand::Rng;
use sha2::Sha256;
use sha3::{Digest, Keccak256};

use crate::primitives::{Address, ChainId};

const DEV_VALIDATOR_DOMAIN: &[u8] = b"icm-gmp/dev-validator";
const MESSENGER_DEPLOYER_LABEL: &[u8] = b"icm-gmp/messenger-deployer";
const REGISTRY_DEPLOYER_LABEL: &[u8] = b"icm-gmp/registry-deployer";
const APP_DEPLOYER_LABEL: &[u8] = b"icm-gmp/app-deployer";

// ============================================================================
// ADDRESS DERIVATION
// ============================================================================

fn keccak_address(parts: &[&[u8]]) -> Address {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    let hash = hasher.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..32]);
    Address(out)
}

/// Deterministic contract address allocator.
///
/// `address_at(ordinal)` depends only on the deployer and the ordinal; there
/// is no hidden counter, so callers decide which ordinal each deployment uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressAllocator {
    deployer: Address,
}

impl AddressAllocator {
    pub fn new(deployer: Address) -> Self {
        Self { deployer }
    }

    pub fn deployer(&self) -> Address {
        self.deployer
    }

    pub fn address_at(&self, ordinal: u64) -> Address {
        keccak_address(&[self.deployer.as_bytes(), &ordinal.to_be_bytes()])
    }

    /// Deployer of messenger endpoints. Shared by every chain so that version
    /// `n` of the messenger lives at the same address everywhere.
    pub fn messenger() -> Self {
        Self::new(keccak_address(&[MESSENGER_DEPLOYER_LABEL]))
    }

    pub fn registry() -> Self {
        Self::new(keccak_address(&[REGISTRY_DEPLOYER_LABEL]))
    }

    /// Per-chain deployer for applications.
    pub fn applications(chain_id: &ChainId) -> Self {
        Self::new(keccak_address(&[APP_DEPLOYER_LABEL, chain_id.as_bytes()]))
    }
}

/// Address of messenger endpoint `version` on any chain.
pub fn messenger_address(version: u64) -> Address {
    AddressAllocator::messenger().address_at(version)
}

/// Address of the protocol registry on any chain.
pub fn registry_address() -> Address {
    AddressAllocator::registry().address_at(0)
}

// ============================================================================
// VALIDATOR KEYS
// ============================================================================

/// Deterministic Ed25519 key of validator `index` of a local dev chain.
pub fn dev_validator_key(chain_id: &ChainId, index: u32) -> SigningKey {
    let mut hasher = Sha256::new();
    hasher.update(DEV_VALIDATOR_DOMAIN);
    hasher.update(chain_id.as_bytes());
    hasher.update(index.to_be_bytes());
    let seed: [u8; 32] = hasher.finalize().into();
    SigningKey::from_bytes(&seed)
}

/// Decodes a base64 Ed25519 seed.
pub fn signing_key_from_base64(private_key_b64: &str) -> Result<SigningKey> {
    let bytes = general_purpose::STANDARD
        .decode(private_key_b64.trim())
        .context("Private key is not valid base64")?;
    let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        anyhow::anyhow!(
            "Invalid private key length: expected 32 bytes, got {}",
            bytes.len()
        )
    })?;
    Ok(SigningKey::from_bytes(&seed))
}

/// Fresh Ed25519 key from the OS RNG.
pub fn generate_signing_key() -> SigningKey {
    let mut rng = rand::rngs::OsRng;
    let mut secret_key_bytes = [0u8; 32];
    rng.fill(&mut secret_key_bytes);
    SigningKey::from_bytes(&secret_key_bytes)
}

// ============================================================================
// RELAYER IDENTITY
// ============================================================================

/// Relayer operator key. The secp256k1 key is derived from the same 32-byte
/// seed as the operator's Ed25519 key.
pub struct RelayerIdentity {
    ecdsa_signing_key: EcdsaSigningKey,
}

impl RelayerIdentity {
    pub fn from_seed(seed: &[u8; 32]) -> Result<Self> {
        let ecdsa_signing_key = EcdsaSigningKey::from_bytes(&(*seed).into())
            .map_err(|e| anyhow::anyhow!("Failed to create ECDSA signing key: {}", e))?;
        Ok(Self { ecdsa_signing_key })
    }

    pub fn from_base64(private_key_b64: &str) -> Result<Self> {
        let signing_key = signing_key_from_base64(private_key_b64)?;
        Self::from_seed(signing_key.as_bytes())
    }

    /// EVM-style address: `keccak256(uncompressed_public_key[1..])[12..32]`.
    pub fn address(&self) -> Result<Address> {
        let public_key_point = self.ecdsa_signing_key.verifying_key().to_encoded_point(false);
        let public_key_bytes = public_key_point.as_bytes();
        if public_key_bytes.len() != 65 || public_key_bytes[0] != 0x04 {
            return Err(anyhow::anyhow!(
                "Invalid public key format: expected 65 bytes with 0x04 prefix"
            ));
        }
        Ok(keccak_address(&[&public_key_bytes[1..]]))
    }
}

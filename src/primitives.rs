//! Primitive identifiers shared by every chain in the network.
//!
//! Chain IDs and message IDs are 32-byte values, addresses are 20-byte values.
//! All three display as `0x`-prefixed lowercase hex and (de)serialize as hex
//! strings so they can appear in TOML configuration and JSON read models.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::IcmError;

// ============================================================================
// HEX HELPERS
// ============================================================================

/// Convert hex string (with or without 0x prefix) to bytes.
pub fn hex_to_bytes(hex_str: &str) -> Result<Vec<u8>, IcmError> {
    let hex_clean = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(hex_clean).map_err(|e| IcmError::InvalidHex(format!("{}: {}", hex_str, e)))
}

/// Parse a hex string into a fixed-size array, left-padding short values with zeros.
///
/// Short values are common when identifiers are written by hand (e.g. `0x1`).
pub fn parse_fixed_hex<const N: usize>(hex_str: &str) -> Result<[u8; N], IcmError> {
    let hex_clean = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    if hex_clean.len() > N * 2 {
        return Err(IcmError::InvalidHex(format!(
            "{} is longer than {} bytes",
            hex_str, N
        )));
    }
    let padded = format!("{:0>width$}", hex_clean, width = N * 2);
    let bytes = hex_to_bytes(&padded)?;
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn low_u64_bytes<const N: usize>(value: u64) -> [u8; N] {
    let mut out = [0u8; N];
    out[N - 8..].copy_from_slice(&value.to_be_bytes());
    out
}

// ============================================================================
// IDENTIFIER TYPES
// ============================================================================

macro_rules! fixed_bytes_id {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BorshSerialize, BorshDeserialize,
        )]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const ZERO: Self = Self([0u8; $len]);

            /// Builds an identifier whose low 8 bytes hold `value` (big-endian).
            pub fn from_low_u64(value: u64) -> Self {
                Self(low_u64_bytes::<$len>(value))
            }

            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; $len]
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IcmError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_fixed_hex::<$len>(s).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = <String as Deserialize>::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

fixed_bytes_id!(
    /// 32-byte blockchain identifier.
    ChainId,
    32
);

fixed_bytes_id!(
    /// 20-byte account or contract address.
    Address,
    20
);

fixed_bytes_id!(
    /// 32-byte message identifier, derived from `(source, destination, nonce)`.
    MessageId,
    32
);

/// Token amounts. Every ledger in the network uses 128-bit unsigned integers.
pub type Amount = u128;

// ============================================================================
// TESTS
// ============================================================================

//! Gas sizing for relay transactions.
//!
//! A relayer must attach enough gas to cover signature verification, envelope
//! parsing, receipt processing and the destination callback. The destination
//! messenger rejects deliveries carrying less than [`receive_gas_limit`].

use crate::error::IcmError;

/// Fixed cost of the receive entry point.
pub const RECEIVE_STATIC_GAS: u64 = 2_000_000;
/// Per signer included in the aggregate signature.
pub const GAS_PER_AGGREGATED_KEY: u64 = 1_000;
/// Per byte of the signed envelope.
pub const GAS_PER_ENVELOPE_BYTE: u64 = 100;
/// Per byte of the application payload copied into the callback.
pub const GAS_PER_PAYLOAD_BYTE: u64 = 16;
/// Per receipt processed on arrival.
pub const GAS_PER_RECEIPT: u64 = 15_000;

/// Minimum gas a relay transaction must supply.
///
/// Every term is added with overflow checking; an overflow is reported as
/// [`IcmError::ArithmeticOverflow`] rather than wrapping to a small limit.
pub fn receive_gas_limit(
    num_signers: usize,
    required_gas_limit: u64,
    envelope_bytes: usize,
    payload_bytes: usize,
    num_receipts: usize,
) -> Result<u64, IcmError> {
    let terms = [
        Some(required_gas_limit),
        Some(RECEIVE_STATIC_GAS),
        (num_signers as u64).checked_mul(GAS_PER_AGGREGATED_KEY),
        (envelope_bytes as u64).checked_mul(GAS_PER_ENVELOPE_BYTE),
        (payload_bytes as u64).checked_mul(GAS_PER_PAYLOAD_BYTE),
        (num_receipts as u64).checked_mul(GAS_PER_RECEIPT),
    ];

    terms.iter().try_fold(0u64, |acc, term| {
        term.and_then(|t| acc.checked_add(t))
            .ok_or(IcmError::ArithmeticOverflow)
    })
}

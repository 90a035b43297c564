//! Message Envelope Codec
//!
//! Wire format for cross-chain messages. A [`Message`] is borsh-encoded into the
//! payload of an [`AddressedCall`] (tagged with the sending messenger's address),
//! which in turn is the payload of an [`UnsignedEnvelope`]. Validators sign the
//! SHA-256 digest of the unsigned envelope bytes; the result is a
//! [`SignedEnvelope`] that any destination chain can verify.
//!
//! ```text
//! SignedEnvelope
//! ├── UnsignedEnvelope { network_id, source_chain_id, height, payload }
//! │                                                            └── AddressedCall { source_address, payload }
//! │                                                                                                 └── Message
//! └── AggregateSignature { signer_bitmap, signatures }
//! ```

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::IcmError;
use crate::primitives::{Address, Amount, ChainId, MessageId};

/// Domain separator mixed into every message ID.
const MESSAGE_ID_DOMAIN: &[u8] = b"icm-gmp/message-id";

// ============================================================================
// BORSH HELPERS
// ============================================================================

/// Borsh-encodes a value.
pub fn encode<T: BorshSerialize>(value: &T) -> Result<Vec<u8>, IcmError> {
    value
        .try_to_vec()
        .map_err(|e| IcmError::MalformedEnvelope(e.to_string()))
}

/// Borsh-decodes a value, rejecting trailing bytes.
pub fn decode<T: BorshDeserialize>(bytes: &[u8]) -> Result<T, IcmError> {
    T::try_from_slice(bytes).map_err(|e| IcmError::MalformedEnvelope(e.to_string()))
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

// ============================================================================
// MESSAGE STRUCTURES
// ============================================================================

/// Fee attached to a message, paid to whichever relayer delivers it.
#[derive(
    BorshSerialize, BorshDeserialize, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default,
)]
pub struct FeeInfo {
    /// Fee token contract on the source chain (zero address for the native asset)
    pub fee_token: Address,
    /// Fee amount, may be zero
    pub amount: Amount,
}

/// Proof that a message was delivered, returned to the source chain so the
/// relayer can redeem the message fee.
#[derive(BorshSerialize, BorshDeserialize, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub message_id: MessageId,
    pub relayer_reward_address: Address,
}

/// The cross-chain message as it travels on the wire.
#[derive(BorshSerialize, BorshDeserialize, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Per-messenger send sequence number; fixes the message ID
    pub message_nonce: u64,
    /// Account or contract that called send on the source chain
    pub origin_sender: Address,
    pub destination_chain_id: ChainId,
    /// Contract invoked on the destination (zero for receipt-only messages)
    pub destination_address: Address,
    /// Gas the destination callback must be given
    pub required_gas_limit: u64,
    /// Lowest destination endpoint version allowed to deliver this message (0 = any)
    pub min_destination_version: u64,
    /// Fee declared at send time. Later additions are tracked on the source chain only.
    pub fee: FeeInfo,
    /// Relayers permitted to deliver (empty = anyone)
    pub allowed_relayers: Vec<Address>,
    /// Receipts for messages this chain received from the destination
    pub receipts: Vec<Receipt>,
    /// Opaque application payload
    pub payload: Vec<u8>,
}

impl Message {
    pub fn to_bytes(&self) -> Result<Vec<u8>, IcmError> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IcmError> {
        decode(bytes)
    }

    /// SHA-256 of the encoded message. Used to check retried messages against what was stored.
    pub fn hash(&self) -> Result<[u8; 32], IcmError> {
        Ok(sha256(&self.to_bytes()?))
    }

    /// True if the message only carries receipts and has nothing to execute.
    pub fn is_receipt_only(&self) -> bool {
        self.destination_address.is_zero()
    }

    /// Whether `relayer` may deliver this message.
    pub fn allows_relayer(&self, relayer: &Address) -> bool {
        self.allowed_relayers.is_empty() || self.allowed_relayers.contains(relayer)
    }
}

/// Derives the message ID for the `nonce`-th message sent by `messenger` from
/// `source` to `destination`.
///
/// Nonces count per messenger endpoint, so the endpoint address is part of the
/// ID: the first sends through two versions on the same chain never collide.
/// Identical contents still get distinct IDs, and re-emitting a stored message
/// reproduces its ID.
pub fn calculate_message_id(
    messenger: &Address,
    source: &ChainId,
    destination: &ChainId,
    nonce: u64,
) -> MessageId {
    let mut hasher = Sha256::new();
    hasher.update(MESSAGE_ID_DOMAIN);
    hasher.update(messenger.as_bytes());
    hasher.update(source.as_bytes());
    hasher.update(destination.as_bytes());
    hasher.update(nonce.to_be_bytes());
    MessageId(hasher.finalize().into())
}

// ============================================================================
// ENVELOPES
// ============================================================================

/// Payload tagged with the contract that emitted it.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct AddressedCall {
    pub source_address: Address,
    pub payload: Vec<u8>,
}

/// Envelope emitted by the source chain and signed by its validators.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEnvelope {
    pub network_id: u32,
    pub source_chain_id: ChainId,
    /// Source chain height at emission; selects the validator set used for verification
    pub height: u64,
    /// Encoded [`AddressedCall`]
    pub payload: Vec<u8>,
}

impl UnsignedEnvelope {
    pub fn new(
        network_id: u32,
        source_chain_id: ChainId,
        height: u64,
        call: &AddressedCall,
    ) -> Result<Self, IcmError> {
        Ok(Self {
            network_id,
            source_chain_id,
            height,
            payload: encode(call)?,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, IcmError> {
        encode(self)
    }

    /// Digest the validators sign.
    pub fn digest(&self) -> Result<[u8; 32], IcmError> {
        Ok(sha256(&self.to_bytes()?))
    }

    pub fn addressed_call(&self) -> Result<AddressedCall, IcmError> {
        decode(&self.payload)
    }
}

/// Aggregate proof: one Ed25519 signature per set bit of `signer_bitmap`, in bit order.
///
/// Bit `i` refers to the `i`-th validator of the source chain's set at the
/// envelope height (bit `i % 8` of byte `i / 8`).
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct AggregateSignature {
    pub signer_bitmap: Vec<u8>,
    pub signatures: Vec<[u8; 64]>,
}

impl AggregateSignature {
    pub fn set_signer(&mut self, index: usize) {
        let byte = index / 8;
        if self.signer_bitmap.len() <= byte {
            self.signer_bitmap.resize(byte + 1, 0);
        }
        self.signer_bitmap[byte] |= 1 << (index % 8);
    }

    /// Validator indices marked in the bitmap, ascending.
    pub fn signer_indices(&self) -> Vec<usize> {
        let mut indices = Vec::new();
        for (byte_index, byte) in self.signer_bitmap.iter().enumerate() {
            for bit in 0..8 {
                if byte & (1 << bit) != 0 {
                    indices.push(byte_index * 8 + bit);
                }
            }
        }
        indices
    }

    pub fn num_signers(&self) -> usize {
        self.signer_bitmap
            .iter()
            .map(|b| b.count_ones() as usize)
            .sum()
    }
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct SignedEnvelope {
    pub unsigned: UnsignedEnvelope,
    pub signature: AggregateSignature,
}

impl SignedEnvelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>, IcmError> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IcmError> {
        decode(bytes)
    }
}

// ============================================================================
// PACKING
// ============================================================================

/// Wraps `message` sent by the messenger at `messenger_address` into an unsigned envelope.
pub fn pack_message(
    network_id: u32,
    source_chain_id: ChainId,
    height: u64,
    messenger_address: Address,
    message: &Message,
) -> Result<UnsignedEnvelope, IcmError> {
    let call = AddressedCall {
        source_address: messenger_address,
        payload: message.to_bytes()?,
    };
    UnsignedEnvelope::new(network_id, source_chain_id, height, &call)
}

/// Extracts `(messenger_address, message)` from an envelope.
pub fn unpack_message(envelope: &UnsignedEnvelope) -> Result<(Address, Message), IcmError> {
    let call = envelope.addressed_call()?;
    let message = Message::from_bytes(&call.payload)?;
    Ok((call.source_address, message))
}

// ============================================================================
// TESTS
// ============================================================================

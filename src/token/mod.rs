//! Token Transfer Layer
//!
//! Moves a token between a canonical "home" ledger and remote mirrors over the
//! messenger. The home custodies the real asset and tracks, per remote, how
//! much of it backs the remote's circulating supply. Remotes mint on receive
//! and burn on send.
//!
//! ## Variants
//!
//! Four deployable transferrers sit behind the [`TokenBridge`] capability:
//!
//! | Variant | Asset |
//! |---|---|
//! | `HomeErc20` | custodies an ERC20-style token |
//! | `HomeNative` | custodies the chain's native asset |
//! | `RemoteErc20` | is itself the mirrored ERC20 token |
//! | `RemoteNative` | mints the remote chain's native asset |
//!
//! ## Amount units
//!
//! Amounts on the wire are always in remote units. The home converts with
//! [`scaling::scale`] in both directions.

pub mod home;
pub mod remote;
pub mod router;
pub mod scaling;

pub use home::{RemoteTokenTransferrerSettings, TokenHome};
pub use remote::TokenRemote;
pub use router::MultiHopRouter;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::chain::ExecutionContext;
use crate::error::IcmError;
use crate::ledger::NATIVE_TOKEN;
use crate::messenger::MessageInput;
use crate::primitives::{Address, Amount, ChainId, MessageId};
use crate::registry::VersionGate;

/// Decimals of every chain's native asset.
pub const NATIVE_TOKEN_DECIMALS: u8 = 18;

/// Gas for the home to process a remote registration.
pub const REGISTER_REMOTE_REQUIRED_GAS: u64 = 130_000;
/// Gas for the home to process the first hop of a multi-hop send.
pub const MULTI_HOP_SEND_REQUIRED_GAS: u64 = 340_000;
/// Gas for the home to process the first hop of a multi-hop send-and-call.
pub const MULTI_HOP_CALL_REQUIRED_GAS: u64 = 350_000;

// ============================================================================
// WIRE PAYLOADS
// ============================================================================

/// Payload exchanged between token transferrers.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub enum TransferrerMessage {
    /// Remote -> home: announce a new remote and how much of its supply is unbacked.
    RegisterRemote {
        initial_reserve_imbalance: Amount,
        remote_token_decimals: u8,
        home_token_decimals: u8,
    },
    SingleHopSend {
        recipient: Address,
        amount: Amount,
    },
    SingleHopCall {
        source_blockchain_id: ChainId,
        origin_transferrer: Address,
        original_sender: Address,
        recipient_contract: Address,
        recipient_payload: Vec<u8>,
        recipient_gas_limit: u64,
        fallback_recipient: Address,
        amount: Amount,
    },
    /// Remote -> home: forward to another remote of the same home.
    MultiHopSend {
        destination_blockchain_id: ChainId,
        destination_transferrer: Address,
        recipient: Address,
        amount: Amount,
        secondary_fee: Amount,
        secondary_gas_limit: u64,
        multi_hop_fallback: Address,
    },
    MultiHopCall {
        original_sender: Address,
        destination_blockchain_id: ChainId,
        destination_transferrer: Address,
        recipient_contract: Address,
        recipient_payload: Vec<u8>,
        secondary_gas_limit: u64,
        recipient_gas_limit: u64,
        multi_hop_fallback: Address,
        fallback_recipient: Address,
        amount: Amount,
        secondary_fee: Amount,
    },
}

impl TransferrerMessage {
    pub fn encode(&self) -> Result<Vec<u8>, IcmError> {
        crate::codec::encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, IcmError> {
        crate::codec::decode(bytes)
    }
}

// ============================================================================
// SEND INPUTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendTokensInput {
    pub destination_blockchain_id: ChainId,
    pub destination_transferrer: Address,
    pub recipient: Address,
    pub primary_fee_token: Address,
    pub primary_fee: Amount,
    /// Fee for the home -> destination hop, in home token units (multi-hop only)
    pub secondary_fee: Amount,
    pub required_gas_limit: u64,
    /// Receives the tokens on the home chain if the second hop cannot proceed (multi-hop only)
    pub multi_hop_fallback: Address,
}

impl SendTokensInput {
    pub fn new(destination_blockchain_id: ChainId, destination_transferrer: Address, recipient: Address) -> Self {
        Self {
            destination_blockchain_id,
            destination_transferrer,
            recipient,
            primary_fee_token: NATIVE_TOKEN,
            primary_fee: 0,
            secondary_fee: 0,
            required_gas_limit: crate::messenger::DEFAULT_REQUIRED_GAS_LIMIT,
            multi_hop_fallback: Address::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendAndCallInput {
    pub destination_blockchain_id: ChainId,
    pub destination_transferrer: Address,
    pub recipient_contract: Address,
    pub recipient_payload: Vec<u8>,
    pub required_gas_limit: u64,
    pub recipient_gas_limit: u64,
    pub multi_hop_fallback: Address,
    /// Receives the tokens if the recipient contract call fails
    pub fallback_recipient: Address,
    pub primary_fee_token: Address,
    pub primary_fee: Amount,
    pub secondary_fee: Amount,
}

impl SendAndCallInput {
    pub fn new(
        destination_blockchain_id: ChainId,
        destination_transferrer: Address,
        recipient_contract: Address,
        recipient_payload: Vec<u8>,
        fallback_recipient: Address,
    ) -> Self {
        Self {
            destination_blockchain_id,
            destination_transferrer,
            recipient_contract,
            recipient_payload,
            required_gas_limit: 250_000,
            recipient_gas_limit: 200_000,
            multi_hop_fallback: Address::ZERO,
            fallback_recipient,
            primary_fee_token: NATIVE_TOKEN,
            primary_fee: 0,
            secondary_fee: 0,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), IcmError> {
        if self.recipient_contract.is_zero() {
            return Err(IcmError::InvalidInput("recipient contract must be non-zero".to_string()));
        }
        if self.fallback_recipient.is_zero() {
            return Err(IcmError::InvalidInput("fallback recipient must be non-zero".to_string()));
        }
        if self.recipient_gas_limit == 0 || self.recipient_gas_limit >= self.required_gas_limit {
            return Err(IcmError::InvalidInput(format!(
                "recipient gas limit {} must be non-zero and below required gas limit {}",
                self.recipient_gas_limit, self.required_gas_limit
            )));
        }
        Ok(())
    }
}

/// Tokens held by a transferrer that must be handed to a contract with a callback.
///
/// The chain moves `amount` of `token` from the transferrer to
/// `recipient_contract` and invokes it; if the callback fails the transfer is
/// undone and the tokens go to `fallback_recipient` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenCall {
    pub token: Address,
    pub source_chain_id: ChainId,
    pub origin_transferrer: Address,
    pub original_sender: Address,
    pub recipient_contract: Address,
    pub payload: Vec<u8>,
    pub gas_limit: u64,
    pub fallback_recipient: Address,
    pub amount: Amount,
}

// ============================================================================
// CAPABILITY
// ============================================================================

/// Operations common to every token transferrer.
pub trait TokenBridge {
    /// Token this transferrer moves on its own chain.
    fn token(&self, self_address: Address) -> Address;

    fn send(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        sender: Address,
        input: &SendTokensInput,
        amount: Amount,
    ) -> Result<MessageId, IcmError>;

    fn send_and_call(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        sender: Address,
        input: &SendAndCallInput,
        amount: Amount,
    ) -> Result<MessageId, IcmError>;

    /// Handles a message delivered by the messenger. May return a follow-up token call.
    fn receive(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        source_chain_id: ChainId,
        origin_sender: Address,
        payload: &[u8],
    ) -> Result<Option<TokenCall>, IcmError>;
}

#[derive(Debug, Clone)]
pub enum TokenTransferrer {
    HomeErc20(TokenHome),
    HomeNative(TokenHome),
    RemoteErc20(TokenRemote),
    RemoteNative(TokenRemote),
}

impl TokenTransferrer {
    pub fn home_erc20(token: Address, token_decimals: u8) -> Self {
        TokenTransferrer::HomeErc20(TokenHome::new(token, token_decimals))
    }

    pub fn home_native() -> Self {
        TokenTransferrer::HomeNative(TokenHome::new(NATIVE_TOKEN, NATIVE_TOKEN_DECIMALS))
    }

    /// A remote whose mirrored token is the transferrer contract itself.
    pub fn remote_erc20(
        home_chain_id: ChainId,
        home_address: Address,
        home_token_decimals: u8,
        token_decimals: u8,
    ) -> Result<Self, IcmError> {
        Ok(TokenTransferrer::RemoteErc20(TokenRemote::new(
            home_chain_id,
            home_address,
            home_token_decimals,
            token_decimals,
            0,
            false,
        )?))
    }

    /// A remote minting the native asset. `initial_reserve_imbalance` is the
    /// native supply that already exists on the remote without home backing.
    pub fn remote_native(
        home_chain_id: ChainId,
        home_address: Address,
        home_token_decimals: u8,
        initial_reserve_imbalance: Amount,
    ) -> Result<Self, IcmError> {
        Ok(TokenTransferrer::RemoteNative(TokenRemote::new(
            home_chain_id,
            home_address,
            home_token_decimals,
            NATIVE_TOKEN_DECIMALS,
            initial_reserve_imbalance,
            true,
        )?))
    }

    pub fn as_home(&self) -> Option<&TokenHome> {
        match self {
            TokenTransferrer::HomeErc20(home) | TokenTransferrer::HomeNative(home) => Some(home),
            _ => None,
        }
    }

    pub fn as_home_mut(&mut self) -> Option<&mut TokenHome> {
        match self {
            TokenTransferrer::HomeErc20(home) | TokenTransferrer::HomeNative(home) => Some(home),
            _ => None,
        }
    }

    pub fn as_remote(&self) -> Option<&TokenRemote> {
        match self {
            TokenTransferrer::RemoteErc20(remote) | TokenTransferrer::RemoteNative(remote) => Some(remote),
            _ => None,
        }
    }

    pub fn as_remote_mut(&mut self) -> Option<&mut TokenRemote> {
        match self {
            TokenTransferrer::RemoteErc20(remote) | TokenTransferrer::RemoteNative(remote) => Some(remote),
            _ => None,
        }
    }

    pub fn version_gate_mut(&mut self) -> &mut VersionGate {
        match self {
            TokenTransferrer::HomeErc20(home) | TokenTransferrer::HomeNative(home) => home.version_gate_mut(),
            TokenTransferrer::RemoteErc20(remote) | TokenTransferrer::RemoteNative(remote) => {
                remote.version_gate_mut()
            }
        }
    }

    fn bridge(&self) -> &dyn TokenBridge {
        match self {
            TokenTransferrer::HomeErc20(home) | TokenTransferrer::HomeNative(home) => home,
            TokenTransferrer::RemoteErc20(remote) | TokenTransferrer::RemoteNative(remote) => remote,
        }
    }

    fn bridge_mut(&mut self) -> &mut dyn TokenBridge {
        match self {
            TokenTransferrer::HomeErc20(home) | TokenTransferrer::HomeNative(home) => home,
            TokenTransferrer::RemoteErc20(remote) | TokenTransferrer::RemoteNative(remote) => remote,
        }
    }
}

impl TokenBridge for TokenTransferrer {
    fn token(&self, self_address: Address) -> Address {
        self.bridge().token(self_address)
    }

    fn send(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        sender: Address,
        input: &SendTokensInput,
        amount: Amount,
    ) -> Result<MessageId, IcmError> {
        self.bridge_mut().send(ctx, sender, input, amount)
    }

    fn send_and_call(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        sender: Address,
        input: &SendAndCallInput,
        amount: Amount,
    ) -> Result<MessageId, IcmError> {
        self.bridge_mut().send_and_call(ctx, sender, input, amount)
    }

    fn receive(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        source_chain_id: ChainId,
        origin_sender: Address,
        payload: &[u8],
    ) -> Result<Option<TokenCall>, IcmError> {
        self.bridge_mut().receive(ctx, source_chain_id, origin_sender, payload)
    }
}

// ============================================================================
// SHARED HELPERS
// ============================================================================

/// Collects `fee` from `sender` into the transferrer and sends `message` through
/// the latest messenger, which escrows the fee from the transferrer.
#[allow(clippy::too_many_arguments)]
pub(crate) fn send_transferrer_message(
    ctx: &mut ExecutionContext<'_>,
    sender: Address,
    destination_chain_id: ChainId,
    destination_address: Address,
    fee_token: Address,
    fee: Amount,
    required_gas_limit: u64,
    message: &TransferrerMessage,
) -> Result<MessageId, IcmError> {
    let self_address = ctx.self_address;
    ctx.ledger.transfer(fee_token, sender, self_address, fee)?;
    let input = MessageInput::new(destination_chain_id, destination_address, message.encode()?)
        .with_fee(fee_token, fee)
        .with_gas_limit(required_gas_limit);
    ctx.send_message(input)
}

//! Error definitions for the messaging and token-transfer layers.
//!
//! Every variant belongs to one of four kinds (see [`ErrorKind`]). An already
//! delivered message is not an error; it is reported as
//! [`crate::chain::ReceiveOutcome::AlreadyDelivered`].

use thiserror::Error;

use crate::primitives::{Address, Amount, ChainId, MessageId};

/// How a failure must be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input or unknown/insufficient state. No state was changed.
    Rejection,
    /// Signer weight below threshold or no validator set. Retry with a fresh aggregate.
    QuorumFailure,
    /// The destination application reverted. The message stays delivered and is retryable.
    ApplicationFailure,
    /// An accounting invariant was violated upstream. Never retried.
    ConsistencyFault,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IcmError {
    // ------------------------------------------------------------------------
    // Input / codec
    // ------------------------------------------------------------------------
    #[error("Invalid hex value: {0}")]
    InvalidHex(String),

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Invalid destination: chain id must be set")]
    InvalidDestination,

    #[error("Invalid required gas limit: must be greater than zero")]
    InvalidGasLimit,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Arithmetic overflow")]
    ArithmeticOverflow,

    // ------------------------------------------------------------------------
    // Messenger
    // ------------------------------------------------------------------------
    #[error("Unauthorized relayer {0}")]
    UnauthorizedRelayer(Address),

    #[error("Insufficient gas: supplied {supplied}, required {required}")]
    InsufficientGas { supplied: u64, required: u64 },

    #[error("Message {0} has not been delivered")]
    NotYetDelivered(MessageId),

    #[error("Message {0} has no failed execution to retry")]
    ExecutionNotFailed(MessageId),

    #[error("Message contents do not match stored hash for {0}")]
    MessageMismatch(MessageId),

    #[error("Unknown or already receipted message {0}")]
    UnknownMessage(MessageId),

    #[error("Receipt for {0} was not received from the requested chain")]
    ReceiptNotFound(MessageId),

    #[error("Fee token mismatch: expected {expected}, got {got}")]
    FeeTokenMismatch { expected: Address, got: Address },

    #[error("Nothing to redeem for relayer {relayer} in token {token}")]
    NothingToRedeem { relayer: Address, token: Address },

    #[error("Receipt queue did not shrink: {remaining} receipts still outstanding")]
    ReceiptQueueStalled { remaining: usize },

    #[error("Message execution reverted: {0}")]
    ExecutionReverted(String),

    #[error("Message {0} hit a consistency fault and needs manual reconciliation")]
    ConsistencyFaultRecorded(MessageId),

    // ------------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------------
    #[error("Protocol version out of order: expected {expected}, got {got}")]
    VersionOutOfOrder { expected: u64, got: u64 },

    #[error("Unknown protocol version {0}")]
    UnknownVersion(u64),

    #[error("Unknown protocol endpoint {0}")]
    UnknownEndpoint(Address),

    #[error("Endpoint version {version} is below minimum {minimum}")]
    VersionBelowMinimum { version: u64, minimum: u64 },

    #[error("Protocol endpoint {0} is paused")]
    EndpointPaused(Address),

    // ------------------------------------------------------------------------
    // Signature verification
    // ------------------------------------------------------------------------
    #[error("Insufficient quorum: signed weight {signed} of {total}, numerator {numerator}/{denominator}")]
    InsufficientQuorum {
        signed: u64,
        total: u64,
        numerator: u64,
        denominator: u64,
    },

    #[error("No validator set registered for chain {0}")]
    UnknownValidatorSet(ChainId),

    #[error("Invalid aggregate signature: {0}")]
    InvalidSignature(String),

    #[error("Signature aggregation timed out after {0} ms")]
    AggregationTimedOut(u64),

    #[error("Signature aggregation failed: {0}")]
    AggregationFailed(String),

    // ------------------------------------------------------------------------
    // Chain / ledger
    // ------------------------------------------------------------------------
    #[error("Unknown chain {0}")]
    UnknownChain(ChainId),

    #[error("Unknown application {0}")]
    UnknownApplication(Address),

    #[error("Address {0} is already in use")]
    AddressInUse(Address),

    #[error("Insufficient balance of {token} for {holder}: have {available}, need {required}")]
    InsufficientBalance {
        token: Address,
        holder: Address,
        available: Amount,
        required: Amount,
    },

    // ------------------------------------------------------------------------
    // Token transfer
    // ------------------------------------------------------------------------
    #[error("Unknown remote {address} on chain {chain_id}")]
    UnknownRemote { chain_id: ChainId, address: Address },

    #[error("Remote {address} on chain {chain_id} is already registered")]
    RemoteAlreadyRegistered { chain_id: ChainId, address: Address },

    #[error("Remote not collateralized: {collateral_needed} collateral still needed")]
    RemoteNotCollateralized { collateral_needed: Amount },

    #[error("Remote is already fully collateralized")]
    AlreadyCollateralized,

    #[error("Token remote has not received collateral from its home yet")]
    NotCollateralized,

    #[error("Incompatible scaling between remotes")]
    IncompatibleScaling,

    #[error("Invalid token decimals: {0}")]
    InvalidDecimals(String),

    #[error("Amount {amount} scales to zero on the destination")]
    ZeroScaledAmount { amount: Amount },

    #[error("Unauthorized sender {address} on chain {chain_id}")]
    UnauthorizedSender { chain_id: ChainId, address: Address },

    #[error("Insufficient home balance: need {required}, have {available}")]
    InsufficientHomeBalance { required: Amount, available: Amount },
}

impl IcmError {
    /// Classifies this error into the handling taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            IcmError::InsufficientQuorum { .. }
            | IcmError::UnknownValidatorSet(_)
            | IcmError::InvalidSignature(_)
            | IcmError::AggregationTimedOut(_)
            | IcmError::AggregationFailed(_) => ErrorKind::QuorumFailure,
            IcmError::ExecutionReverted(_) => ErrorKind::ApplicationFailure,
            IcmError::InsufficientHomeBalance { .. } | IcmError::ConsistencyFaultRecorded(_) => {
                ErrorKind::ConsistencyFault
            }
            _ => ErrorKind::Rejection,
        }
    }

    /// True when the failure indicates a broken invariant that must not be retried.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::ConsistencyFault
    }
}

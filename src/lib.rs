//! Interchain Messaging Library
//!
//! Authenticated, exactly-once messaging between independent chains using
//! aggregate validator signatures, plus a collateralized token-transfer layer
//! (home/remote transferrers with decimal scaling and multi-hop routing) built
//! on top of it.

pub mod apps;
pub mod chain;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod messenger;
pub mod network;
pub mod primitives;
pub mod registry;
pub mod relayer;
pub mod token;

// Re-export commonly used types
pub use chain::{Chain, DeliveryRequest, ExecutionContext, ReceiveOutcome, RetryOutcome};
pub use codec::{FeeInfo, Message, Receipt, SignedEnvelope, UnsignedEnvelope};
pub use config::Config;
pub use error::{ErrorKind, IcmError};
pub use gateway::{Quorum, QuorumVerifier, SignatureGateway, ValidatorSetSource};
pub use messenger::{MessageInput, Messenger};
pub use network::{Network, NetworkBuilder};
pub use primitives::{Address, Amount, ChainId, MessageId};
pub use registry::{ProtocolRegistry, VersionGate};
pub use relayer::{RelayReport, Relayer, RelayerConfig};
pub use token::{SendAndCallInput, SendTokensInput, TokenTransferrer};

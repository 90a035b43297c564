//! Destination applications.
//!
//! Everything a message can be delivered to lives in [`Application`]: token
//! transferrers and two reference receivers used by tooling and tests. The
//! chain dispatches on the tag; applications never call each other directly.

use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::chain::ExecutionContext;
use crate::error::IcmError;
use crate::primitives::{Address, Amount, ChainId};
use crate::registry::VersionGate;
use crate::token::{TokenBridge, TokenCall, TokenTransferrer};

// ============================================================================
// CALLBACK INTERFACES
// ============================================================================

/// `OnMessage(sourceChainID, payload)`
pub trait MessageReceiver {
    fn receive_message(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        source_chain_id: ChainId,
        origin_sender: Address,
        payload: &[u8],
    ) -> Result<(), IcmError>;
}

/// `OnTokensReceived(sourceChainID, token, amount, payload)`.
///
/// When this is called the tokens have already been moved to the receiver.
pub trait TokenCallReceiver {
    fn receive_tokens(&mut self, ctx: &mut ExecutionContext<'_>, call: &TokenCall) -> Result<(), IcmError>;
}

// ============================================================================
// REFERENCE RECEIVERS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredMessage {
    pub source_chain_id: ChainId,
    pub origin_sender: Address,
    pub payload: Vec<u8>,
}

/// Stores every message it receives. Can be paused to make deliveries fail.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    messages: Vec<StoredMessage>,
    paused: bool,
    gate: VersionGate,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[StoredMessage] {
        &self.messages
    }

    pub fn last_message(&self, source_chain_id: &ChainId) -> Option<&StoredMessage> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.source_chain_id == *source_chain_id)
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn version_gate_mut(&mut self) -> &mut VersionGate {
        &mut self.gate
    }
}

impl MessageReceiver for MessageStore {
    fn receive_message(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        source_chain_id: ChainId,
        origin_sender: Address,
        payload: &[u8],
    ) -> Result<(), IcmError> {
        ctx.check_endpoint(&self.gate)?;
        if self.paused {
            return Err(IcmError::ExecutionReverted("message store is paused".to_string()));
        }
        self.messages.push(StoredMessage {
            source_chain_id,
            origin_sender,
            payload: payload.to_vec(),
        });
        debug!(
            "Message stored: src_chain={}, sender={}, bytes={}",
            source_chain_id,
            origin_sender,
            payload.len()
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceivedTokens {
    pub source_chain_id: ChainId,
    pub original_sender: Address,
    pub token: Address,
    pub amount: Amount,
    pub payload: Vec<u8>,
}

/// Accepts token calls, except from blocked original senders.
#[derive(Debug, Clone, Default)]
pub struct CallReceiver {
    blocked_senders: HashSet<Address>,
    received: Vec<ReceivedTokens>,
}

impl CallReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_sender(&mut self, sender: Address) {
        self.blocked_senders.insert(sender);
    }

    pub fn unblock_sender(&mut self, sender: &Address) {
        self.blocked_senders.remove(sender);
    }

    pub fn received(&self) -> &[ReceivedTokens] {
        &self.received
    }
}

impl TokenCallReceiver for CallReceiver {
    fn receive_tokens(&mut self, _ctx: &mut ExecutionContext<'_>, call: &TokenCall) -> Result<(), IcmError> {
        if self.blocked_senders.contains(&call.original_sender) {
            return Err(IcmError::ExecutionReverted(format!(
                "sender {} is blocked",
                call.original_sender
            )));
        }
        self.received.push(ReceivedTokens {
            source_chain_id: call.source_chain_id,
            original_sender: call.original_sender,
            token: call.token,
            amount: call.amount,
            payload: call.payload.clone(),
        });
        info!(
            "Tokens received by contract: sender={}, token={}, amount={}",
            call.original_sender, call.token, call.amount
        );
        Ok(())
    }
}

// ============================================================================
// APPLICATION
// ============================================================================

#[derive(Debug, Clone)]
pub enum Application {
    Transferrer(TokenTransferrer),
    MessageStore(MessageStore),
    CallReceiver(CallReceiver),
}

impl Application {
    /// Delivers a messenger payload. Transferrers may ask for a follow-up token call.
    pub fn on_message(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        source_chain_id: ChainId,
        origin_sender: Address,
        payload: &[u8],
    ) -> Result<Option<TokenCall>, IcmError> {
        match self {
            Application::Transferrer(transferrer) => {
                transferrer.receive(ctx, source_chain_id, origin_sender, payload)
            }
            Application::MessageStore(store) => {
                store.receive_message(ctx, source_chain_id, origin_sender, payload)?;
                Ok(None)
            }
            Application::CallReceiver(_) => Err(IcmError::ExecutionReverted(
                "call receiver does not accept plain messages".to_string(),
            )),
        }
    }

    pub fn on_tokens_received(&mut self, ctx: &mut ExecutionContext<'_>, call: &TokenCall) -> Result<(), IcmError> {
        match self {
            Application::CallReceiver(receiver) => receiver.receive_tokens(ctx, call),
            _ => Err(IcmError::ExecutionReverted(format!(
                "{} does not accept token calls",
                ctx.self_address
            ))),
        }
    }

    /// Endpoint policy of the application, if it keeps one.
    pub fn version_gate_mut(&mut self) -> Option<&mut VersionGate> {
        match self {
            Application::Transferrer(t) => Some(t.version_gate_mut()),
            Application::MessageStore(s) => Some(s.version_gate_mut()),
            Application::CallReceiver(_) => None,
        }
    }

    pub fn as_transferrer(&self) -> Option<&TokenTransferrer> {
        match self {
            Application::Transferrer(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_transferrer_mut(&mut self) -> Option<&mut TokenTransferrer> {
        match self {
            Application::Transferrer(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_message_store(&self) -> Option<&MessageStore> {
        match self {
            Application::MessageStore(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_message_store_mut(&mut self) -> Option<&mut MessageStore> {
        match self {
            Application::MessageStore(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_call_receiver(&self) -> Option<&CallReceiver> {
        match self {
            Application::CallReceiver(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_call_receiver_mut(&mut self) -> Option<&mut CallReceiver> {
        match self {
            Application::CallReceiver(r) => Some(r),
            _ => None,
        }
    }
}

impl From<TokenTransferrer> for Application {
    fn from(transferrer: TokenTransferrer) -> Self {
        Application::Transferrer(transferrer)
    }
}

impl From<MessageStore> for Application {
    fn from(store: MessageStore) -> Self {
        Application::MessageStore(store)
    }
}

impl From<CallReceiver> for Application {
    fn from(receiver: CallReceiver) -> Self {
        Application::CallReceiver(receiver)
    }
}

//! Messenger Core
//!
//! Send/receive state machine of one messenger endpoint on one chain.
//!
//! ## Lifecycle
//!
//! 1. `send` assigns the next nonce, derives the message ID, escrows the fee,
//!    attaches up to [`MAX_RECEIPTS_BATCH_SIZE`] queued receipts and emits a
//!    [`SentEvent`] carrying the unsigned envelope for relayers.
//! 2. On the destination, `accept` deduplicates by message ID, records the
//!    delivery, queues a receipt for the source chain and credits the receipts
//!    carried by the message.
//! 3. The chain runs the destination callback and reports the result through
//!    `record_execution`. A failed callback leaves the message delivered and
//!    retryable through `prepare_retry` / `complete_retry`.
//! 4. Once a receipt returns to the source chain, the escrowed fee becomes a
//!    reward that the relayer redeems with `redeem_relayer_rewards`.
//!
//! The messenger never calls applications itself; see [`crate::chain`].

pub mod gas;
mod receipt_queue;

pub use receipt_queue::ReceiptQueue;

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::codec::{self, FeeInfo, Message, Receipt, UnsignedEnvelope};
use crate::error::IcmError;
use crate::ledger::Ledger;
use crate::primitives::{Address, Amount, ChainId, MessageId};

/// Most receipts piggybacked on a single outbound message.
pub const MAX_RECEIPTS_BATCH_SIZE: usize = 5;

/// Gas limit used when an application does not ask for one.
pub const DEFAULT_REQUIRED_GAS_LIMIT: u64 = 100_000;

// ============================================================================
// INPUTS AND READ MODELS
// ============================================================================

/// Parameters of a new cross-chain message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageInput {
    pub destination_chain_id: ChainId,
    pub destination_address: Address,
    pub fee: FeeInfo,
    pub required_gas_limit: u64,
    pub allowed_relayers: Vec<Address>,
    pub min_destination_version: u64,
    pub payload: Vec<u8>,
}

impl MessageInput {
    pub fn new(destination_chain_id: ChainId, destination_address: Address, payload: Vec<u8>) -> Self {
        Self {
            destination_chain_id,
            destination_address,
            fee: FeeInfo::default(),
            required_gas_limit: DEFAULT_REQUIRED_GAS_LIMIT,
            allowed_relayers: Vec::new(),
            min_destination_version: 0,
            payload,
        }
    }

    pub fn with_fee(mut self, fee_token: Address, amount: Amount) -> Self {
        self.fee = FeeInfo { fee_token, amount };
        self
    }

    pub fn with_gas_limit(mut self, required_gas_limit: u64) -> Self {
        self.required_gas_limit = required_gas_limit;
        self
    }

    pub fn with_allowed_relayers(mut self, allowed_relayers: Vec<Address>) -> Self {
        self.allowed_relayers = allowed_relayers;
        self
    }

    pub fn with_min_destination_version(mut self, version: u64) -> Self {
        self.min_destination_version = version;
        self
    }
}

/// Outbound message as seen by relayers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEvent {
    pub message_id: MessageId,
    pub destination_chain_id: ChainId,
    pub message: Message,
    pub envelope: UnsignedEnvelope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionStatus {
    /// Accepted, callback not yet reported
    Pending,
    Succeeded,
    /// Callback reverted; retryable
    Failed,
    /// Receipt-only message, nothing to execute
    Skipped,
    /// Callback hit an accounting fault; never retried
    Faulted,
}

/// Read model of a delivered message on the destination chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryRecord {
    pub message_id: MessageId,
    pub source_chain_id: ChainId,
    pub relayer_reward_address: Address,
    pub status: ExecutionStatus,
    pub delivered_at_height: u64,
}

/// Result of handing a message to [`Messenger::accept`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    New(MessageId),
    Duplicate(MessageId),
}

/// Result of [`Messenger::prepare_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCheck {
    Execute(MessageId),
    AlreadyExecuted(MessageId),
}

#[derive(Debug, Clone)]
struct SentMessageInfo {
    message_hash: [u8; 32],
    destination_chain_id: ChainId,
    fee: FeeInfo,
}

// ============================================================================
// MESSENGER
// ============================================================================

#[derive(Debug, Clone)]
pub struct Messenger {
    network_id: u32,
    chain_id: ChainId,
    address: Address,
    message_nonce: u64,
    /// Sent messages whose receipt has not come back yet
    sent_messages: HashMap<MessageId, SentMessageInfo>,
    sent_events: Vec<SentEvent>,
    delivered: HashMap<MessageId, DeliveryRecord>,
    failed_message_hashes: HashMap<MessageId, [u8; 32]>,
    receipt_queues: HashMap<ChainId, ReceiptQueue>,
    relayer_rewards: HashMap<(Address, Address), Amount>,
}

impl Messenger {
    pub fn new(network_id: u32, chain_id: ChainId, address: Address) -> Self {
        Self {
            network_id,
            chain_id,
            address,
            message_nonce: 0,
            sent_messages: HashMap::new(),
            sent_events: Vec::new(),
            delivered: HashMap::new(),
            failed_message_hashes: HashMap::new(),
            receipt_queues: HashMap::new(),
            relayer_rewards: HashMap::new(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn message_nonce(&self) -> u64 {
        self.message_nonce
    }

    // ------------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------------

    /// Sends a message on behalf of `origin_sender`.
    ///
    /// # Returns
    ///
    /// * `Ok(MessageId)` - ID of the emitted message
    /// * `Err(IcmError::InvalidDestination)` - Zero destination chain ID
    /// * `Err(IcmError::InvalidGasLimit)` - Zero required gas limit
    /// * `Err(IcmError::InsufficientBalance)` - Sender cannot cover the fee
    pub fn send(
        &mut self,
        ledger: &mut Ledger,
        origin_sender: Address,
        input: MessageInput,
        height: u64,
    ) -> Result<MessageId, IcmError> {
        if input.destination_chain_id.is_zero() {
            return Err(IcmError::InvalidDestination);
        }
        if input.required_gas_limit == 0 {
            return Err(IcmError::InvalidGasLimit);
        }

        self.escrow_fee(ledger, origin_sender, &input.fee)?;

        let receipts = self
            .receipt_queues
            .get_mut(&input.destination_chain_id)
            .map(|q| q.dequeue_batch(MAX_RECEIPTS_BATCH_SIZE))
            .unwrap_or_default();

        self.emit(origin_sender, input, receipts, height)
    }

    /// Sends a receipt-only message carrying exactly the listed receipts back to
    /// `source_chain_id`, removing them from the queue.
    ///
    /// Every id must belong to a message this messenger received from
    /// `source_chain_id` (`ReceiptNotFound` otherwise). Duplicate ids are sent once.
    #[allow(clippy::too_many_arguments)]
    pub fn send_specified_receipts(
        &mut self,
        ledger: &mut Ledger,
        origin_sender: Address,
        source_chain_id: ChainId,
        message_ids: &[MessageId],
        fee: FeeInfo,
        allowed_relayers: Vec<Address>,
        height: u64,
    ) -> Result<MessageId, IcmError> {
        if source_chain_id.is_zero() {
            return Err(IcmError::InvalidDestination);
        }

        let mut seen = HashSet::new();
        let mut receipts = Vec::new();
        for id in message_ids {
            if !seen.insert(*id) {
                continue;
            }
            let record = self
                .delivered
                .get(id)
                .filter(|r| r.source_chain_id == source_chain_id)
                .ok_or(IcmError::ReceiptNotFound(*id))?;
            receipts.push(Receipt {
                message_id: *id,
                relayer_reward_address: record.relayer_reward_address,
            });
        }

        self.escrow_fee(ledger, origin_sender, &fee)?;

        if let Some(queue) = self.receipt_queues.get_mut(&source_chain_id) {
            let removed = queue.remove_ids(&seen);
            debug!(
                "Removed {} specified receipts from queue for chain {}",
                removed, source_chain_id
            );
        }

        let input = MessageInput {
            destination_chain_id: source_chain_id,
            destination_address: Address::ZERO,
            fee,
            required_gas_limit: 0,
            allowed_relayers,
            min_destination_version: 0,
            payload: Vec::new(),
        };
        self.emit(origin_sender, input, receipts, height)
    }

    /// Re-emits the envelope of a pending message. The message must hash to the stored value.
    pub fn retry_send(&mut self, message: &Message, height: u64) -> Result<MessageId, IcmError> {
        let message_id = codec::calculate_message_id(
            &self.address,
            &self.chain_id,
            &message.destination_chain_id,
            message.message_nonce,
        );
        let info = self
            .sent_messages
            .get(&message_id)
            .ok_or(IcmError::UnknownMessage(message_id))?;
        if info.message_hash != message.hash()? {
            return Err(IcmError::MessageMismatch(message_id));
        }

        let envelope = codec::pack_message(self.network_id, self.chain_id, height, self.address, message)?;
        self.sent_events.push(SentEvent {
            message_id,
            destination_chain_id: message.destination_chain_id,
            message: message.clone(),
            envelope,
        });
        info!("Message re-emitted: id={}, height={}", message_id, height);
        Ok(message_id)
    }

    /// Adds `amount` of `fee_token` to the fee of a message that has not been receipted yet.
    pub fn add_fee_amount(
        &mut self,
        ledger: &mut Ledger,
        sender: Address,
        message_id: MessageId,
        fee_token: Address,
        amount: Amount,
    ) -> Result<FeeInfo, IcmError> {
        if amount == 0 {
            return Err(IcmError::InvalidInput("additional fee must be non-zero".to_string()));
        }
        let current = self
            .sent_messages
            .get(&message_id)
            .map(|info| info.fee)
            .ok_or(IcmError::UnknownMessage(message_id))?;
        if current.amount > 0 && current.fee_token != fee_token {
            return Err(IcmError::FeeTokenMismatch {
                expected: current.fee_token,
                got: fee_token,
            });
        }
        let updated = FeeInfo {
            fee_token,
            amount: current
                .amount
                .checked_add(amount)
                .ok_or(IcmError::ArithmeticOverflow)?,
        };

        ledger.transfer(fee_token, sender, self.address, amount)?;
        if let Some(info) = self.sent_messages.get_mut(&message_id) {
            info.fee = updated;
        }

        info!(
            "Fee added: id={}, token={}, added={}, total={}",
            message_id, fee_token, amount, updated.amount
        );
        Ok(updated)
    }

    fn escrow_fee(&self, ledger: &mut Ledger, payer: Address, fee: &FeeInfo) -> Result<(), IcmError> {
        if fee.amount == 0 {
            return Ok(());
        }
        ledger.transfer(fee.fee_token, payer, self.address, fee.amount)
    }

    fn emit(
        &mut self,
        origin_sender: Address,
        input: MessageInput,
        receipts: Vec<Receipt>,
        height: u64,
    ) -> Result<MessageId, IcmError> {
        let nonce = self
            .message_nonce
            .checked_add(1)
            .ok_or(IcmError::ArithmeticOverflow)?;
        let message_id =
            codec::calculate_message_id(&self.address, &self.chain_id, &input.destination_chain_id, nonce);

        let message = Message {
            message_nonce: nonce,
            origin_sender,
            destination_chain_id: input.destination_chain_id,
            destination_address: input.destination_address,
            required_gas_limit: input.required_gas_limit,
            min_destination_version: input.min_destination_version,
            fee: input.fee,
            allowed_relayers: input.allowed_relayers,
            receipts,
            payload: input.payload,
        };
        let envelope = codec::pack_message(self.network_id, self.chain_id, height, self.address, &message)?;

        self.message_nonce = nonce;
        self.sent_messages.insert(
            message_id,
            SentMessageInfo {
                message_hash: message.hash()?,
                destination_chain_id: message.destination_chain_id,
                fee: message.fee,
            },
        );
        info!(
            "Message sent: id={}, nonce={}, dst_chain={}, dst_addr={}, receipts={}, fee={}",
            message_id,
            nonce,
            message.destination_chain_id,
            message.destination_address,
            message.receipts.len(),
            message.fee.amount
        );
        self.sent_events.push(SentEvent {
            message_id,
            destination_chain_id: message.destination_chain_id,
            message,
            envelope,
        });
        Ok(message_id)
    }

    // ------------------------------------------------------------------------
    // Receiving
    // ------------------------------------------------------------------------

    /// ID of a message delivered to this endpoint. Deliveries are only accepted
    /// from the endpoint with the same address on the source chain.
    fn inbound_message_id(&self, source_chain_id: ChainId, message: &Message) -> MessageId {
        codec::calculate_message_id(&self.address, &source_chain_id, &self.chain_id, message.message_nonce)
    }

    /// Marks `message` from `source_chain_id` as delivered.
    ///
    /// A message that was already delivered yields [`Acceptance::Duplicate`] and
    /// changes nothing. Otherwise a receipt is queued for the source chain and
    /// the receipts carried by the message are credited.
    pub fn accept(
        &mut self,
        source_chain_id: ChainId,
        message: &Message,
        relayer: Address,
        relayer_reward_address: Address,
        height: u64,
    ) -> Result<Acceptance, IcmError> {
        if !message.allows_relayer(&relayer) {
            return Err(IcmError::UnauthorizedRelayer(relayer));
        }

        let message_id = self.inbound_message_id(source_chain_id, message);
        if self.delivered.contains_key(&message_id) {
            debug!("Message already delivered: id={}", message_id);
            return Ok(Acceptance::Duplicate(message_id));
        }

        self.delivered.insert(
            message_id,
            DeliveryRecord {
                message_id,
                source_chain_id,
                relayer_reward_address,
                status: ExecutionStatus::Pending,
                delivered_at_height: height,
            },
        );
        self.receipt_queues
            .entry(source_chain_id)
            .or_default()
            .enqueue(Receipt {
                message_id,
                relayer_reward_address,
            });

        for receipt in &message.receipts {
            self.credit_receipt(source_chain_id, receipt);
        }

        info!(
            "Message delivered: id={}, src_chain={}, relayer={}",
            message_id, source_chain_id, relayer
        );
        Ok(Acceptance::New(message_id))
    }

    fn credit_receipt(&mut self, from_chain: ChainId, receipt: &Receipt) {
        let Some(info) = self.sent_messages.get(&receipt.message_id) else {
            debug!("Ignoring duplicate or unknown receipt: id={}", receipt.message_id);
            return;
        };
        if info.destination_chain_id != from_chain {
            warn!(
                "Ignoring receipt for {} from chain {}: message was sent to {}",
                receipt.message_id, from_chain, info.destination_chain_id
            );
            return;
        }
        let fee = info.fee;
        self.sent_messages.remove(&receipt.message_id);

        if fee.amount > 0 {
            let key = (receipt.relayer_reward_address, fee.fee_token);
            let balance = self.relayer_rewards.entry(key).or_insert(0);
            *balance = balance.saturating_add(fee.amount);
        }
        info!(
            "Receipt received: id={}, reward_addr={}, fee={}",
            receipt.message_id, receipt.relayer_reward_address, fee.amount
        );
    }

    /// Records the outcome of the destination callback for a freshly accepted message.
    pub fn record_execution(
        &mut self,
        message_id: MessageId,
        status: ExecutionStatus,
        message_hash: Option<[u8; 32]>,
    ) {
        if let Some(record) = self.delivered.get_mut(&message_id) {
            record.status = status;
        }
        if status == ExecutionStatus::Failed {
            if let Some(hash) = message_hash {
                self.failed_message_hashes.insert(message_id, hash);
            }
        }
    }

    /// Checks that `message` from `source_chain_id` may be re-executed.
    pub fn prepare_retry(
        &self,
        source_chain_id: ChainId,
        message: &Message,
    ) -> Result<RetryCheck, IcmError> {
        let message_id = self.inbound_message_id(source_chain_id, message);
        let record = self
            .delivered
            .get(&message_id)
            .ok_or(IcmError::NotYetDelivered(message_id))?;

        match record.status {
            ExecutionStatus::Succeeded => Ok(RetryCheck::AlreadyExecuted(message_id)),
            ExecutionStatus::Faulted => Err(IcmError::ConsistencyFaultRecorded(message_id)),
            ExecutionStatus::Failed => {
                let stored = self
                    .failed_message_hashes
                    .get(&message_id)
                    .ok_or(IcmError::ExecutionNotFailed(message_id))?;
                if *stored != message.hash()? {
                    return Err(IcmError::MessageMismatch(message_id));
                }
                Ok(RetryCheck::Execute(message_id))
            }
            ExecutionStatus::Pending | ExecutionStatus::Skipped => {
                Err(IcmError::ExecutionNotFailed(message_id))
            }
        }
    }

    pub fn complete_retry(&mut self, message_id: MessageId) {
        self.failed_message_hashes.remove(&message_id);
        if let Some(record) = self.delivered.get_mut(&message_id) {
            record.status = ExecutionStatus::Succeeded;
        }
        info!("Message execution retried successfully: id={}", message_id);
    }

    // ------------------------------------------------------------------------
    // Rewards
    // ------------------------------------------------------------------------

    /// Pays out everything `relayer` has earned in `fee_token`.
    pub fn redeem_relayer_rewards(
        &mut self,
        ledger: &mut Ledger,
        relayer: Address,
        fee_token: Address,
    ) -> Result<Amount, IcmError> {
        let amount = self.check_relayer_reward_amount(&relayer, &fee_token);
        if amount == 0 {
            return Err(IcmError::NothingToRedeem {
                relayer,
                token: fee_token,
            });
        }
        ledger.transfer(fee_token, self.address, relayer, amount)?;
        self.relayer_rewards.remove(&(relayer, fee_token));
        info!(
            "Relayer rewards redeemed: relayer={}, token={}, amount={}",
            relayer, fee_token, amount
        );
        Ok(amount)
    }

    // ------------------------------------------------------------------------
    // Read models
    // ------------------------------------------------------------------------

    pub fn check_relayer_reward_amount(&self, relayer: &Address, fee_token: &Address) -> Amount {
        self.relayer_rewards
            .get(&(*relayer, *fee_token))
            .copied()
            .unwrap_or(0)
    }

    pub fn receipt_queue_size(&self, chain_id: &ChainId) -> usize {
        self.receipt_queues.get(chain_id).map_or(0, ReceiptQueue::len)
    }

    /// IDs of receipts waiting to travel back to `chain_id`, oldest first.
    pub fn queued_receipt_ids(&self, chain_id: &ChainId) -> Vec<MessageId> {
        self.receipt_queues
            .get(chain_id)
            .map(|q| q.iter().map(|r| r.message_id).collect())
            .unwrap_or_default()
    }

    pub fn get_delivered(&self, message_id: &MessageId) -> Option<&DeliveryRecord> {
        self.delivered.get(message_id)
    }

    pub fn message_received(&self, message_id: &MessageId) -> bool {
        self.delivered.contains_key(message_id)
    }

    /// Current fee of a sent message, `None` once its receipt has come back.
    pub fn fee_info(&self, message_id: &MessageId) -> Option<FeeInfo> {
        self.sent_messages.get(message_id).map(|info| info.fee)
    }

    pub fn sent_events(&self) -> &[SentEvent] {
        &self.sent_events
    }

    /// Most recent emission of `message_id`.
    pub fn sent_event(&self, message_id: &MessageId) -> Option<&SentEvent> {
        self.sent_events.iter().rev().find(|e| e.message_id == *message_id)
    }
}

// ============================================================================
// TESTS
// ============================================================================

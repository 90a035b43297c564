//! Relayer Module
//!
//! Watches every messenger's send events, obtains an aggregate signature for
//! each envelope and submits the delivery to the destination chain.
//!
//! ## Architecture
//!
//! The relayer:
//! 1. Scans each (chain, messenger) event stream from its cursor
//! 2. Requests an aggregate through the signature gateway under a deadline
//! 3. Sizes the delivery gas and submits the envelope to the destination
//!
//! A quorum failure leaves the cursor where it is, so the envelope is retried
//! with a fresh aggregate on the next pass. Rejections are logged and skipped.
//!
//! ## Security
//!
//! **CRITICAL**: The operator key decides who collects relayer rewards. It is
//! read from the environment and never logged.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::chain::{DeliveryRequest, ReceiveOutcome};
use crate::codec::{self, FeeInfo};
use crate::config::Config;
use crate::crypto::RelayerIdentity;
use crate::error::{ErrorKind, IcmError};
use crate::gateway::{Quorum, SignatureGateway};
use crate::messenger::{gas, SentEvent, MAX_RECEIPTS_BATCH_SIZE};
use crate::network::Network;
use crate::primitives::{Address, ChainId, MessageId};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct RelayerConfig {
    /// Operator address presented to allow lists
    pub relayer_address: Address,
    /// Where rewards for delivered messages accrue
    pub reward_address: Address,
    pub polling_interval_ms: u64,
    pub aggregation_timeout_ms: u64,
    pub max_gas_limit: u64,
}

impl RelayerConfig {
    /// Create relayer config from main config.
    pub fn from_config(config: &Config) -> Result<Self> {
        let private_key = config.relayer.get_private_key()?;
        let relayer_address = RelayerIdentity::from_base64(&private_key)?.address()?;

        Ok(Self {
            relayer_address,
            reward_address: config.relayer.reward_address.unwrap_or(relayer_address),
            polling_interval_ms: config.relayer.polling_interval_ms,
            aggregation_timeout_ms: config.relayer.aggregation_timeout_ms,
            max_gas_limit: config.relayer.max_gas_limit,
        })
    }
}

// ============================================================================
// RELAY STATE
// ============================================================================

/// Progress through each messenger's event stream.
#[derive(Debug, Default)]
struct RelayState {
    /// (chain, messenger endpoint) -> number of send events already handled
    cursors: HashMap<(ChainId, Address), usize>,
    last_pass_at: Option<DateTime<Utc>>,
}

/// Tally of one or more relay passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayReport {
    pub delivered: usize,
    pub execution_failed: usize,
    pub faulted: usize,
    pub already_delivered: usize,
    /// Rejected by the destination or not ours to relay
    pub skipped: usize,
    /// Left for the next pass after a quorum failure
    pub deferred: usize,
}

impl RelayReport {
    /// Events that advanced a cursor.
    pub fn processed(&self) -> usize {
        self.delivered + self.execution_failed + self.faulted + self.already_delivered + self.skipped
    }

    fn record(&mut self, outcome: &ReceiveOutcome) {
        match outcome {
            ReceiveOutcome::Delivered { .. } => self.delivered += 1,
            ReceiveOutcome::ExecutionFailed { .. } => self.execution_failed += 1,
            ReceiveOutcome::Faulted { .. } => self.faulted += 1,
            ReceiveOutcome::AlreadyDelivered { .. } => self.already_delivered += 1,
        }
    }

    fn merge(&mut self, other: RelayReport) {
        self.delivered += other.delivered;
        self.execution_failed += other.execution_failed;
        self.faulted += other.faulted;
        self.already_delivered += other.already_delivered;
        self.skipped += other.skipped;
        self.deferred = other.deferred;
    }
}

// ============================================================================
// RELAYER
// ============================================================================

pub struct Relayer {
    config: RelayerConfig,
    network: Arc<RwLock<Network>>,
    gateway: SignatureGateway,
    quorum: Quorum,
    state: Arc<RwLock<RelayState>>,
}

impl Relayer {
    pub fn new(config: RelayerConfig, network: Network) -> Self {
        let gateway = network.gateway().clone();
        let quorum = network.verifier().quorum();
        Self {
            config,
            network: Arc::new(RwLock::new(network)),
            gateway,
            quorum,
            state: Arc::new(RwLock::new(RelayState::default())),
        }
    }

    pub fn config(&self) -> &RelayerConfig {
        &self.config
    }

    /// Shared handle to the relayed network.
    pub fn network(&self) -> Arc<RwLock<Network>> {
        self.network.clone()
    }

    /// Start the relay service (blocking).
    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting relayer: address={}, polling_interval={}ms",
            self.config.relayer_address, self.config.polling_interval_ms
        );

        let interval = Duration::from_millis(self.config.polling_interval_ms);
        loop {
            match self.relay_pending().await {
                Ok(report) if report.processed() > 0 => {
                    info!(
                        "Relay pass: delivered={}, failed={}, faulted={}, duplicates={}, skipped={}, deferred={}",
                        report.delivered,
                        report.execution_failed,
                        report.faulted,
                        report.already_delivered,
                        report.skipped,
                        report.deferred
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Error relaying messages: {}", e),
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Aggregates signatures for one send event and delivers it.
    pub async fn relay_message(&self, event: &SentEvent) -> Result<ReceiveOutcome, IcmError> {
        let deadline = Duration::from_millis(self.config.aggregation_timeout_ms);
        let signed = self
            .gateway
            .request_aggregate(&event.envelope, self.quorum, deadline)
            .await?;

        let (source_messenger, message) = codec::unpack_message(&signed.unsigned)?;
        let gas_limit = gas::receive_gas_limit(
            signed.signature.num_signers(),
            message.required_gas_limit,
            signed.to_bytes()?.len(),
            message.payload.len(),
            message.receipts.len(),
        )?;
        if gas_limit > self.config.max_gas_limit {
            return Err(IcmError::InsufficientGas {
                supplied: self.config.max_gas_limit,
                required: gas_limit,
            });
        }

        let request = DeliveryRequest {
            endpoint: source_messenger,
            signed,
            relayer: self.config.relayer_address,
            relayer_reward_address: self.config.reward_address,
            gas_limit,
        };
        let outcome = self
            .network
            .write()
            .await
            .deliver(&event.destination_chain_id, &request)?;
        debug!("Relayed {}: {:?}", event.message_id, outcome);
        Ok(outcome)
    }

    /// Snapshot of unhandled send events per (chain, messenger).
    async fn pending_events(&self) -> Vec<((ChainId, Address), usize, Vec<SentEvent>)> {
        let network = self.network.read().await;
        let state = self.state.read().await;
        let mut pending = Vec::new();
        for chain in network.chains() {
            for messenger in chain.messengers() {
                let key = (chain.chain_id(), messenger.address());
                let cursor = state.cursors.get(&key).copied().unwrap_or(0);
                let events = messenger.sent_events();
                if cursor < events.len() {
                    pending.push((key, cursor, events[cursor..].to_vec()));
                }
            }
        }
        pending
    }

    /// Relays every send event emitted since the last pass.
    ///
    /// Within one event stream, events are relayed in emission order; a
    /// quorum failure stops that stream until the next pass.
    pub async fn relay_pending(&self) -> Result<RelayReport, IcmError> {
        let mut report = RelayReport::default();

        for (key, start, events) in self.pending_events().await {
            let mut cursor = start;
            for event in &events {
                if !event.message.allows_relayer(&self.config.relayer_address) {
                    debug!("Not an allowed relayer for {}; skipping", event.message_id);
                    report.skipped += 1;
                } else {
                    match self.relay_message(event).await {
                        Ok(outcome) => report.record(&outcome),
                        Err(e) if e.kind() == ErrorKind::QuorumFailure => {
                            warn!(
                                "Quorum failure relaying {} from chain {}: {}. Will retry.",
                                event.message_id, key.0, e
                            );
                            report.deferred += events.len() - (cursor - start);
                            break;
                        }
                        Err(e) => {
                            error!(
                                "Failed to deliver {} to chain {}: {}",
                                event.message_id, event.destination_chain_id, e
                            );
                            report.skipped += 1;
                        }
                    }
                }
                cursor += 1;
                self.state.write().await.cursors.insert(key, cursor);
            }
        }

        self.state.write().await.last_pass_at = Some(Utc::now());
        Ok(report)
    }

    /// When the last relay pass finished, if any.
    pub async fn last_pass_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.last_pass_at
    }

    /// Relays until a pass finds nothing new, at most `max_rounds` passes.
    ///
    /// Deliveries can trigger further sends (multi-hop second legs), so a
    /// single pass is not always enough.
    pub async fn relay_all(&self, max_rounds: usize) -> Result<RelayReport, IcmError> {
        let mut total = RelayReport::default();
        for round in 0..max_rounds {
            let report = self.relay_pending().await?;
            let idle = report.processed() == 0;
            total.merge(report);
            if idle {
                debug!("Relay converged after {} rounds", round + 1);
                break;
            }
        }
        Ok(total)
    }

    /// Drains the receipts `destination` owes `source` for messages it
    /// received from it, on every messenger endpoint of `destination`.
    ///
    /// Each cycle flushes up to [`MAX_RECEIPTS_BATCH_SIZE`] receipts per
    /// endpoint in receipt-only messages sent through that same endpoint, then
    /// relays them. Endpoints left behind by an upgrade are drained too, since
    /// applications only send through the latest one. The outstanding count
    /// must shrink every cycle, so the loop ends after at most as many cycles
    /// as there were receipts.
    ///
    /// # Returns
    ///
    /// * `Ok(cycles)` - Number of flush cycles run
    /// * `Err(IcmError::ReceiptQueueStalled)` - A cycle did not shrink the queues
    pub async fn clear_receipt_queue(&self, source: ChainId, destination: ChainId) -> Result<usize, IcmError> {
        let initial = self.outstanding_receipts(&source, &destination).await?;
        let mut remaining = initial;
        let mut cycles = 0;

        while remaining > 0 && cycles < initial {
            let batches = self.queued_receipts(&source, &destination).await?;
            {
                let mut network = self.network.write().await;
                let chain = network
                    .chain_mut(&destination)
                    .ok_or(IcmError::UnknownChain(destination))?;
                for (endpoint, queued) in batches {
                    let batch: Vec<_> = queued.into_iter().take(MAX_RECEIPTS_BATCH_SIZE).collect();
                    chain.send_specified_receipts(
                        endpoint,
                        self.config.relayer_address,
                        source,
                        &batch,
                        FeeInfo::default(),
                        Vec::new(),
                    )?;
                }
            }
            self.relay_pending().await?;
            cycles += 1;

            let now = self.outstanding_receipts(&source, &destination).await?;
            if now >= remaining {
                return Err(IcmError::ReceiptQueueStalled { remaining: now });
            }
            remaining = now;
            debug!("Receipt flush cycle {}: {} receipts remaining", cycles, remaining);
        }

        info!(
            "Receipt queue cleared: {} -> {} in {} cycles ({} receipts)",
            destination, source, cycles, initial
        );
        Ok(cycles)
    }

    /// Receipts owed to `source` across every endpoint of `destination`.
    pub async fn outstanding_receipts(&self, source: &ChainId, destination: &ChainId) -> Result<usize, IcmError> {
        Ok(self
            .queued_receipts(source, destination)
            .await?
            .iter()
            .map(|(_, ids)| ids.len())
            .sum())
    }

    /// Non-empty receipt queues for `source`, per messenger endpoint of `destination`.
    async fn queued_receipts(
        &self,
        source: &ChainId,
        destination: &ChainId,
    ) -> Result<Vec<(Address, Vec<MessageId>)>, IcmError> {
        let network = self.network.read().await;
        let chain = network
            .chain(destination)
            .ok_or(IcmError::UnknownChain(*destination))?;
        Ok(chain
            .messengers()
            .map(|messenger| (messenger.address(), messenger.queued_receipt_ids(source)))
            .filter(|(_, ids)| !ids.is_empty())
            .collect())
    }
}

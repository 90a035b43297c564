//! Chain State Machine
//!
//! One independent ledger of the network. Every public operation is a
//! serializable unit: it runs against the current [`ChainState`] and either
//! commits (advancing the height) or is rolled back completely, the way a
//! reverted transaction leaves no trace.
//!
//! Message delivery adds one inner checkpoint: the delivery itself (dedup
//! mark, receipt bookkeeping) is committed first, and only the application
//! callback is rolled back when it fails.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, error, info, warn};

use crate::apps::Application;
use crate::codec::{self, FeeInfo, Message, SignedEnvelope};
use crate::crypto::{self, AddressAllocator};
use crate::error::IcmError;
use crate::gateway::QuorumVerifier;
use crate::ledger::Ledger;
use crate::messenger::{gas, Acceptance, ExecutionStatus, MessageInput, Messenger, RetryCheck};
use crate::primitives::{Address, Amount, ChainId, MessageId};
use crate::registry::{ProtocolRegistry, ProtocolVersionPayload, VersionGate};
use crate::token::{
    RemoteTokenTransferrerSettings, SendAndCallInput, SendTokensInput, TokenBridge, TokenCall, TokenHome,
    TokenRemote, TokenTransferrer,
};

// ============================================================================
// EXECUTION CONTEXT
// ============================================================================

/// What an application sees while it runs.
pub struct ExecutionContext<'a> {
    pub chain_id: ChainId,
    /// Address of the running application
    pub self_address: Address,
    pub height: u64,
    /// Messenger endpoint that delivered the current message, if any
    pub delivered_by: Option<Address>,
    pub ledger: &'a mut Ledger,
    /// Latest messenger endpoint; used for every outbound message
    pub messenger: &'a mut Messenger,
    pub registry: &'a ProtocolRegistry,
}

impl ExecutionContext<'_> {
    /// Sends a message from the running application.
    pub fn send_message(&mut self, input: MessageInput) -> Result<MessageId, IcmError> {
        self.messenger
            .send(self.ledger, self.self_address, input, self.height)
    }

    /// Applies an application's version gate to the delivering endpoint.
    pub fn check_endpoint(&self, gate: &VersionGate) -> Result<(), IcmError> {
        if let Some(endpoint) = self.delivered_by {
            gate.check(self.registry, &endpoint)?;
        }
        Ok(())
    }
}

// ============================================================================
// REQUESTS AND OUTCOMES
// ============================================================================

/// A relayer's delivery transaction.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Destination messenger endpoint
    pub endpoint: Address,
    pub signed: SignedEnvelope,
    pub relayer: Address,
    pub relayer_reward_address: Address,
    pub gas_limit: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ReceiveOutcome {
    /// Delivered and executed (or nothing to execute)
    Delivered { message_id: MessageId },
    /// Delivered; the application failed and the message can be retried
    ExecutionFailed { message_id: MessageId, reason: String },
    /// Delivered; execution hit a consistency fault and will never be retried
    Faulted { message_id: MessageId, reason: String },
    /// Already delivered earlier; nothing changed
    AlreadyDelivered { message_id: MessageId },
}

impl ReceiveOutcome {
    pub fn message_id(&self) -> MessageId {
        match self {
            ReceiveOutcome::Delivered { message_id }
            | ReceiveOutcome::ExecutionFailed { message_id, .. }
            | ReceiveOutcome::Faulted { message_id, .. }
            | ReceiveOutcome::AlreadyDelivered { message_id } => *message_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RetryOutcome {
    Executed(MessageId),
    AlreadyExecuted(MessageId),
}

// ============================================================================
// CHAIN STATE
// ============================================================================

#[derive(Debug, Clone)]
pub struct ChainState {
    pub ledger: Ledger,
    pub registry: ProtocolRegistry,
    pub messengers: BTreeMap<Address, Messenger>,
    pub apps: HashMap<Address, Application>,
    next_app_ordinal: u64,
}

/// Height and identity of the block an operation runs in.
#[derive(Debug, Clone, Copy)]
struct Block {
    chain_id: ChainId,
    height: u64,
}

pub struct Chain {
    name: String,
    network_id: u32,
    chain_id: ChainId,
    height: u64,
    app_allocator: AddressAllocator,
    state: ChainState,
}

impl Chain {
    /// Creates a chain with messenger version 1 registered.
    pub fn new(name: impl Into<String>, network_id: u32, chain_id: ChainId) -> Result<Self, IcmError> {
        if chain_id.is_zero() {
            return Err(IcmError::InvalidInput("chain id must be non-zero".to_string()));
        }
        let endpoint = crypto::messenger_address(1);
        let registry =
            ProtocolRegistry::with_initial_versions(crypto::registry_address(), chain_id, &[(1, endpoint)])?;
        let mut messengers = BTreeMap::new();
        messengers.insert(endpoint, Messenger::new(network_id, chain_id, endpoint));

        let name = name.into();
        info!("Chain created: name={}, chain_id={}, messenger={}", name, chain_id, endpoint);
        Ok(Self {
            name,
            network_id,
            chain_id,
            height: 0,
            app_allocator: AddressAllocator::applications(&chain_id),
            state: ChainState {
                ledger: Ledger::new(),
                registry,
                messengers,
                apps: HashMap::new(),
                next_app_ordinal: 0,
            },
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn network_id(&self) -> u32 {
        self.network_id
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn state(&self) -> &ChainState {
        &self.state
    }

    /// Runs `op` as one transaction: commit and advance the height on success,
    /// restore the previous state on error.
    fn transact<T>(
        &mut self,
        op: impl FnOnce(&mut ChainState, Block) -> Result<T, IcmError>,
    ) -> Result<T, IcmError> {
        let checkpoint = self.state.clone();
        let block = Block {
            chain_id: self.chain_id,
            height: self.height + 1,
        };
        match op(&mut self.state, block) {
            Ok(value) => {
                self.height = block.height;
                Ok(value)
            }
            Err(e) => {
                self.state = checkpoint;
                debug!("Transaction reverted on {}: {}", self.name, e);
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Deployment and setup
    // ------------------------------------------------------------------------

    /// Deploys an application at the next allocated address.
    pub fn deploy(&mut self, app: impl Into<Application>) -> Address {
        let address = self.app_allocator.address_at(self.state.next_app_ordinal);
        self.state.next_app_ordinal += 1;
        self.state.apps.insert(address, app.into());
        info!("Application deployed on {}: {}", self.name, address);
        address
    }

    /// Credits `amount` of `token` to `to` out of thin air (genesis allocation).
    pub fn mint(&mut self, token: Address, to: Address, amount: Amount) -> Result<(), IcmError> {
        self.transact(|state, _| state.ledger.mint(token, to, amount))
    }

    /// Deploys the next messenger version and registers it.
    pub fn upgrade_messenger(&mut self) -> Result<(u64, Address), IcmError> {
        let network_id = self.network_id;
        self.transact(|state, block| {
            let version = state
                .registry
                .latest_version()
                .checked_add(1)
                .ok_or(IcmError::ArithmeticOverflow)?;
            let endpoint = crypto::messenger_address(version);
            add_version(state, network_id, block.chain_id, version, endpoint)?;
            Ok((version, endpoint))
        })
    }

    /// Registers `endpoint` as `version`, deploying a messenger there if needed.
    pub fn add_protocol_version(&mut self, version: u64, endpoint: Address) -> Result<u64, IcmError> {
        let network_id = self.network_id;
        self.transact(|state, block| add_version(state, network_id, block.chain_id, version, endpoint))
    }

    /// Applies a registry update signed by this chain's own validators.
    pub fn apply_signed_registry_update(
        &mut self,
        verifier: &QuorumVerifier,
        signed: &SignedEnvelope,
    ) -> Result<u64, IcmError> {
        if signed.unsigned.source_chain_id != self.chain_id || signed.unsigned.network_id != self.network_id {
            return Err(IcmError::InvalidInput(
                "registry updates must be signed by this chain".to_string(),
            ));
        }
        verifier.verify_quorum(signed)?;
        let (source_address, payload) = ProtocolVersionPayload::unpack(&signed.unsigned)?;
        if source_address != self.state.registry.address() {
            return Err(IcmError::InvalidInput(format!(
                "registry update from {} is not addressed from the registry",
                source_address
            )));
        }
        self.add_protocol_version(payload.version, payload.endpoint)
    }

    // ------------------------------------------------------------------------
    // Messenger operations
    // ------------------------------------------------------------------------

    /// Sends a plain message from `sender` through the latest messenger.
    pub fn send_message(&mut self, sender: Address, input: MessageInput) -> Result<MessageId, IcmError> {
        self.transact(|state, block| {
            let endpoint = state.registry.latest_endpoint()?;
            let messenger = messenger_mut(&mut state.messengers, &endpoint)?;
            messenger.send(&mut state.ledger, sender, input, block.height)
        })
    }

    /// Verifies and delivers a relayed envelope.
    ///
    /// # Returns
    ///
    /// * `Ok(ReceiveOutcome)` - Delivered, delivered with failed execution, or already delivered
    /// * `Err(IcmError)` - Rejected or quorum failure; no state changed
    pub fn receive_message(
        &mut self,
        verifier: &QuorumVerifier,
        request: &DeliveryRequest,
    ) -> Result<ReceiveOutcome, IcmError> {
        let envelope = &request.signed.unsigned;
        if envelope.network_id != self.network_id {
            return Err(IcmError::MalformedEnvelope(format!(
                "network id {} does not match {}",
                envelope.network_id, self.network_id
            )));
        }
        verifier.verify_quorum(&request.signed)?;

        let (source_messenger, message) = codec::unpack_message(envelope)?;
        if message.destination_chain_id != self.chain_id {
            return Err(IcmError::InvalidDestination);
        }
        if !self.state.messengers.contains_key(&request.endpoint) {
            return Err(IcmError::UnknownEndpoint(request.endpoint));
        }
        if source_messenger != request.endpoint {
            return Err(IcmError::InvalidInput(format!(
                "envelope from messenger {} cannot be delivered to endpoint {}",
                source_messenger, request.endpoint
            )));
        }
        let endpoint_version = self.state.registry.version_of(&request.endpoint)?;
        if endpoint_version < message.min_destination_version {
            return Err(IcmError::VersionBelowMinimum {
                version: endpoint_version,
                minimum: message.min_destination_version,
            });
        }

        let required_gas = gas::receive_gas_limit(
            request.signed.signature.num_signers(),
            message.required_gas_limit,
            request.signed.to_bytes()?.len(),
            message.payload.len(),
            message.receipts.len(),
        )?;
        if request.gas_limit < required_gas {
            return Err(IcmError::InsufficientGas {
                supplied: request.gas_limit,
                required: required_gas,
            });
        }

        let source_chain_id = envelope.source_chain_id;
        let endpoint = request.endpoint;
        let relayer = request.relayer;
        let reward_address = request.relayer_reward_address;

        self.transact(|state, block| {
            let acceptance = messenger_mut(&mut state.messengers, &endpoint)?.accept(
                source_chain_id,
                &message,
                relayer,
                reward_address,
                block.height,
            )?;
            let message_id = match acceptance {
                Acceptance::Duplicate(message_id) => {
                    return Ok(ReceiveOutcome::AlreadyDelivered { message_id })
                }
                Acceptance::New(message_id) => message_id,
            };

            if message.is_receipt_only() {
                messenger_mut(&mut state.messengers, &endpoint)?.record_execution(
                    message_id,
                    ExecutionStatus::Skipped,
                    None,
                );
                return Ok(ReceiveOutcome::Delivered { message_id });
            }

            let delivered = state.clone();
            match execute_message(state, block, endpoint, source_chain_id, &message) {
                Ok(()) => {
                    messenger_mut(&mut state.messengers, &endpoint)?.record_execution(
                        message_id,
                        ExecutionStatus::Succeeded,
                        None,
                    );
                    Ok(ReceiveOutcome::Delivered { message_id })
                }
                Err(e) if e.is_fatal() => {
                    *state = delivered;
                    messenger_mut(&mut state.messengers, &endpoint)?.record_execution(
                        message_id,
                        ExecutionStatus::Faulted,
                        None,
                    );
                    error!(
                        "CONSISTENCY FAULT delivering {} from chain {} to {}: {}. Manual reconciliation required.",
                        message_id, source_chain_id, message.destination_address, e
                    );
                    Ok(ReceiveOutcome::Faulted {
                        message_id,
                        reason: e.to_string(),
                    })
                }
                Err(e) => {
                    *state = delivered;
                    messenger_mut(&mut state.messengers, &endpoint)?.record_execution(
                        message_id,
                        ExecutionStatus::Failed,
                        Some(message.hash()?),
                    );
                    warn!(
                        "Message execution failed: id={}, dst_addr={}, reason={}",
                        message_id, message.destination_address, e
                    );
                    Ok(ReceiveOutcome::ExecutionFailed {
                        message_id,
                        reason: e.to_string(),
                    })
                }
            }
        })
    }

    /// Re-executes a message whose callback failed earlier.
    pub fn retry_message_execution(
        &mut self,
        endpoint: Address,
        source_chain_id: ChainId,
        message: &Message,
    ) -> Result<RetryOutcome, IcmError> {
        self.transact(|state, block| {
            let check = messenger_mut(&mut state.messengers, &endpoint)?.prepare_retry(source_chain_id, message)?;
            let message_id = match check {
                RetryCheck::AlreadyExecuted(message_id) => return Ok(RetryOutcome::AlreadyExecuted(message_id)),
                RetryCheck::Execute(message_id) => message_id,
            };

            execute_message(state, block, endpoint, source_chain_id, message).map_err(|e| {
                if e.is_fatal() {
                    e
                } else {
                    IcmError::ExecutionReverted(e.to_string())
                }
            })?;
            messenger_mut(&mut state.messengers, &endpoint)?.complete_retry(message_id);
            Ok(RetryOutcome::Executed(message_id))
        })
    }

    /// Re-emits the envelope of a pending message.
    pub fn retry_send(&mut self, endpoint: Address, message: &Message) -> Result<MessageId, IcmError> {
        self.transact(|state, block| messenger_mut(&mut state.messengers, &endpoint)?.retry_send(message, block.height))
    }

    pub fn add_fee_amount(
        &mut self,
        endpoint: Address,
        sender: Address,
        message_id: MessageId,
        fee_token: Address,
        amount: Amount,
    ) -> Result<FeeInfo, IcmError> {
        self.transact(|state, _| {
            messenger_mut(&mut state.messengers, &endpoint)?.add_fee_amount(
                &mut state.ledger,
                sender,
                message_id,
                fee_token,
                amount,
            )
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn send_specified_receipts(
        &mut self,
        endpoint: Address,
        sender: Address,
        source_chain_id: ChainId,
        message_ids: &[MessageId],
        fee: FeeInfo,
        allowed_relayers: Vec<Address>,
    ) -> Result<MessageId, IcmError> {
        self.transact(|state, block| {
            messenger_mut(&mut state.messengers, &endpoint)?.send_specified_receipts(
                &mut state.ledger,
                sender,
                source_chain_id,
                message_ids,
                fee,
                allowed_relayers,
                block.height,
            )
        })
    }

    pub fn redeem_relayer_rewards(
        &mut self,
        endpoint: Address,
        relayer: Address,
        fee_token: Address,
    ) -> Result<Amount, IcmError> {
        self.transact(|state, _| {
            messenger_mut(&mut state.messengers, &endpoint)?.redeem_relayer_rewards(
                &mut state.ledger,
                relayer,
                fee_token,
            )
        })
    }

    // ------------------------------------------------------------------------
    // Token transfer operations
    // ------------------------------------------------------------------------

    pub fn send_tokens(
        &mut self,
        transferrer: Address,
        sender: Address,
        input: &SendTokensInput,
        amount: Amount,
    ) -> Result<MessageId, IcmError> {
        self.transact(|state, block| {
            with_transferrer(state, block, transferrer, |bridge, ctx| bridge.send(ctx, sender, input, amount))
        })
    }

    pub fn send_tokens_and_call(
        &mut self,
        transferrer: Address,
        sender: Address,
        input: &SendAndCallInput,
        amount: Amount,
    ) -> Result<MessageId, IcmError> {
        self.transact(|state, block| {
            with_transferrer(state, block, transferrer, |bridge, ctx| {
                bridge.send_and_call(ctx, sender, input, amount)
            })
        })
    }

    /// Returns `(taken, remaining)`; see [`TokenHome::add_collateral`].
    pub fn add_collateral(
        &mut self,
        home: Address,
        sender: Address,
        remote_chain_id: ChainId,
        remote_address: Address,
        amount: Amount,
    ) -> Result<(Amount, Amount), IcmError> {
        self.transact(|state, block| {
            with_transferrer(state, block, home, |bridge, ctx| {
                as_home_mut(bridge, ctx.self_address)?.add_collateral(
                    ctx,
                    sender,
                    remote_chain_id,
                    remote_address,
                    amount,
                )
            })
        })
    }

    pub fn register_with_home(
        &mut self,
        remote: Address,
        sender: Address,
        fee_token: Address,
        fee: Amount,
    ) -> Result<MessageId, IcmError> {
        self.transact(|state, block| {
            with_transferrer(state, block, remote, |bridge, ctx| {
                as_remote_mut(bridge, ctx.self_address)?.register_with_home(ctx, sender, fee_token, fee)
            })
        })
    }

    pub fn configure_multi_hop_route(
        &mut self,
        home: Address,
        a: (ChainId, Address),
        b: (ChainId, Address),
    ) -> Result<(), IcmError> {
        self.transact(|state, _| {
            let app = state.apps.get_mut(&home).ok_or(IcmError::UnknownApplication(home))?;
            app.as_transferrer_mut()
                .and_then(TokenTransferrer::as_home_mut)
                .ok_or(IcmError::UnknownApplication(home))?
                .configure_multi_hop_route(a, b)
        })
    }

    /// Raises the minimum messenger version an application accepts deliveries from.
    pub fn update_min_version(&mut self, app: Address, version: u64) -> Result<(), IcmError> {
        self.transact(|state, _| {
            let gate = state
                .apps
                .get_mut(&app)
                .and_then(Application::version_gate_mut)
                .ok_or(IcmError::UnknownApplication(app))?;
            gate.update_min_version(&state.registry, version)
        })
    }

    /// Stops an application from accepting deliveries through `endpoint`.
    pub fn pause_endpoint(&mut self, app: Address, endpoint: Address) -> Result<(), IcmError> {
        self.transact(|state, _| {
            let gate = state
                .apps
                .get_mut(&app)
                .and_then(Application::version_gate_mut)
                .ok_or(IcmError::UnknownApplication(app))?;
            gate.pause_endpoint(endpoint);
            Ok(())
        })
    }

    pub fn unpause_endpoint(&mut self, app: Address, endpoint: Address) -> Result<(), IcmError> {
        self.transact(|state, _| {
            let gate = state
                .apps
                .get_mut(&app)
                .and_then(Application::version_gate_mut)
                .ok_or(IcmError::UnknownApplication(app))?;
            gate.unpause_endpoint(&endpoint);
            Ok(())
        })
    }

    /// Mutable access to an application for owner-level administration
    /// (pausing receivers, blocking senders).
    pub fn app_mut(&mut self, address: &Address) -> Option<&mut Application> {
        self.state.apps.get_mut(address)
    }

    // ------------------------------------------------------------------------
    // Read models
    // ------------------------------------------------------------------------

    pub fn balance_of(&self, token: &Address, holder: &Address) -> Amount {
        self.state.ledger.balance_of(token, holder)
    }

    pub fn total_supply(&self, token: &Address) -> Amount {
        self.state.ledger.total_supply(token)
    }

    pub fn registry(&self) -> &ProtocolRegistry {
        &self.state.registry
    }

    pub fn messenger(&self, endpoint: &Address) -> Option<&Messenger> {
        self.state.messengers.get(endpoint)
    }

    pub fn messengers(&self) -> impl Iterator<Item = &Messenger> {
        self.state.messengers.values()
    }

    pub fn latest_messenger(&self) -> Result<&Messenger, IcmError> {
        let endpoint = self.state.registry.latest_endpoint()?;
        self.state
            .messengers
            .get(&endpoint)
            .ok_or(IcmError::UnknownEndpoint(endpoint))
    }

    pub fn app(&self, address: &Address) -> Option<&Application> {
        self.state.apps.get(address)
    }

    pub fn token_home(&self, address: &Address) -> Option<&TokenHome> {
        self.app(address)?.as_transferrer()?.as_home()
    }

    pub fn token_remote(&self, address: &Address) -> Option<&TokenRemote> {
        self.app(address)?.as_transferrer()?.as_remote()
    }

    /// Settings the home at `home` holds for a remote.
    pub fn settings(
        &self,
        home: &Address,
        remote_chain_id: ChainId,
        remote_address: Address,
    ) -> Option<RemoteTokenTransferrerSettings> {
        self.token_home(home)?.settings(remote_chain_id, remote_address)
    }

    /// Token moved by the transferrer at `address` on this chain.
    pub fn transferrer_token(&self, address: &Address) -> Option<Address> {
        Some(self.app(address)?.as_transferrer()?.token(*address))
    }
}

// ============================================================================
// EXECUTION HELPERS
// ============================================================================

fn messenger_mut<'a>(
    messengers: &'a mut BTreeMap<Address, Messenger>,
    endpoint: &Address,
) -> Result<&'a mut Messenger, IcmError> {
    messengers
        .get_mut(endpoint)
        .ok_or(IcmError::UnknownEndpoint(*endpoint))
}

fn add_version(
    state: &mut ChainState,
    network_id: u32,
    chain_id: ChainId,
    version: u64,
    endpoint: Address,
) -> Result<u64, IcmError> {
    let latest = state.registry.add_protocol_version(version, endpoint)?;
    state
        .messengers
        .entry(endpoint)
        .or_insert_with(|| Messenger::new(network_id, chain_id, endpoint));
    Ok(latest)
}

fn as_home_mut(bridge: &mut TokenTransferrer, address: Address) -> Result<&mut TokenHome, IcmError> {
    bridge.as_home_mut().ok_or(IcmError::UnknownApplication(address))
}

fn as_remote_mut(bridge: &mut TokenTransferrer, address: Address) -> Result<&mut TokenRemote, IcmError> {
    bridge.as_remote_mut().ok_or(IcmError::UnknownApplication(address))
}

/// Runs `op` on the transferrer at `address` with an execution context for it.
fn with_transferrer<T>(
    state: &mut ChainState,
    block: Block,
    address: Address,
    op: impl FnOnce(&mut TokenTransferrer, &mut ExecutionContext<'_>) -> Result<T, IcmError>,
) -> Result<T, IcmError> {
    let ChainState {
        ledger,
        registry,
        messengers,
        apps,
        ..
    } = state;
    let latest = registry.latest_endpoint()?;
    let messenger = messenger_mut(messengers, &latest)?;
    let transferrer = apps
        .get_mut(&address)
        .and_then(Application::as_transferrer_mut)
        .ok_or(IcmError::UnknownApplication(address))?;
    let mut ctx = ExecutionContext {
        chain_id: block.chain_id,
        self_address: address,
        height: block.height,
        delivered_by: None,
        ledger,
        messenger,
        registry,
    };
    op(transferrer, &mut ctx)
}

/// Invokes the destination application of `message` and any token call it returns.
fn execute_message(
    state: &mut ChainState,
    block: Block,
    delivered_by: Address,
    source_chain_id: ChainId,
    message: &Message,
) -> Result<(), IcmError> {
    let app_address = message.destination_address;
    let follow_up = {
        let ChainState {
            ledger,
            registry,
            messengers,
            apps,
            ..
        } = &mut *state;
        let latest = registry.latest_endpoint()?;
        let messenger = messenger_mut(messengers, &latest)?;
        let app = apps
            .get_mut(&app_address)
            .ok_or(IcmError::UnknownApplication(app_address))?;
        let mut ctx = ExecutionContext {
            chain_id: block.chain_id,
            self_address: app_address,
            height: block.height,
            delivered_by: Some(delivered_by),
            ledger,
            messenger,
            registry,
        };
        app.on_message(&mut ctx, source_chain_id, message.origin_sender, &message.payload)?
    };

    if let Some(call) = follow_up {
        execute_token_call(state, block, app_address, &call)?;
    }
    Ok(())
}

/// Hands tokens held by `bridge` to the call recipient, or to the fallback if the call fails.
fn execute_token_call(
    state: &mut ChainState,
    block: Block,
    bridge: Address,
    call: &TokenCall,
) -> Result<(), IcmError> {
    let checkpoint = state.clone();
    match deliver_token_call(state, block, bridge, call) {
        Ok(()) => {
            info!(
                "Token call succeeded: contract={}, amount={}",
                call.recipient_contract, call.amount
            );
            Ok(())
        }
        Err(e) => {
            *state = checkpoint;
            warn!(
                "Token call to {} failed ({}); sending {} to fallback {}",
                call.recipient_contract, e, call.amount, call.fallback_recipient
            );
            state
                .ledger
                .transfer(call.token, bridge, call.fallback_recipient, call.amount)
        }
    }
}

fn deliver_token_call(
    state: &mut ChainState,
    block: Block,
    bridge: Address,
    call: &TokenCall,
) -> Result<(), IcmError> {
    let ChainState {
        ledger,
        registry,
        messengers,
        apps,
        ..
    } = state;
    ledger.transfer(call.token, bridge, call.recipient_contract, call.amount)?;
    let latest = registry.latest_endpoint()?;
    let messenger = messenger_mut(messengers, &latest)?;
    let recipient = apps
        .get_mut(&call.recipient_contract)
        .ok_or(IcmError::UnknownApplication(call.recipient_contract))?;
    let mut ctx = ExecutionContext {
        chain_id: block.chain_id,
        self_address: call.recipient_contract,
        height: block.height,
        delivered_by: None,
        ledger,
        messenger,
        registry,
    };
    recipient.on_tokens_received(&mut ctx, call)
}

// ============================================================================
// TESTS
// ============================================================================

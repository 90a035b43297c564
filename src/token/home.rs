//! Token Home
//!
//! Custodies the canonical asset and keeps, for every registered remote, the
//! collateral it still needs and the home-denominated balance that backs the
//! remote's circulating supply. A remote can only be debited up to what was
//! sent to it (plus collateral); anything beyond that is a consistency fault.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use super::router::{MultiHopRouter, RemoteKey};
use super::scaling::{self, Direction};
use super::{send_transferrer_message, SendAndCallInput, SendTokensInput, TokenBridge, TokenCall, TransferrerMessage};
use crate::chain::ExecutionContext;
use crate::error::IcmError;
use crate::messenger::MessageInput;
use crate::primitives::{Address, Amount, ChainId, MessageId};
use crate::registry::VersionGate;

/// Read model of a registered remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RemoteTokenTransferrerSettings {
    /// Home-denominated collateral still missing; sends to the remote are refused while non-zero
    pub collateral_needed: Amount,
    pub token_multiplier: Amount,
    pub multiply_on_remote: bool,
}

/// Second leg of a multi-hop transfer, as requested by the origin remote.
struct SecondHop {
    origin: RemoteKey,
    destination: RemoteKey,
    /// Home units, secondary fee included
    amount: Amount,
    secondary_fee: Amount,
    gas_limit: u64,
    fallback: Address,
    delivery: SecondHopDelivery,
}

enum SecondHopDelivery {
    Send {
        recipient: Address,
    },
    Call {
        original_sender: Address,
        recipient_contract: Address,
        recipient_payload: Vec<u8>,
        recipient_gas_limit: u64,
        fallback_recipient: Address,
    },
}

#[derive(Debug, Clone)]
pub struct TokenHome {
    token: Address,
    token_decimals: u8,
    remotes: HashMap<RemoteKey, RemoteTokenTransferrerSettings>,
    /// Home units held on behalf of each remote
    transferred_balances: HashMap<RemoteKey, Amount>,
    router: MultiHopRouter,
    gate: VersionGate,
}

impl TokenHome {
    pub fn new(token: Address, token_decimals: u8) -> Self {
        Self {
            token,
            token_decimals,
            remotes: HashMap::new(),
            transferred_balances: HashMap::new(),
            router: MultiHopRouter::new(),
            gate: VersionGate::default(),
        }
    }

    pub fn token_decimals(&self) -> u8 {
        self.token_decimals
    }

    pub fn settings(&self, chain_id: ChainId, address: Address) -> Option<RemoteTokenTransferrerSettings> {
        self.remotes.get(&(chain_id, address)).copied()
    }

    pub fn transferred_balance(&self, chain_id: ChainId, address: Address) -> Amount {
        self.transferred_balances
            .get(&(chain_id, address))
            .copied()
            .unwrap_or(0)
    }

    pub fn router(&self) -> &MultiHopRouter {
        &self.router
    }

    pub fn version_gate(&self) -> &VersionGate {
        &self.gate
    }

    pub fn version_gate_mut(&mut self) -> &mut VersionGate {
        &mut self.gate
    }

    pub fn configure_multi_hop_route(&mut self, a: RemoteKey, b: RemoteKey) -> Result<(), IcmError> {
        self.router.configure_route(&self.remotes, a, b)
    }

    pub fn remove_multi_hop_route(&mut self, a: RemoteKey, b: RemoteKey) {
        self.router.remove_route(a, b);
    }

    /// Adds collateral for a remote registered with a non-zero reserve imbalance.
    ///
    /// Only `min(amount, collateral_needed)` is taken from `sender`; the rest
    /// stays with the sender.
    ///
    /// # Returns
    ///
    /// * `Ok((taken, remaining))` - Collateral taken and still needed afterwards
    /// * `Err(IcmError::UnknownRemote)` - Remote not registered
    /// * `Err(IcmError::AlreadyCollateralized)` - Nothing left to collateralize
    pub fn add_collateral(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        sender: Address,
        remote_chain_id: ChainId,
        remote_address: Address,
        amount: Amount,
    ) -> Result<(Amount, Amount), IcmError> {
        let key = (remote_chain_id, remote_address);
        let settings = self.remotes.get(&key).copied().ok_or(IcmError::UnknownRemote {
            chain_id: remote_chain_id,
            address: remote_address,
        })?;
        if settings.collateral_needed == 0 {
            return Err(IcmError::AlreadyCollateralized);
        }
        if amount == 0 {
            return Err(IcmError::InvalidInput("collateral amount must be non-zero".to_string()));
        }

        let taken = amount.min(settings.collateral_needed);
        let remaining = settings.collateral_needed - taken;
        ctx.ledger.transfer(self.token, sender, ctx.self_address, taken)?;
        self.credit_remote(&key, taken)?;
        if let Some(entry) = self.remotes.get_mut(&key) {
            entry.collateral_needed = remaining;
        }

        info!(
            "Collateral added: remote={}:{}, amount={}, excess_returned={}, remaining={}",
            remote_chain_id,
            remote_address,
            taken,
            amount - taken,
            remaining
        );
        Ok((taken, remaining))
    }

    // ------------------------------------------------------------------------
    // Internal bookkeeping
    // ------------------------------------------------------------------------

    fn register_remote(
        &mut self,
        key: RemoteKey,
        initial_reserve_imbalance: Amount,
        remote_token_decimals: u8,
        home_token_decimals: u8,
    ) -> Result<(), IcmError> {
        if home_token_decimals != self.token_decimals {
            return Err(IcmError::InvalidDecimals(format!(
                "remote expects {} home decimals, home has {}",
                home_token_decimals, self.token_decimals
            )));
        }
        if self.remotes.contains_key(&key) {
            return Err(IcmError::RemoteAlreadyRegistered {
                chain_id: key.0,
                address: key.1,
            });
        }

        let (token_multiplier, multiply_on_remote) =
            scaling::token_multiplier(self.token_decimals, remote_token_decimals)?;
        let collateral_needed = scaling::collateral_for_imbalance(
            initial_reserve_imbalance,
            token_multiplier,
            multiply_on_remote,
        )?;
        self.remotes.insert(
            key,
            RemoteTokenTransferrerSettings {
                collateral_needed,
                token_multiplier,
                multiply_on_remote,
            },
        );

        info!(
            "Remote registered: remote={}:{}, collateral_needed={}, multiplier={}, multiply_on_remote={}",
            key.0, key.1, collateral_needed, token_multiplier, multiply_on_remote
        );
        Ok(())
    }

    /// Settings of a remote that may receive supply-increasing transfers.
    fn ready_remote(&self, key: &RemoteKey) -> Result<RemoteTokenTransferrerSettings, IcmError> {
        let settings = self.remotes.get(key).copied().ok_or(IcmError::UnknownRemote {
            chain_id: key.0,
            address: key.1,
        })?;
        if settings.collateral_needed > 0 {
            return Err(IcmError::RemoteNotCollateralized {
                collateral_needed: settings.collateral_needed,
            });
        }
        Ok(settings)
    }

    fn credit_remote(&mut self, key: &RemoteKey, amount: Amount) -> Result<(), IcmError> {
        let balance = self.transferred_balances.entry(*key).or_insert(0);
        *balance = balance.checked_add(amount).ok_or(IcmError::ArithmeticOverflow)?;
        Ok(())
    }

    /// Converts a remote-denominated `amount` and debits it from the remote's balance.
    fn debit_remote(&mut self, key: &RemoteKey, amount: Amount) -> Result<Amount, IcmError> {
        let settings = self.remotes.get(key).copied().ok_or(IcmError::UnknownRemote {
            chain_id: key.0,
            address: key.1,
        })?;
        let home_amount = scaling::scale(
            amount,
            settings.token_multiplier,
            settings.multiply_on_remote,
            Direction::RemoteToHome,
        )?;

        let available = self.transferred_balance(key.0, key.1);
        if available < home_amount {
            error!(
                "CONSISTENCY FAULT: remote {}:{} tried to withdraw {} but only {} is held for it",
                key.0, key.1, home_amount, available
            );
            return Err(IcmError::InsufficientHomeBalance {
                required: home_amount,
                available,
            });
        }
        self.transferred_balances.insert(*key, available - home_amount);
        Ok(home_amount)
    }

    /// Pays out custodied tokens. A shortfall here means custody and bookkeeping diverged.
    fn release(&self, ctx: &mut ExecutionContext<'_>, recipient: Address, amount: Amount) -> Result<(), IcmError> {
        ctx.ledger
            .transfer(self.token, ctx.self_address, recipient, amount)
            .map_err(|e| match e {
                IcmError::InsufficientBalance {
                    available,
                    required,
                    ..
                } => {
                    error!(
                        "CONSISTENCY FAULT: home custody holds {} but {} must be released",
                        available, required
                    );
                    IcmError::InsufficientHomeBalance {
                        required,
                        available,
                    }
                }
                other => other,
            })
    }

    /// Pulls `amount` from `sender` for a send to `destination`. Returns the remote-denominated amount.
    fn prepare_send(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        sender: Address,
        destination: RemoteKey,
        amount: Amount,
        secondary_fee: Amount,
        multi_hop_fallback: Address,
    ) -> Result<Amount, IcmError> {
        if destination.0 == ctx.chain_id {
            return Err(IcmError::InvalidDestination);
        }
        if secondary_fee != 0 || !multi_hop_fallback.is_zero() {
            return Err(IcmError::InvalidInput(
                "secondary fee and multi-hop fallback only apply to sends from a remote".to_string(),
            ));
        }
        let settings = self.ready_remote(&destination)?;

        let (transferable, dust) = scaling::remove_dust(
            amount,
            settings.token_multiplier,
            settings.multiply_on_remote,
            Direction::HomeToRemote,
        )?;
        let scaled = scaling::scale(
            transferable,
            settings.token_multiplier,
            settings.multiply_on_remote,
            Direction::HomeToRemote,
        )?;
        if scaled == 0 {
            return Err(IcmError::ZeroScaledAmount { amount });
        }

        ctx.ledger.transfer(self.token, sender, ctx.self_address, transferable)?;
        self.credit_remote(&destination, transferable)?;
        debug!(
            "Home send prepared: remote={}:{}, amount={}, dust_kept={}, scaled={}",
            destination.0, destination.1, transferable, dust, scaled
        );
        Ok(scaled)
    }

    // ------------------------------------------------------------------------
    // Multi-hop
    // ------------------------------------------------------------------------

    fn forward_multi_hop(&mut self, ctx: &mut ExecutionContext<'_>, hop: SecondHop) -> Result<(), IcmError> {
        if hop.fallback.is_zero() {
            return Err(IcmError::InvalidInput("multi-hop fallback must be non-zero".to_string()));
        }

        let plan = match self.plan_second_hop(ctx, &hop) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(
                    "Multi-hop from {}:{} to {}:{} cannot proceed ({}); returning {} to fallback {}",
                    hop.origin.0, hop.origin.1, hop.destination.0, hop.destination.1, e, hop.amount, hop.fallback
                );
                return self.release(ctx, hop.fallback, hop.amount);
            }
        };
        let (transferable, dust, scaled) = plan;

        self.credit_remote(&hop.destination, transferable)?;
        if dust > 0 {
            self.release(ctx, hop.fallback, dust)?;
        }

        let message = match hop.delivery {
            SecondHopDelivery::Send { recipient } => TransferrerMessage::SingleHopSend {
                recipient,
                amount: scaled,
            },
            SecondHopDelivery::Call {
                original_sender,
                recipient_contract,
                recipient_payload,
                recipient_gas_limit,
                fallback_recipient,
            } => TransferrerMessage::SingleHopCall {
                source_blockchain_id: hop.origin.0,
                origin_transferrer: hop.origin.1,
                original_sender,
                recipient_contract,
                recipient_payload,
                recipient_gas_limit,
                fallback_recipient,
                amount: scaled,
            },
        };

        // The secondary fee is already custodied by the home and is escrowed from it directly.
        let input = MessageInput::new(hop.destination.0, hop.destination.1, message.encode()?)
            .with_fee(self.token, hop.secondary_fee)
            .with_gas_limit(hop.gas_limit);
        let message_id = ctx.send_message(input)?;

        info!(
            "Multi-hop forwarded: {}:{} -> {}:{}, amount={}, secondary_fee={}, id={}",
            hop.origin.0, hop.origin.1, hop.destination.0, hop.destination.1, scaled, hop.secondary_fee, message_id
        );
        Ok(())
    }

    /// Returns `(transferable, dust, scaled)` for the second hop, or why it cannot run.
    fn plan_second_hop(
        &self,
        ctx: &ExecutionContext<'_>,
        hop: &SecondHop,
    ) -> Result<(Amount, Amount, Amount), IcmError> {
        if hop.destination.0 == ctx.chain_id {
            return Err(IcmError::InvalidDestination);
        }
        if !self.router.route_allowed(&hop.origin, &hop.destination) {
            return Err(IcmError::InvalidInput(format!(
                "no multi-hop route from {}:{} to {}:{}",
                hop.origin.0, hop.origin.1, hop.destination.0, hop.destination.1
            )));
        }
        let settings = self.ready_remote(&hop.destination)?;
        if hop.secondary_fee >= hop.amount {
            return Err(IcmError::InvalidInput(format!(
                "secondary fee {} exceeds transferred amount {}",
                hop.secondary_fee, hop.amount
            )));
        }

        let net = hop.amount - hop.secondary_fee;
        let (transferable, dust) = scaling::remove_dust(
            net,
            settings.token_multiplier,
            settings.multiply_on_remote,
            Direction::HomeToRemote,
        )?;
        let scaled = scaling::scale(
            transferable,
            settings.token_multiplier,
            settings.multiply_on_remote,
            Direction::HomeToRemote,
        )?;
        if scaled == 0 {
            return Err(IcmError::ZeroScaledAmount { amount: net });
        }
        Ok((transferable, dust, scaled))
    }
}

// ============================================================================
// TOKEN BRIDGE
// ============================================================================

impl TokenBridge for TokenHome {
    fn token(&self, _self_address: Address) -> Address {
        self.token
    }

    fn send(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        sender: Address,
        input: &SendTokensInput,
        amount: Amount,
    ) -> Result<MessageId, IcmError> {
        if input.recipient.is_zero() {
            return Err(IcmError::InvalidInput("recipient must be non-zero".to_string()));
        }
        let destination = (input.destination_blockchain_id, input.destination_transferrer);
        let scaled = self.prepare_send(
            ctx,
            sender,
            destination,
            amount,
            input.secondary_fee,
            input.multi_hop_fallback,
        )?;

        let message = TransferrerMessage::SingleHopSend {
            recipient: input.recipient,
            amount: scaled,
        };
        let message_id = send_transferrer_message(
            ctx,
            sender,
            destination.0,
            destination.1,
            input.primary_fee_token,
            input.primary_fee,
            input.required_gas_limit,
            &message,
        )?;
        info!(
            "Tokens sent from home: to={}:{}, recipient={}, amount={}, id={}",
            destination.0, destination.1, input.recipient, scaled, message_id
        );
        Ok(message_id)
    }

    fn send_and_call(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        sender: Address,
        input: &SendAndCallInput,
        amount: Amount,
    ) -> Result<MessageId, IcmError> {
        input.validate()?;
        let destination = (input.destination_blockchain_id, input.destination_transferrer);
        let scaled = self.prepare_send(
            ctx,
            sender,
            destination,
            amount,
            input.secondary_fee,
            input.multi_hop_fallback,
        )?;

        let message = TransferrerMessage::SingleHopCall {
            source_blockchain_id: ctx.chain_id,
            origin_transferrer: ctx.self_address,
            original_sender: sender,
            recipient_contract: input.recipient_contract,
            recipient_payload: input.recipient_payload.clone(),
            recipient_gas_limit: input.recipient_gas_limit,
            fallback_recipient: input.fallback_recipient,
            amount: scaled,
        };
        let message_id = send_transferrer_message(
            ctx,
            sender,
            destination.0,
            destination.1,
            input.primary_fee_token,
            input.primary_fee,
            input.required_gas_limit,
            &message,
        )?;
        info!(
            "Tokens sent and called from home: to={}:{}, contract={}, amount={}, id={}",
            destination.0, destination.1, input.recipient_contract, scaled, message_id
        );
        Ok(message_id)
    }

    fn receive(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        source_chain_id: ChainId,
        origin_sender: Address,
        payload: &[u8],
    ) -> Result<Option<TokenCall>, IcmError> {
        ctx.check_endpoint(&self.gate)?;
        let origin = (source_chain_id, origin_sender);

        match TransferrerMessage::decode(payload)? {
            TransferrerMessage::RegisterRemote {
                initial_reserve_imbalance,
                remote_token_decimals,
                home_token_decimals,
            } => {
                self.register_remote(
                    origin,
                    initial_reserve_imbalance,
                    remote_token_decimals,
                    home_token_decimals,
                )?;
                Ok(None)
            }
            TransferrerMessage::SingleHopSend { recipient, amount } => {
                let home_amount = self.debit_remote(&origin, amount)?;
                self.release(ctx, recipient, home_amount)?;
                info!(
                    "Tokens withdrawn to home: from={}:{}, recipient={}, amount={}",
                    source_chain_id, origin_sender, recipient, home_amount
                );
                Ok(None)
            }
            TransferrerMessage::SingleHopCall {
                source_blockchain_id,
                origin_transferrer,
                original_sender,
                recipient_contract,
                recipient_payload,
                recipient_gas_limit,
                fallback_recipient,
                amount,
            } => {
                let home_amount = self.debit_remote(&origin, amount)?;
                Ok(Some(TokenCall {
                    token: self.token,
                    source_chain_id: source_blockchain_id,
                    origin_transferrer,
                    original_sender,
                    recipient_contract,
                    payload: recipient_payload,
                    gas_limit: recipient_gas_limit,
                    fallback_recipient,
                    amount: home_amount,
                }))
            }
            TransferrerMessage::MultiHopSend {
                destination_blockchain_id,
                destination_transferrer,
                recipient,
                amount,
                secondary_fee,
                secondary_gas_limit,
                multi_hop_fallback,
            } => {
                let home_amount = self.debit_remote(&origin, amount)?;
                self.forward_multi_hop(
                    ctx,
                    SecondHop {
                        origin,
                        destination: (destination_blockchain_id, destination_transferrer),
                        amount: home_amount,
                        secondary_fee,
                        gas_limit: secondary_gas_limit,
                        fallback: multi_hop_fallback,
                        delivery: SecondHopDelivery::Send { recipient },
                    },
                )?;
                Ok(None)
            }
            TransferrerMessage::MultiHopCall {
                original_sender,
                destination_blockchain_id,
                destination_transferrer,
                recipient_contract,
                recipient_payload,
                secondary_gas_limit,
                recipient_gas_limit,
                multi_hop_fallback,
                fallback_recipient,
                amount,
                secondary_fee,
            } => {
                let home_amount = self.debit_remote(&origin, amount)?;
                self.forward_multi_hop(
                    ctx,
                    SecondHop {
                        origin,
                        destination: (destination_blockchain_id, destination_transferrer),
                        amount: home_amount,
                        secondary_fee,
                        gas_limit: secondary_gas_limit,
                        fallback: multi_hop_fallback,
                        delivery: SecondHopDelivery::Call {
                            original_sender,
                            recipient_contract,
                            recipient_payload,
                            recipient_gas_limit,
                            fallback_recipient,
                        },
                    },
                )?;
                Ok(None)
            }
        }
    }
}

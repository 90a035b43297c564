//! Token Remote
//!
//! Mirror of a home token on another chain. Tokens are minted when the home
//! sends them and burned when they leave. The remote trusts the home's
//! collateral gate: the home never sends to a remote that still needs
//! collateral, so the first receive marks the remote collateralized.

use tracing::info;

use super::scaling::{self, Direction};
use super::{
    send_transferrer_message, SendAndCallInput, SendTokensInput, TokenBridge, TokenCall, TransferrerMessage,
    MULTI_HOP_CALL_REQUIRED_GAS, MULTI_HOP_SEND_REQUIRED_GAS, REGISTER_REMOTE_REQUIRED_GAS,
};
use crate::chain::ExecutionContext;
use crate::error::IcmError;
use crate::ledger::NATIVE_TOKEN;
use crate::primitives::{Address, Amount, ChainId, MessageId};
use crate::registry::VersionGate;

#[derive(Debug, Clone)]
pub struct TokenRemote {
    home_chain_id: ChainId,
    home_address: Address,
    home_token_decimals: u8,
    token_decimals: u8,
    /// Mints the chain's native asset instead of its own token
    native: bool,
    token_multiplier: Amount,
    multiply_on_remote: bool,
    /// Remote-denominated supply that existed before any home backing
    initial_reserve_imbalance: Amount,
    is_collateralized: bool,
    gate: VersionGate,
}

impl TokenRemote {
    pub fn new(
        home_chain_id: ChainId,
        home_address: Address,
        home_token_decimals: u8,
        token_decimals: u8,
        initial_reserve_imbalance: Amount,
        native: bool,
    ) -> Result<Self, IcmError> {
        if home_chain_id.is_zero() || home_address.is_zero() {
            return Err(IcmError::InvalidInput(
                "home chain id and home address must be non-zero".to_string(),
            ));
        }
        let (token_multiplier, multiply_on_remote) =
            scaling::token_multiplier(home_token_decimals, token_decimals)?;
        Ok(Self {
            home_chain_id,
            home_address,
            home_token_decimals,
            token_decimals,
            native,
            token_multiplier,
            multiply_on_remote,
            initial_reserve_imbalance,
            is_collateralized: initial_reserve_imbalance == 0,
            gate: VersionGate::default(),
        })
    }

    pub fn home(&self) -> (ChainId, Address) {
        (self.home_chain_id, self.home_address)
    }

    pub fn token_decimals(&self) -> u8 {
        self.token_decimals
    }

    pub fn token_multiplier(&self) -> (Amount, bool) {
        (self.token_multiplier, self.multiply_on_remote)
    }

    pub fn initial_reserve_imbalance(&self) -> Amount {
        self.initial_reserve_imbalance
    }

    pub fn is_collateralized(&self) -> bool {
        self.is_collateralized
    }

    pub fn version_gate_mut(&mut self) -> &mut VersionGate {
        &mut self.gate
    }

    /// Announces this remote to its home together with its unbacked supply.
    pub fn register_with_home(
        &mut self,
        ctx: &mut ExecutionContext<'_>,
        sender: Address,
        fee_token: Address,
        fee: Amount,
    ) -> Result<MessageId, IcmError> {
        let message = TransferrerMessage::RegisterRemote {
            initial_reserve_imbalance: self.initial_reserve_imbalance,
            remote_token_decimals: self.token_decimals,
            home_token_decimals: self.home_token_decimals,
        };
        let message_id = send_transferrer_message(
            ctx,
            sender,
            self.home_chain_id,
            self.home_address,
            fee_token,
            fee,
            REGISTER_REMOTE_REQUIRED_GAS,
            &message,
        )?;
        info!(
            "Registration sent to home {}:{}: imbalance={}, decimals={}, id={}",
            self.home_chain_id, self.home_address, self.initial_reserve_imbalance, self.token_decimals, message_id
        );
        Ok(message_id)
    }

    fn is_home(&self, chain_id: &ChainId, address: &Address) -> bool {
        *chain_id == self.home_chain_id && *address == self.home_address
    }

    /// Burns the transferable part of `amount` from `sender`; dust stays with the sender.
    fn burn_for_send(
        &self,
        ctx: &mut ExecutionContext<'_>,
        sender: Address,
        amount: Amount,
    ) -> Result<Amount, IcmError> {
        if !self.is_collateralized {
            return Err(IcmError::NotCollateralized);
        }
        let (transferable, _dust) = scaling::remove_dust(
            amount,
            self.token_multiplier,
            self.multiply_on_remote,
            Direction::RemoteToHome,
        )?;
        let home_amount = scaling::scale(
            transferable,
            self.token_multiplier,
            self.multiply_on_remote,
            Direction::RemoteToHome,
        )?;
        if home_amount == 0 {
            return Err(IcmError::ZeroScaledAmount { amount });
        }
        let token = self.token(ctx.self_address);
        ctx.ledger.burn(token, sender, transferable)?;
        Ok(transferable)
    }

    fn check_multi_hop(
        &self,
        ctx: &ExecutionContext<'_>,
        destination_chain_id: ChainId,
        multi_hop_fallback: Address,
    ) -> Result<(), IcmError> {
        if destination_chain_id.is_zero() || destination_chain_id == ctx.chain_id {
            return Err(IcmError::InvalidDestination);
        }
        if multi_hop_fallback.is_zero() {
            return Err(IcmError::InvalidInput(
                "multi-hop fallback must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl TokenBridge for TokenRemote {
    fn token(&self, self_address: Address) -> Address {
        if self.native {
            NATIVE_TOKEN
        } else {
            self_address
        }
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

        let single_hop = self.is_home(&input.destination_blockchain_id, &input.destination_transferrer);
        if single_hop && input.secondary_fee != 0 {
            return Err(IcmError::InvalidInput(
                "secondary fee only applies to multi-hop sends".to_string(),
            ));
        }
        if !single_hop {
            self.check_multi_hop(ctx, input.destination_blockchain_id, input.multi_hop_fallback)?;
        }

        let transferable = self.burn_for_send(ctx, sender, amount)?;
        let (message, gas_limit) = if single_hop {
            (
                TransferrerMessage::SingleHopSend {
                    recipient: input.recipient,
                    amount: transferable,
                },
                input.required_gas_limit,
            )
        } else {
            (
                TransferrerMessage::MultiHopSend {
                    destination_blockchain_id: input.destination_blockchain_id,
                    destination_transferrer: input.destination_transferrer,
                    recipient: input.recipient,
                    amount: transferable,
                    secondary_fee: input.secondary_fee,
                    secondary_gas_limit: input.required_gas_limit,
                    multi_hop_fallback: input.multi_hop_fallback,
                },
                MULTI_HOP_SEND_REQUIRED_GAS,
            )
        };

        let message_id = send_transferrer_message(
            ctx,
            sender,
            self.home_chain_id,
            self.home_address,
            input.primary_fee_token,
            input.primary_fee,
            gas_limit,
            &message,
        )?;
        info!(
            "Tokens burned for send: sender={}, amount={}, multi_hop={}, id={}",
            sender, transferable, !single_hop, message_id
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

        let single_hop = self.is_home(&input.destination_blockchain_id, &input.destination_transferrer);
        if single_hop && input.secondary_fee != 0 {
            return Err(IcmError::InvalidInput(
                "secondary fee only applies to multi-hop sends".to_string(),
            ));
        }
        if !single_hop {
            self.check_multi_hop(ctx, input.destination_blockchain_id, input.multi_hop_fallback)?;
        }

        let transferable = self.burn_for_send(ctx, sender, amount)?;
        let (message, gas_limit) = if single_hop {
            (
                TransferrerMessage::SingleHopCall {
                    source_blockchain_id: ctx.chain_id,
                    origin_transferrer: ctx.self_address,
                    original_sender: sender,
                    recipient_contract: input.recipient_contract,
                    recipient_payload: input.recipient_payload.clone(),
                    recipient_gas_limit: input.recipient_gas_limit,
                    fallback_recipient: input.fallback_recipient,
                    amount: transferable,
                },
                input.required_gas_limit,
            )
        } else {
            (
                TransferrerMessage::MultiHopCall {
                    original_sender: sender,
                    destination_blockchain_id: input.destination_blockchain_id,
                    destination_transferrer: input.destination_transferrer,
                    recipient_contract: input.recipient_contract,
                    recipient_payload: input.recipient_payload.clone(),
                    secondary_gas_limit: input.required_gas_limit,
                    recipient_gas_limit: input.recipient_gas_limit,
                    multi_hop_fallback: input.multi_hop_fallback,
                    fallback_recipient: input.fallback_recipient,
                    amount: transferable,
                    secondary_fee: input.secondary_fee,
                },
                MULTI_HOP_CALL_REQUIRED_GAS,
            )
        };

        let message_id = send_transferrer_message(
            ctx,
            sender,
            self.home_chain_id,
            self.home_address,
            input.primary_fee_token,
            input.primary_fee,
            gas_limit,
            &message,
        )?;
        info!(
            "Tokens burned for send-and-call: sender={}, contract={}, amount={}, id={}",
            sender, input.recipient_contract, transferable, message_id
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
        if !self.is_home(&source_chain_id, &origin_sender) {
            return Err(IcmError::UnauthorizedSender {
                chain_id: source_chain_id,
                address: origin_sender,
            });
        }

        let token = self.token(ctx.self_address);
        let follow_up = match TransferrerMessage::decode(payload)? {
            TransferrerMessage::SingleHopSend { recipient, amount } => {
                ctx.ledger.mint(token, recipient, amount)?;
                info!("Tokens minted: recipient={}, amount={}", recipient, amount);
                None
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
                ctx.ledger.mint(token, ctx.self_address, amount)?;
                Some(TokenCall {
                    token,
                    source_chain_id: source_blockchain_id,
                    origin_transferrer,
                    original_sender,
                    recipient_contract,
                    payload: recipient_payload,
                    gas_limit: recipient_gas_limit,
                    fallback_recipient,
                    amount,
                })
            }
            other => {
                return Err(IcmError::InvalidInput(format!(
                    "token remote cannot handle {:?}",
                    other
                )))
            }
        };

        if !self.is_collateralized {
            self.is_collateralized = true;
            info!("Token remote collateralized by first transfer from home");
        }
        Ok(follow_up)
    }
}

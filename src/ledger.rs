//! Per-chain token balances.
//!
//! Balances are keyed by `(token, holder)`. [`NATIVE_TOKEN`] (the zero address)
//! stands for the chain's native asset; any other token address is an
//! ERC20-style contract, including mirrored tokens whose contract is the
//! token remote itself.

use std::collections::HashMap;
use tracing::debug;

use crate::error::IcmError;
use crate::primitives::{Address, Amount};

/// Token address used for the chain's native asset.
pub const NATIVE_TOKEN: Address = Address::ZERO;

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    balances: HashMap<(Address, Address), Amount>,
    supplies: HashMap<Address, Amount>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, token: &Address, holder: &Address) -> Amount {
        self.balances.get(&(*token, *holder)).copied().unwrap_or(0)
    }

    pub fn total_supply(&self, token: &Address) -> Amount {
        self.supplies.get(token).copied().unwrap_or(0)
    }

    pub fn mint(&mut self, token: Address, to: Address, amount: Amount) -> Result<(), IcmError> {
        let supply = self
            .total_supply(&token)
            .checked_add(amount)
            .ok_or(IcmError::ArithmeticOverflow)?;
        let balance = self
            .balance_of(&token, &to)
            .checked_add(amount)
            .ok_or(IcmError::ArithmeticOverflow)?;
        self.supplies.insert(token, supply);
        self.balances.insert((token, to), balance);
        debug!("Minted {} of {} to {}", amount, token, to);
        Ok(())
    }

    pub fn burn(&mut self, token: Address, from: Address, amount: Amount) -> Result<(), IcmError> {
        let balance = self.debit_amount(&token, &from, amount)?;
        let supply = self
            .total_supply(&token)
            .checked_sub(amount)
            .ok_or(IcmError::ArithmeticOverflow)?;
        self.balances.insert((token, from), balance);
        self.supplies.insert(token, supply);
        debug!("Burned {} of {} from {}", amount, token, from);
        Ok(())
    }

    pub fn transfer(
        &mut self,
        token: Address,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), IcmError> {
        if amount == 0 || from == to {
            return Ok(());
        }
        let from_balance = self.debit_amount(&token, &from, amount)?;
        let to_balance = self
            .balance_of(&token, &to)
            .checked_add(amount)
            .ok_or(IcmError::ArithmeticOverflow)?;
        self.balances.insert((token, from), from_balance);
        self.balances.insert((token, to), to_balance);
        Ok(())
    }

    fn debit_amount(&self, token: &Address, holder: &Address, amount: Amount) -> Result<Amount, IcmError> {
        let available = self.balance_of(token, holder);
        available
            .checked_sub(amount)
            .ok_or(IcmError::InsufficientBalance {
                token: *token,
                holder: *holder,
                available,
                required: amount,
            })
    }
}

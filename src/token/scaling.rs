//! Decimal scaling between a home token and a remote mirror.
//!
//! Home and remote may use different decimals. Amounts are converted by a
//! power-of-ten `multiplier`; `multiply_on_remote` says which side holds the
//! larger numbers. Division truncates, and the truncated remainder ("dust")
//! stays with the sender: it is never sent and never minted.

use serde::Serialize;

use crate::error::IcmError;
use crate::primitives::Amount;

/// Largest decimal difference supported between home and remote.
pub const MAX_DECIMALS_DIFFERENCE: u8 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    HomeToRemote,
    RemoteToHome,
}

/// Returns `(multiplier, multiply_on_remote)` for the given decimals.
pub fn token_multiplier(home_decimals: u8, remote_decimals: u8) -> Result<(Amount, bool), IcmError> {
    let difference = home_decimals.abs_diff(remote_decimals);
    if difference > MAX_DECIMALS_DIFFERENCE {
        return Err(IcmError::InvalidDecimals(format!(
            "home {} and remote {} differ by more than {}",
            home_decimals, remote_decimals, MAX_DECIMALS_DIFFERENCE
        )));
    }
    let multiplier = 10u128
        .checked_pow(difference as u32)
        .ok_or(IcmError::ArithmeticOverflow)?;
    Ok((multiplier, remote_decimals > home_decimals))
}

/// Converts `amount` across `direction`. Multiplies when the direction points
/// at the side that holds larger numbers, divides (truncating) otherwise.
pub fn scale(
    amount: Amount,
    multiplier: Amount,
    multiply_on_remote: bool,
    direction: Direction,
) -> Result<Amount, IcmError> {
    if multiplier == 0 {
        return Err(IcmError::InvalidInput("token multiplier must be non-zero".to_string()));
    }
    if (direction == Direction::HomeToRemote) == multiply_on_remote {
        amount.checked_mul(multiplier).ok_or(IcmError::ArithmeticOverflow)
    } else {
        Ok(amount / multiplier)
    }
}

/// Largest amount `<= amount` that converts across `direction` without a remainder.
///
/// Returns `(transferable, dust)` with `transferable + dust == amount`.
pub fn remove_dust(
    amount: Amount,
    multiplier: Amount,
    multiply_on_remote: bool,
    direction: Direction,
) -> Result<(Amount, Amount), IcmError> {
    if multiplier == 0 {
        return Err(IcmError::InvalidInput("token multiplier must be non-zero".to_string()));
    }
    if (direction == Direction::HomeToRemote) == multiply_on_remote {
        return Ok((amount, 0));
    }
    let dust = amount % multiplier;
    Ok((amount - dust, dust))
}

/// Home-denominated collateral covering a remote-denominated `imbalance`, rounded up.
pub fn collateral_for_imbalance(
    imbalance: Amount,
    multiplier: Amount,
    multiply_on_remote: bool,
) -> Result<Amount, IcmError> {
    if multiplier == 0 {
        return Err(IcmError::InvalidInput("token multiplier must be non-zero".to_string()));
    }
    if multiply_on_remote {
        let whole = imbalance / multiplier;
        if imbalance % multiplier == 0 {
            Ok(whole)
        } else {
            whole.checked_add(1).ok_or(IcmError::ArithmeticOverflow)
        }
    } else {
        imbalance.checked_mul(multiplier).ok_or(IcmError::ArithmeticOverflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_multiplier() {
        assert_eq!(token_multiplier(6, 18).unwrap(), (10u128.pow(12), true));
        assert_eq!(token_multiplier(18, 6).unwrap(), (10u128.pow(12), false));
        assert_eq!(token_multiplier(9, 9).unwrap(), (1, false));
        assert!(token_multiplier(0, 19).is_err());
    }

    #[test]
    fn test_scale_inverse_keeps_or_drops_dust() {
        for difference in [0u32, 1, 6, 12, 18] {
            let multiplier = 10u128.pow(difference);
            for mor in [true, false] {
                let amounts = [
                    0,
                    1,
                    multiplier - 1,
                    multiplier,
                    multiplier + 1,
                    12_345,
                    u128::MAX / multiplier,
                    u128::MAX,
                ];
                for amount in amounts {
                    let there = match scale(amount, multiplier, mor, Direction::HomeToRemote) {
                        Ok(there) => there,
                        Err(e) => {
                            // Only the multiplying side can overflow, and only past MAX / multiplier.
                            assert!(mor && amount > u128::MAX / multiplier, "amount {}", amount);
                            assert_eq!(e, IcmError::ArithmeticOverflow);
                            continue;
                        }
                    };
                    let back = scale(there, multiplier, mor, Direction::RemoteToHome).unwrap();
                    let (transferable, dust) =
                        remove_dust(amount, multiplier, mor, Direction::HomeToRemote).unwrap();
                    assert_eq!(transferable + dust, amount);
                    assert_eq!(back, transferable, "amount {} multiplier {} mor {}", amount, multiplier, mor);
                    if mor || multiplier == 1 {
                        assert_eq!(back, amount);
                    }
                }
            }
        }
    }

    #[test]
    fn test_remove_dust() {
        assert_eq!(remove_dust(1_234, 100, false, Direction::HomeToRemote).unwrap(), (1_200, 34));
        assert_eq!(remove_dust(1_234, 100, true, Direction::HomeToRemote).unwrap(), (1_234, 0));
        assert_eq!(remove_dust(1_234, 100, true, Direction::RemoteToHome).unwrap(), (1_200, 34));
    }

    #[test]
    fn test_collateral_rounds_up() {
        assert_eq!(collateral_for_imbalance(1_000, 1, false).unwrap(), 1_000);
        assert_eq!(collateral_for_imbalance(1_001, 100, true).unwrap(), 11);
        assert_eq!(collateral_for_imbalance(1_000, 100, true).unwrap(), 10);
        assert_eq!(collateral_for_imbalance(7, 100, false).unwrap(), 700);
    }
}

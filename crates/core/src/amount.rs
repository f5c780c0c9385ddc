//! Amount - Non-negative decimal wrapper for token quantities
//!
//! All token quantities in Ballast (collateral, debt, reserves, fees) MUST be
//! non-negative. This is enforced at the type level. Results of arithmetic
//! that involves a price or a ratio are rounded to `AMOUNT_SCALE` decimal
//! places with an explicit direction, so replaying the same inputs always
//! yields the same amounts.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use thiserror::Error;

use crate::ratio::{Price, Ratio};

/// Number of decimal places kept on every stored amount
pub const AMOUNT_SCALE: u32 = 8;

/// Rejected numeric input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("Token amounts are never negative, got {0}")]
    NegativeAmount(Decimal),

    #[error("Price must be strictly positive: {0}")]
    NonPositivePrice(Decimal),

    #[error("Ratio cannot be negative: {0}")]
    NegativeRatio(Decimal),
}

/// Quantity of one token: collateral units, debt tokens, stable units or
/// their USD value.
///
/// ```
/// use ballast_core::{Amount, Ratio};
/// use rust_decimal_macros::dec;
///
/// let fee = Amount::new(dec!(50)).unwrap().mul_ratio_up(Ratio::new(dec!(0.005)).unwrap());
/// assert_eq!(fee.value(), dec!(0.25));
/// assert!(Amount::new(dec!(-1)).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(AmountError::NegativeAmount(value));
        }
        Ok(Self(value))
    }

    /// For values already known to be non-negative (products and quotients
    /// of amounts, prices and ratios)
    #[inline]
    pub const fn new_unchecked(value: Decimal) -> Self {
        Self(value)
    }

    /// Whole units, handy for configuration constants and fixtures
    pub fn from_units(units: u64) -> Self {
        Self(Decimal::from(units))
    }

    #[inline]
    pub const fn value(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// `self - other`, or None if `other` is larger
    pub fn checked_sub(&self, other: &Amount) -> Option<Amount> {
        (self.0 >= other.0).then(|| Amount(self.0 - other.0))
    }

    /// Subtraction floored at zero
    pub fn saturating_sub(&self, other: &Amount) -> Amount {
        self.checked_sub(other).unwrap_or(Amount::ZERO)
    }

    /// Round toward zero at `AMOUNT_SCALE` decimals
    pub fn round_down(&self) -> Amount {
        Amount(self.0.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::ToZero))
    }

    /// Round away from zero at `AMOUNT_SCALE` decimals
    pub fn round_up(&self) -> Amount {
        Amount(self.0.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::AwayFromZero))
    }

    /// `self × ratio`, rounded down
    pub fn mul_ratio(&self, ratio: Ratio) -> Amount {
        Amount(self.0 * ratio.value()).round_down()
    }

    /// `self × ratio`, rounded up (amounts owed to the protocol)
    pub fn mul_ratio_up(&self, ratio: Ratio) -> Amount {
        Amount(self.0 * ratio.value()).round_up()
    }

    /// USD value of `self` units priced at `price`, rounded down
    pub fn value_at(&self, price: Price) -> Amount {
        Amount(self.0 * price.value()).round_down()
    }

    /// Number of units worth `self` USD at `price`, rounded down
    pub fn units_at(&self, price: Price) -> Amount {
        Amount(self.0 / price.value()).round_down()
    }

    /// `self / other` as a ratio. Returns None when `other` is zero.
    pub fn ratio_to(&self, other: Amount) -> Option<Ratio> {
        if other.is_zero() {
            None
        } else {
            Some(Ratio::new_unchecked(self.0 / other.0))
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl Default for Amount {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Amount) {
        self.0 += rhs.0;
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, |acc, a| acc + a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_negative_rejected_negative_zero_allowed() {
        assert!(matches!(
            Amount::new(dec!(-0.00000001)),
            Err(AmountError::NegativeAmount(_))
        ));
        assert_eq!(Amount::new(-Decimal::ZERO).unwrap(), Amount::ZERO);
    }

    #[test]
    fn test_debt_reduction_never_goes_negative() {
        let debt = Amount::from_units(50);
        let repay = Amount::from_units(100);
        assert!(debt.checked_sub(&repay).is_none());
        assert_eq!(debt.saturating_sub(&repay), Amount::ZERO);
        assert_eq!(repay.checked_sub(&debt), Some(debt));
    }

    #[test]
    fn test_rounding_directions() {
        let third = Amount::new(dec!(1) / dec!(3)).unwrap();
        assert_eq!(third.round_down().value(), dec!(0.33333333));
        assert_eq!(third.round_up().value(), dec!(0.33333334));
    }

    #[test]
    fn test_collateral_value_and_units() {
        let price = Price::new(dec!(7)).unwrap();
        assert_eq!(Amount::from_units(10).value_at(price), Amount::from_units(70));
        assert_eq!(Amount::from_units(77).units_at(price), Amount::from_units(11));
        assert_eq!(
            Amount::from_units(10).units_at(Price::new(dec!(3)).unwrap()).value(),
            dec!(3.33333333)
        );
    }

    #[test]
    fn test_ratio_to_zero_debt_is_none() {
        assert!(Amount::from_units(5).ratio_to(Amount::ZERO).is_none());
        assert_eq!(
            Amount::from_units(150).ratio_to(Amount::from_units(100)),
            Some(Ratio::new(dec!(1.5)).unwrap())
        );
    }

    #[test]
    fn test_json_is_a_string_and_rejects_negative() {
        let amount = Amount::new(dec!(123.45)).unwrap();
        assert_eq!(serde_json::to_string(&amount).unwrap(), "\"123.45\"");
        assert!(serde_json::from_str::<Amount>("\"-1\"").is_err());
    }

    #[test]
    fn test_sum() {
        let total: Amount = [dec!(0.1), dec!(0.2), dec!(0.3)]
            .into_iter()
            .map(|v| Amount::new(v).unwrap())
            .sum();
        assert_eq!(total.value(), dec!(0.6));
    }
}

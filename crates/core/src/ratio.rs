//! Ratio and Price - dimensionless multipliers and USD prices

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Sub};

use crate::amount::{Amount, AmountError};

/// A non-negative dimensionless number: collateral ratios, fee rates,
/// rate-curve multipliers.
///
/// A collateral ratio with zero debt is infinite; `Ratio::INFINITE` is the
/// largest representable value so ordering still works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Ratio(Decimal);

impl Ratio {
    pub const ZERO: Self = Self(Decimal::ZERO);
    pub const ONE: Self = Self(Decimal::ONE);
    pub const INFINITE: Self = Self(Decimal::MAX);

    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value < Decimal::ZERO {
            Err(AmountError::NegativeRatio(value))
        } else {
            Ok(Self(value))
        }
    }

    #[inline]
    pub const fn new_unchecked(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_infinite(&self) -> bool {
        self.0 == Decimal::MAX
    }

    /// Collateral ratio of `collateral_value` USD against `debt`.
    /// Infinite when debt is zero.
    pub fn collateral(collateral_value: Amount, debt: Amount) -> Ratio {
        collateral_value.ratio_to(debt).unwrap_or(Ratio::INFINITE)
    }

    /// `self^n` for whole `n`
    pub fn powu(&self, n: u64) -> Ratio {
        let mut result = Decimal::ONE;
        let mut base = self.0;
        let mut exp = n;
        while exp > 0 {
            if exp & 1 == 1 {
                result *= base;
            }
            exp >>= 1;
            if exp > 0 {
                base *= base;
            }
        }
        Ratio(result)
    }

    /// Subtraction floored at zero
    pub fn saturating_sub(&self, other: Ratio) -> Ratio {
        if other.0 >= self.0 {
            Ratio::ZERO
        } else {
            Ratio(self.0 - other.0)
        }
    }

    pub fn clamp_between(self, floor: Ratio, ceiling: Ratio) -> Ratio {
        self.max(floor).min(ceiling)
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            write!(f, "inf")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl TryFrom<Decimal> for Ratio {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Ratio> for Decimal {
    fn from(ratio: Ratio) -> Self {
        ratio.0
    }
}

impl Default for Ratio {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Add for Ratio {
    type Output = Ratio;

    fn add(self, rhs: Ratio) -> Ratio {
        Ratio(self.0 + rhs.0)
    }
}

impl Sub for Ratio {
    type Output = Ratio;

    /// Floors at zero; use `saturating_sub` when that needs to be explicit.
    fn sub(self, rhs: Ratio) -> Ratio {
        self.saturating_sub(rhs)
    }
}

impl Mul for Ratio {
    type Output = Ratio;

    fn mul(self, rhs: Ratio) -> Ratio {
        Ratio(self.0 * rhs.0)
    }
}

/// USD price of one unit of an asset. Always strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Price(Decimal);

impl Price {
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value <= Decimal::ZERO {
            Err(AmountError::NonPositivePrice(value))
        } else {
            Ok(Self(value))
        }
    }

    #[inline]
    pub const fn value(&self) -> Decimal {
        self.0
    }

    /// Distance from 1.0 as a ratio, used for stable-unit parity checks
    pub fn deviation_from_parity(&self) -> Ratio {
        Ratio::new_unchecked((self.0 - Decimal::ONE).abs())
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<Decimal> for Price {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Price> for Decimal {
    fn from(price: Price) -> Self {
        price.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_zero_debt_is_infinite() {
        let ratio = Ratio::collateral(Amount::from_units(10), Amount::ZERO);
        assert!(ratio.is_infinite());
        assert_eq!(ratio.to_string(), "inf");
    }

    #[test]
    fn test_collateral_ratio() {
        let ratio = Ratio::collateral(Amount::from_units(100), Amount::from_units(70));
        assert!(ratio > Ratio::new(dec!(1.42)).unwrap());
        assert!(ratio < Ratio::new(dec!(1.43)).unwrap());
    }

    #[test]
    fn test_powu() {
        let decay = Ratio::new(dec!(0.94)).unwrap();
        assert_eq!(decay.powu(0), Ratio::ONE);
        assert_eq!(decay.powu(1), decay);
        assert_eq!(decay.powu(2).value(), dec!(0.8836));
    }

    #[test]
    fn test_price_rejects_zero() {
        assert!(Price::new(Decimal::ZERO).is_err());
        assert!(Price::new(dec!(-1)).is_err());
    }

    #[test]
    fn test_parity_deviation() {
        let price = Price::new(dec!(0.97)).unwrap();
        assert_eq!(price.deviation_from_parity().value(), dec!(0.03));
    }
}

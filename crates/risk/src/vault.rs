//! Vault record

use ballast_core::{Amount, AssetCode, Price, Principal, Ratio, VaultId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    pub id: VaultId,
    pub owner: Principal,
    pub asset: AssetCode,
    pub collateral: Amount,
    pub debt: Amount,
    pub created_at: DateTime<Utc>,
    /// Interest has been charged up to this instant
    pub last_accrual: DateTime<Utc>,
}

impl Vault {
    /// USD value of the collateral, rounded down
    pub fn collateral_value(&self, price: Price) -> Amount {
        self.collateral.value_at(price)
    }

    /// Collateral ratio at `price`; infinite when there is no debt
    pub fn ratio_at(&self, price: Price) -> Ratio {
        if self.debt.is_zero() {
            return Ratio::INFINITE;
        }
        Ratio::new_unchecked(self.collateral.value() * price.value() / self.debt.value())
    }

    pub fn is_empty(&self) -> bool {
        self.collateral.is_zero() && self.debt.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ratio() {
        let vault = Vault {
            id: 1,
            owner: Principal::new("alice").unwrap(),
            asset: "ETH".parse().unwrap(),
            collateral: Amount::from_units(10),
            debt: Amount::from_units(70),
            created_at: Utc::now(),
            last_accrual: Utc::now(),
        };
        let price = Price::new(dec!(10)).unwrap();
        assert_eq!(vault.collateral_value(price), Amount::from_units(100));
        assert!(vault.ratio_at(price) > Ratio::new(dec!(1.428)).unwrap());

        let debt_free = Vault {
            debt: Amount::ZERO,
            ..vault
        };
        assert!(debt_free.ratio_at(price).is_infinite());
        assert!(!debt_free.is_empty());
    }
}

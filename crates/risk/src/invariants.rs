//! Consistency checks over protocol state

use ballast_core::Amount;
use std::collections::BTreeMap;

use crate::error::ProtocolError;
use crate::state::{AssetTotals, ProtocolState};

impl ProtocolState {
    /// Every broken invariant, described. Empty when the state is sound.
    pub fn invariant_violations(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut totals: BTreeMap<_, AssetTotals> = BTreeMap::new();

        for (id, vault) in &self.vaults {
            if vault.id != *id {
                problems.push(format!("vault keyed {} claims id {}", id, vault.id));
            }
            if vault.is_empty() {
                problems.push(format!("vault {} is empty", id));
            }
            if *id >= self.next_vault_id {
                problems.push(format!("vault {} not below next id {}", id, self.next_vault_id));
            }
            if !self.assets.contains_key(&vault.asset) {
                problems.push(format!("vault {} holds unconfigured {}", id, vault.asset));
            }
            let indexed = self
                .owner_index
                .get(&vault.owner)
                .is_some_and(|ids| ids.contains(id));
            if !indexed {
                problems.push(format!("vault {} missing from index of {}", id, vault.owner));
            }

            let entry = totals.entry(vault.asset.clone()).or_default();
            entry.collateral += vault.collateral;
            entry.debt += vault.debt;
        }

        for (owner, ids) in &self.owner_index {
            if ids.is_empty() {
                problems.push(format!("empty index entry for {}", owner));
            }
            for id in ids {
                match self.vaults.get(id) {
                    Some(vault) if vault.owner == *owner => {}
                    Some(vault) => problems.push(format!(
                        "index of {} lists vault {} owned by {}",
                        owner, id, vault.owner
                    )),
                    None => problems.push(format!("index of {} lists missing vault {}", owner, id)),
                }
            }
        }

        for (asset, recorded) in &self.totals {
            let actual = totals.remove(asset).unwrap_or_default();
            if *recorded != actual {
                problems.push(format!(
                    "{} totals {}/{} but vaults hold {}/{}",
                    asset, recorded.collateral, recorded.debt, actual.collateral, actual.debt
                ));
            }
        }
        for (asset, actual) in totals {
            if actual.collateral != Amount::ZERO || actual.debt != Amount::ZERO {
                problems.push(format!("{} has vaults but no totals", asset));
            }
        }

        for id in self.pending_payouts.keys() {
            if *id >= self.next_payout_id {
                problems.push(format!("payout {} not below next id {}", id, self.next_payout_id));
            }
        }

        problems
    }

    pub fn check_invariants(&self) -> Result<(), ProtocolError> {
        let problems = self.invariant_violations();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::InvariantViolation(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{amount, asset, principal, Harness};
    use rust_decimal_macros::dec;

    #[test]
    fn test_sound_state_passes() {
        let mut h = Harness::new();
        h.configure(&asset("ETH"), dec!(10));
        h.open("alice", &asset("ETH"), dec!(10), Some(dec!(20)));
        h.open("bob", &asset("ETH"), dec!(3), None);
        assert!(h.state.check_invariants().is_ok());
    }

    #[test]
    fn test_detects_index_and_totals_drift() {
        let mut h = Harness::new();
        h.configure(&asset("ETH"), dec!(10));
        let id = h.open("alice", &asset("ETH"), dec!(10), None);

        h.state.owner_index.remove(&principal("alice"));
        h.state.vaults.get_mut(&id).unwrap().collateral = amount(dec!(11));

        let problems = h.state.invariant_violations();
        assert_eq!(problems.len(), 2, "{:?}", problems);
        assert!(h.state.check_invariants().is_err());
    }

    #[test]
    fn test_detects_empty_vault() {
        let mut h = Harness::new();
        h.configure(&asset("ETH"), dec!(10));
        let id = h.open("alice", &asset("ETH"), dec!(10), None);
        h.state.vaults.get_mut(&id).unwrap().collateral = ballast_core::Amount::ZERO;
        h.state.totals.clear();

        let problems = h.state.invariant_violations();
        assert!(problems.iter().any(|p| p.contains("is empty")));
    }
}

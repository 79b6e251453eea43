use crate::error::PoolError;
use crate::types::AccountId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fungible proportional-ownership ledger owned by a single pool.
///
/// `sum(balances) == total_supply` holds after every call; failing calls leave the ledger
/// untouched. Zero balances are pruned so the map only lists live holders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareLedger {
    balances: BTreeMap<AccountId, u64>,
    supply: u64,
}

impl ShareLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint(&mut self, holder: &AccountId, amount: u64) -> Result<(), PoolError> {
        if holder.is_null() {
            return Err(PoolError::validation("cannot mint shares to the null identity"));
        }
        let supply = self
            .supply
            .checked_add(amount)
            .ok_or(PoolError::Overflow("share supply"))?;
        let balance = self
            .balance_of(holder)
            .checked_add(amount)
            .ok_or(PoolError::Overflow("share balance"))?;

        self.supply = supply;
        if balance > 0 {
            self.balances.insert(holder.clone(), balance);
        }
        Ok(())
    }

    pub fn burn(&mut self, holder: &AccountId, amount: u64) -> Result<(), PoolError> {
        let balance = self.balance_of(holder);
        if balance < amount {
            return Err(PoolError::InsufficientBalance {
                holder: holder.to_string(),
                required: amount,
                available: balance,
            });
        }
        let remaining = balance - amount;
        self.supply = self
            .supply
            .checked_sub(amount)
            .ok_or_else(|| PoolError::InvariantViolation("share supply below balance".into()))?;
        if remaining == 0 {
            self.balances.remove(holder);
        } else {
            self.balances.insert(holder.clone(), remaining);
        }
        Ok(())
    }

    pub fn balance_of(&self, holder: &AccountId) -> u64 {
        self.balances.get(holder).copied().unwrap_or(0)
    }

    pub fn total_supply(&self) -> u64 {
        self.supply
    }

    /// Recompute the conservation invariant from scratch.
    pub fn is_conserved(&self) -> bool {
        let sum: u128 = self.balances.values().map(|b| *b as u128).sum();
        sum == self.supply as u128
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_and_burn_conserve_supply() {
        let mut ledger = ShareLedger::new();
        let alice = AccountId::new("alice");
        let bob = AccountId::new("bob");

        ledger.mint(&alice, 700).unwrap();
        ledger.mint(&bob, 300).unwrap();
        ledger.burn(&alice, 200).unwrap();

        assert_eq!(ledger.total_supply(), 800);
        assert_eq!(ledger.balance_of(&alice), 500);
        assert!(ledger.is_conserved());
    }

    #[test]
    fn mint_rejects_null_identity() {
        let mut ledger = ShareLedger::new();
        let err = ledger.mint(&AccountId::new(""), 10).unwrap_err();
        assert!(matches!(err, PoolError::Validation(_)));
        assert_eq!(ledger.total_supply(), 0);
    }

    #[test]
    fn burn_beyond_balance_fails_without_mutation() {
        let mut ledger = ShareLedger::new();
        let alice = AccountId::new("alice");
        ledger.mint(&alice, 50).unwrap();

        let err = ledger.burn(&alice, 51).unwrap_err();
        assert!(matches!(
            err,
            PoolError::InsufficientBalance {
                required: 51,
                available: 50,
                ..
            }
        ));
        assert_eq!(ledger.balance_of(&alice), 50);
        assert_eq!(ledger.total_supply(), 50);
    }

    #[test]
    fn full_burn_prunes_holder() {
        let mut ledger = ShareLedger::new();
        let alice = AccountId::new("alice");
        ledger.mint(&alice, 5).unwrap();
        ledger.burn(&alice, 5).unwrap();
        assert_eq!(ledger, ShareLedger::new());
        assert!(ledger.is_conserved());
    }
}

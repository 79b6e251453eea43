use crate::error::PoolError;
use crate::types::{AccountId, PoolId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Owner of custody value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Holder {
    Account(AccountId),
    Pool(PoolId),
}

impl fmt::Display for Holder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account(account) => write!(f, "{}", account),
            Self::Pool(pool) => write!(f, "{}", pool),
        }
    }
}

/// Shared value-custody token every pool is bound to.
///
/// All value moves between users, merchants and pools go through `transfer`, so the total
/// supply only changes on administrator funding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyToken {
    accounts: BTreeMap<AccountId, u64>,
    pools: BTreeMap<PoolId, u64>,
    total_supply: u64,
}

impl CustodyToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, holder: &Holder) -> u64 {
        match holder {
            Holder::Account(account) => self.accounts.get(account).copied().unwrap_or(0),
            Holder::Pool(pool) => self.pools.get(pool).copied().unwrap_or(0),
        }
    }

    pub fn total_supply(&self) -> u64 {
        self.total_supply
    }

    pub fn mint(&mut self, to: &Holder, amount: u64) -> Result<(), PoolError> {
        if let Holder::Account(account) = to {
            if account.is_null() {
                return Err(PoolError::validation("cannot fund the null identity"));
            }
        }
        let total_supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(PoolError::Overflow("custody supply"))?;
        let balance = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(PoolError::Overflow("custody balance"))?;
        self.total_supply = total_supply;
        self.set_balance(to, balance);
        Ok(())
    }

    /// Move value between holders. Fails closed: no balance changes on error.
    pub fn transfer(&mut self, from: &Holder, to: &Holder, amount: u64) -> Result<(), PoolError> {
        if let Holder::Account(account) = to {
            if account.is_null() {
                return Err(PoolError::validation("cannot transfer to the null identity"));
            }
        }
        let available = self.balance_of(from);
        if available < amount {
            return Err(PoolError::InsufficientBalance {
                holder: from.to_string(),
                required: amount,
                available,
            });
        }
        if from == to || amount == 0 {
            return Ok(());
        }
        let credited = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(PoolError::Overflow("custody balance"))?;
        self.set_balance(from, available - amount);
        self.set_balance(to, credited);
        Ok(())
    }

    fn set_balance(&mut self, holder: &Holder, balance: u64) {
        match holder {
            Holder::Account(account) => {
                if balance == 0 {
                    self.accounts.remove(account);
                } else {
                    self.accounts.insert(account.clone(), balance);
                }
            }
            Holder::Pool(pool) => {
                if balance == 0 {
                    self.pools.remove(pool);
                } else {
                    self.pools.insert(*pool, balance);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str) -> Holder {
        Holder::Account(AccountId::new(id))
    }

    #[test]
    fn transfer_moves_value_without_changing_supply() {
        let mut token = CustodyToken::new();
        token.mint(&account("alice"), 1_000).unwrap();
        token
            .transfer(&account("alice"), &Holder::Pool(PoolId(0)), 400)
            .unwrap();

        assert_eq!(token.balance_of(&account("alice")), 600);
        assert_eq!(token.balance_of(&Holder::Pool(PoolId(0))), 400);
        assert_eq!(token.total_supply(), 1_000);
    }

    #[test]
    fn overdraft_is_rejected() {
        let mut token = CustodyToken::new();
        token.mint(&account("alice"), 10).unwrap();
        let err = token
            .transfer(&account("alice"), &account("bob"), 11)
            .unwrap_err();
        assert!(matches!(err, PoolError::InsufficientBalance { .. }));
        assert_eq!(token.balance_of(&account("alice")), 10);
        assert_eq!(token.balance_of(&account("bob")), 0);
    }

    #[test]
    fn null_recipient_is_rejected() {
        let mut token = CustodyToken::new();
        token.mint(&account("alice"), 10).unwrap();
        assert!(token.transfer(&account("alice"), &account(""), 1).is_err());
        assert!(token.mint(&account(""), 1).is_err());
    }
}

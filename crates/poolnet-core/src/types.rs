use crate::math::collateral_for;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable pool identifier: the pool's slot in the engine arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolId(pub u32);

impl PoolId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool-{}", self.0)
    }
}

/// Account identity for users, merchants and the administrator.
///
/// The empty string is the null identity and is rejected wherever value or shares are credited.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    Active,
    Paused,
    Inactive,
}

impl PoolStatus {
    pub fn name(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A user's deposit record in one pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stake {
    pub staked_amount: u64,
    pub collateral_amount: u64,
    pub shares_minted: u64,
    pub last_stake_at: Option<DateTime<Utc>>,
}

impl Stake {
    /// Set the staked amount and recompute collateral from it.
    pub fn set_staked(&mut self, staked_amount: u64) {
        self.staked_amount = staked_amount;
        self.collateral_amount = collateral_for(staked_amount);
    }
}

/// Peer pool that contributed value to a fallback payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtSource {
    pub pool: PoolId,
    /// Encumbrance still held in the source pool for this debt.
    pub outstanding: u64,
}

/// Obligation created by a fallback payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Debt {
    pub merchant: AccountId,
    pub amount: u64,
    pub original_amount: u64,
    pub created_at: DateTime<Utc>,
    pub is_repaid: bool,
    #[serde(default)]
    pub sources: Vec<DebtSource>,
    /// Part of the payment that was never debited from the stake. Repaid first, without
    /// re-crediting the stake.
    #[serde(default)]
    pub unbacked: u64,
}

impl Debt {
    pub fn is_active(&self) -> bool {
        !self.is_repaid
    }
}

/// Read-only view of a pool for the query surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub id: PoolId,
    pub region: String,
    pub status: PoolStatus,
    pub total_liquidity: u64,
    pub total_debt: u64,
    pub rewards_pot: u64,
    pub apy_bps: u32,
    pub share_supply: u64,
    pub created_at: DateTime<Utc>,
}

/// Read-only view of a user's stake in one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeSnapshot {
    pub pool: PoolId,
    pub user: AccountId,
    pub staked_amount: u64,
    pub collateral_amount: u64,
    pub shares_minted: u64,
    pub last_stake_at: Option<DateTime<Utc>>,
    pub encumbered: u64,
    pub active_debt: u64,
    pub unstake_locked_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeReceipt {
    pub pool: PoolId,
    pub user: AccountId,
    pub amount: u64,
    pub shares_minted: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnstakeReceipt {
    pub pool: PoolId,
    pub user: AccountId,
    pub amount_returned: u64,
    pub shares_burned: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingPath {
    /// Paid entirely from the origin pool.
    Local,
    /// Peer pools were drawn to cover a local shortfall.
    Redistributed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackReceipt {
    pub pool: PoolId,
    pub user: AccountId,
    pub merchant: AccountId,
    pub amount: u64,
    pub shares_burned: u64,
    pub debt_index: usize,
    pub path: FundingPath,
    pub sources: Vec<DebtSource>,
    pub unstake_locked_until: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepayReceipt {
    pub pool: PoolId,
    pub user: AccountId,
    pub debt_index: usize,
    pub amount: u64,
    pub remaining: u64,
    pub fully_repaid: bool,
    /// Stake re-credited in this pool.
    pub restaked: u64,
    pub shares_minted: u64,
    /// Value sent back to the peer pools that funded the debt, in source order.
    #[serde(default)]
    pub released: Vec<EncumbranceRelease>,
}

/// Value returned to a source pool when a debt it funded is repaid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncumbranceRelease {
    pub pool: PoolId,
    pub amount: u64,
}

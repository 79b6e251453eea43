use crate::error::PoolError;
use crate::math::{checked_add, checked_sub, collateral_for, mul_div};
use crate::shares::ShareLedger;
use crate::types::{
    AccountId, Debt, DebtSource, EncumbranceRelease, FallbackReceipt, FundingPath, PoolId,
    PoolSnapshot, PoolStatus, RepayReceipt, Stake, StakeReceipt, StakeSnapshot, UnstakeReceipt,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Upper bound accepted by `set_apy` (100%).
pub const MAX_APY_BPS: u32 = 10_000;

/// Regional pool: an isolated accounting domain.
///
/// The pool exclusively owns its stakes, debts, share ledger and unstake locks. Peers reach it
/// only through [`crate::protocol::PeerPool`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    id: PoolId,
    region: String,
    status: PoolStatus,
    total_liquidity: u64,
    total_debt: u64,
    rewards_pot: u64,
    apy_bps: u32,
    created_at: DateTime<Utc>,
    shares: ShareLedger,
    stakes: BTreeMap<AccountId, Stake>,
    debts: BTreeMap<AccountId, Vec<Debt>>,
    /// Collateral drawn by peer pools on a user's behalf and not yet released by repayment.
    encumbrances: BTreeMap<AccountId, u64>,
    unstake_locks: BTreeMap<AccountId, DateTime<Utc>>,
}

impl Pool {
    pub fn new(id: PoolId, region: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            region: region.into(),
            status: PoolStatus::Active,
            total_liquidity: 0,
            total_debt: 0,
            rewards_pot: 0,
            apy_bps: 0,
            created_at,
            shares: ShareLedger::new(),
            stakes: BTreeMap::new(),
            debts: BTreeMap::new(),
            encumbrances: BTreeMap::new(),
            unstake_locks: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn status(&self) -> PoolStatus {
        self.status
    }

    pub fn total_liquidity(&self) -> u64 {
        self.total_liquidity
    }

    pub fn total_debt(&self) -> u64 {
        self.total_debt
    }

    pub fn rewards_pot(&self) -> u64 {
        self.rewards_pot
    }

    pub fn apy_bps(&self) -> u32 {
        self.apy_bps
    }

    pub fn shares(&self) -> &ShareLedger {
        &self.shares
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            id: self.id,
            region: self.region.clone(),
            status: self.status,
            total_liquidity: self.total_liquidity,
            total_debt: self.total_debt,
            rewards_pot: self.rewards_pot,
            apy_bps: self.apy_bps,
            share_supply: self.shares.total_supply(),
            created_at: self.created_at,
        }
    }

    pub fn stake_of(&self, user: &AccountId) -> Option<&Stake> {
        self.stakes.get(user)
    }

    pub fn stake_snapshot(&self, user: &AccountId) -> StakeSnapshot {
        let stake = self.stakes.get(user).cloned().unwrap_or_default();
        StakeSnapshot {
            pool: self.id,
            user: user.clone(),
            staked_amount: stake.staked_amount,
            collateral_amount: stake.collateral_amount,
            shares_minted: stake.shares_minted,
            last_stake_at: stake.last_stake_at,
            encumbered: self.encumbrance_of(user),
            active_debt: self.active_debt_of(user),
            unstake_locked_until: self.unstake_locks.get(user).copied(),
        }
    }

    pub fn debts_of(&self, user: &AccountId) -> &[Debt] {
        self.debts.get(user).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn active_debt_of(&self, user: &AccountId) -> u64 {
        self.debts_of(user)
            .iter()
            .filter(|debt| debt.is_active())
            .fold(0u64, |acc, debt| acc.saturating_add(debt.amount))
    }

    pub fn collateral_of(&self, user: &AccountId) -> u64 {
        self.stakes
            .get(user)
            .map(|stake| stake.collateral_amount)
            .unwrap_or(0)
    }

    pub fn encumbrance_of(&self, user: &AccountId) -> u64 {
        self.encumbrances.get(user).copied().unwrap_or(0)
    }

    /// Collateral minus active debt and peer encumbrance.
    pub fn available_collateral_of(&self, user: &AccountId) -> u64 {
        self.collateral_of(user)
            .saturating_sub(self.active_debt_of(user))
            .saturating_sub(self.encumbrance_of(user))
    }

    /// Collateral the raw stake entitles the user to, ignoring debt backed by it locally.
    pub fn entitled_collateral_of(&self, user: &AccountId) -> u64 {
        self.stakes
            .get(user)
            .map(|stake| collateral_for(stake.staked_amount))
            .unwrap_or(0)
            .saturating_sub(self.encumbrance_of(user))
    }

    pub fn unstake_locked_until(&self, user: &AccountId) -> Option<DateTime<Utc>> {
        self.unstake_locks.get(user).copied()
    }

    pub fn ensure_active(&self) -> Result<(), PoolError> {
        if self.status != PoolStatus::Active {
            return Err(self.not_active());
        }
        Ok(())
    }

    /// Active or Paused.
    pub fn ensure_operational(&self) -> Result<(), PoolError> {
        if self.status == PoolStatus::Inactive {
            return Err(self.not_active());
        }
        Ok(())
    }

    fn not_active(&self) -> PoolError {
        PoolError::PoolNotActive {
            pool: self.id,
            status: self.status.name().to_string(),
        }
    }

    /// Shares minted for a deposit at the current rate. `None` when shares are outstanding
    /// but no liquidity backs them.
    fn quote_shares(&self, amount: u64) -> Result<Option<u64>, PoolError> {
        let supply = self.shares.total_supply();
        if supply == 0 {
            return Ok(Some(amount));
        }
        if self.total_liquidity == 0 {
            return Ok(None);
        }
        mul_div(amount, supply, self.total_liquidity).map(Some)
    }

    pub fn stake(
        &mut self,
        user: &AccountId,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<StakeReceipt, PoolError> {
        self.ensure_active()?;
        if amount == 0 {
            return Err(PoolError::validation("stake amount must be positive"));
        }
        let minted = self
            .quote_shares(amount)?
            .ok_or(PoolError::InsufficientLiquidity {
                required: amount,
                available: 0,
            })?;
        if minted == 0 {
            return Err(PoolError::validation(format!(
                "stake of {} is too small to mint shares",
                amount
            )));
        }

        let current = self.stakes.get(user).cloned().unwrap_or_default();
        let staked = checked_add(current.staked_amount, amount, "staked amount")?;
        let shares_minted = checked_add(current.shares_minted, minted, "shares minted")?;
        let liquidity = checked_add(self.total_liquidity, amount, "total liquidity")?;

        self.shares.mint(user, minted)?;

        let stake = self.stakes.entry(user.clone()).or_default();
        stake.set_staked(staked);
        stake.shares_minted = shares_minted;
        stake.last_stake_at = Some(now);
        self.total_liquidity = liquidity;

        Ok(StakeReceipt {
            pool: self.id,
            user: user.clone(),
            amount,
            shares_minted: minted,
        })
    }

    pub fn unstake(
        &mut self,
        user: &AccountId,
        share_amount: u64,
        now: DateTime<Utc>,
    ) -> Result<UnstakeReceipt, PoolError> {
        self.ensure_operational()?;
        if share_amount == 0 {
            return Err(PoolError::validation("share amount must be positive"));
        }
        let current = self.stakes.get(user).cloned().unwrap_or_default();
        if current.shares_minted < share_amount {
            return Err(PoolError::InsufficientBalance {
                holder: user.to_string(),
                required: share_amount,
                available: current.shares_minted,
            });
        }
        if let Some(until) = self.unstake_locks.get(user) {
            if now < *until {
                return Err(PoolError::WithdrawalLocked { until: *until });
            }
        }

        let value_out = mul_div(current.staked_amount, share_amount, current.shares_minted)?;
        let remaining_staked = current.staked_amount - value_out;
        let remaining_collateral = collateral_for(remaining_staked);
        let required = self
            .active_debt_of(user)
            .saturating_add(self.encumbrance_of(user));
        if remaining_collateral < required {
            return Err(PoolError::InsufficientCollateral {
                required,
                remaining: remaining_collateral,
            });
        }
        if self.total_liquidity < value_out {
            return Err(PoolError::InsufficientLiquidity {
                required: value_out,
                available: self.total_liquidity,
            });
        }

        self.shares.burn(user, share_amount)?;

        if let Some(stake) = self.stakes.get_mut(user) {
            stake.set_staked(remaining_staked);
            stake.shares_minted -= share_amount;
        }
        self.total_liquidity -= value_out;

        Ok(UnstakeReceipt {
            pool: self.id,
            user: user.clone(),
            amount_returned: value_out,
            shares_burned: share_amount,
        })
    }

    /// Final step of a fallback payment, run after any peer value has been received.
    ///
    /// Debits the user's local position (saturating at what they hold), records the debt and
    /// extends the unstake lock. The caller moves `amount` of custody value to the merchant.
    pub fn settle_fallback(
        &mut self,
        user: &AccountId,
        merchant: &AccountId,
        amount: u64,
        sources: Vec<DebtSource>,
        now: DateTime<Utc>,
        lock_duration: Duration,
    ) -> Result<FallbackReceipt, PoolError> {
        self.ensure_active()?;
        if self.total_liquidity < amount {
            return Err(PoolError::InsufficientLiquidity {
                required: amount,
                available: self.total_liquidity,
            });
        }

        let user_shares = self.shares.balance_of(user);
        let burn = if self.total_liquidity == 0 {
            0
        } else {
            mul_div(amount, self.shares.total_supply(), self.total_liquidity)?.min(user_shares)
        };
        let total_debt = checked_add(self.total_debt, amount, "total debt")?;
        let new_lock = now + lock_duration;
        let locked_until = match self.unstake_locks.get(user) {
            Some(existing) if *existing > new_lock => *existing,
            _ => new_lock,
        };

        self.shares.burn(user, burn)?;

        let mut debited = 0;
        if let Some(stake) = self.stakes.get_mut(user) {
            debited = amount.min(stake.staked_amount);
            let remaining = stake.staked_amount - debited;
            stake.set_staked(remaining);
            stake.shares_minted = stake.shares_minted.saturating_sub(burn);
        }
        self.total_liquidity -= amount;
        self.total_debt = total_debt;

        let path = if sources.is_empty() {
            FundingPath::Local
        } else {
            FundingPath::Redistributed
        };
        let debts = self.debts.entry(user.clone()).or_default();
        debts.push(Debt {
            merchant: merchant.clone(),
            amount,
            original_amount: amount,
            created_at: now,
            is_repaid: false,
            sources: sources.clone(),
            unbacked: amount - debited,
        });
        let debt_index = debts.len() - 1;
        self.unstake_locks.insert(user.clone(), locked_until);

        Ok(FallbackReceipt {
            pool: self.id,
            user: user.clone(),
            merchant: merchant.clone(),
            amount,
            shares_burned: burn,
            debt_index,
            path,
            sources,
            unstake_locked_until: locked_until,
        })
    }

    /// Apply a repayment to one debt.
    ///
    /// Repayment first covers the debt's peer sources, in order; the receipt lists what the
    /// caller must send back to each source pool. The stake is re-credited at the current share
    /// rate with whatever part of the repayment was originally debited from it.
    pub fn repay(
        &mut self,
        user: &AccountId,
        debt_index: usize,
        amount: u64,
    ) -> Result<RepayReceipt, PoolError> {
        self.ensure_operational()?;
        if amount == 0 {
            return Err(PoolError::validation("repayment amount must be positive"));
        }
        let debt = self
            .debts
            .get(user)
            .and_then(|debts| debts.get(debt_index))
            .ok_or_else(|| PoolError::validation(format!("invalid debt index {}", debt_index)))?;
        if debt.is_repaid {
            return Err(PoolError::validation(format!(
                "debt {} is already repaid",
                debt_index
            )));
        }
        if amount > debt.amount {
            return Err(PoolError::validation(format!(
                "repayment {} exceeds outstanding debt {}",
                amount, debt.amount
            )));
        }

        let repaid_before = debt.original_amount - debt.amount;
        let restaked = (repaid_before + amount).saturating_sub(debt.unbacked)
            - repaid_before.saturating_sub(debt.unbacked);
        let mut left = amount;
        let takes: Vec<u64> = debt
            .sources
            .iter()
            .map(|source| {
                let take = source.outstanding.min(left);
                left -= take;
                take
            })
            .collect();
        let released: Vec<EncumbranceRelease> = debt
            .sources
            .iter()
            .zip(&takes)
            .filter(|(_, take)| **take > 0)
            .map(|(source, take)| EncumbranceRelease {
                pool: source.pool,
                amount: *take,
            })
            .collect();
        let returned = amount - left;

        // Drained pools mint 1:1 so repayment is never blocked.
        let minted = self.quote_shares(restaked)?.unwrap_or(restaked);
        let total_debt = checked_sub(self.total_debt, amount, "total debt")?;
        let liquidity = checked_add(self.total_liquidity, amount, "total liquidity")?;
        let liquidity = checked_sub(liquidity, returned, "total liquidity")?;
        let current = self.stakes.get(user).cloned().unwrap_or_default();
        let staked = checked_add(current.staked_amount, restaked, "staked amount")?;
        let shares_minted = checked_add(current.shares_minted, minted, "shares minted")?;

        if minted > 0 {
            self.shares.mint(user, minted)?;
        }

        let remaining;
        {
            let debts = self.debts.get_mut(user).ok_or_else(|| {
                PoolError::InvariantViolation("debt list vanished during repayment".into())
            })?;
            let debt = &mut debts[debt_index];
            for (source, take) in debt.sources.iter_mut().zip(&takes) {
                source.outstanding -= take;
            }
            debt.amount -= amount;
            if debt.amount == 0 {
                debt.is_repaid = true;
            }
            remaining = debt.amount;
        }

        if restaked > 0 || self.stakes.contains_key(user) {
            let stake = self.stakes.entry(user.clone()).or_default();
            stake.set_staked(staked);
            stake.shares_minted = shares_minted;
        }
        self.total_liquidity = liquidity;
        self.total_debt = total_debt;

        if self.active_debt_of(user) == 0 {
            self.unstake_locks.remove(user);
        }

        Ok(RepayReceipt {
            pool: self.id,
            user: user.clone(),
            debt_index,
            amount,
            remaining,
            fully_repaid: remaining == 0,
            restaked,
            shares_minted: minted,
            released,
        })
    }

    pub fn toggle_status(&mut self) -> Result<PoolStatus, PoolError> {
        self.status = match self.status {
            PoolStatus::Active => PoolStatus::Paused,
            PoolStatus::Paused => PoolStatus::Active,
            PoolStatus::Inactive => return Err(self.not_active()),
        };
        Ok(self.status)
    }

    pub fn deactivate(&mut self) -> Result<(), PoolError> {
        self.ensure_operational()?;
        self.status = PoolStatus::Inactive;
        Ok(())
    }

    pub fn set_apy(&mut self, apy_bps: u32) -> Result<(), PoolError> {
        self.ensure_operational()?;
        if apy_bps > MAX_APY_BPS {
            return Err(PoolError::validation(format!(
                "apy {} bps exceeds maximum {}",
                apy_bps, MAX_APY_BPS
            )));
        }
        self.apy_bps = apy_bps;
        Ok(())
    }

    pub fn add_rewards(&mut self, amount: u64) -> Result<(), PoolError> {
        self.ensure_operational()?;
        if amount == 0 {
            return Err(PoolError::validation("reward amount must be positive"));
        }
        self.rewards_pot = checked_add(self.rewards_pot, amount, "rewards pot")?;
        Ok(())
    }

    /// Zero the pool's value counters for an emergency withdrawal. Inactive pools only.
    /// Returns the value that leaves custody.
    pub fn drain_for_emergency(&mut self) -> Result<u64, PoolError> {
        if self.status != PoolStatus::Inactive {
            return Err(PoolError::validation(format!(
                "emergency withdrawal requires an inactive pool, {} is {}",
                self.id, self.status
            )));
        }
        let drained = checked_add(self.total_liquidity, self.rewards_pot, "emergency drain")?;
        self.total_liquidity = 0;
        self.rewards_pot = 0;
        Ok(drained)
    }

    pub(crate) fn debit_liquidity(&mut self, amount: u64) -> Result<(), PoolError> {
        self.total_liquidity = checked_sub(self.total_liquidity, amount, "total liquidity")?;
        Ok(())
    }

    pub(crate) fn credit_liquidity(&mut self, amount: u64) -> Result<(), PoolError> {
        self.total_liquidity = checked_add(self.total_liquidity, amount, "total liquidity")?;
        Ok(())
    }

    pub(crate) fn encumber(&mut self, user: &AccountId, amount: u64) -> Result<(), PoolError> {
        let total = checked_add(self.encumbrance_of(user), amount, "encumbrance")?;
        self.encumbrances.insert(user.clone(), total);
        Ok(())
    }

    pub(crate) fn release(&mut self, user: &AccountId, amount: u64) -> u64 {
        let current = self.encumbrance_of(user);
        let released = current.min(amount);
        if current - released == 0 {
            self.encumbrances.remove(user);
        } else {
            self.encumbrances.insert(user.clone(), current - released);
        }
        released
    }

    /// Collateral recomputation and share bookkeeping agree for every stake, and recorded stakes
    /// are backed by liquidity plus value lent to peers. Inactive pools may have been drained and
    /// are exempt from the backing check.
    pub fn check_invariants(&self) -> Result<(), PoolError> {
        if !self.shares.is_conserved() {
            return Err(PoolError::InvariantViolation(format!(
                "{} share balances do not sum to supply",
                self.id
            )));
        }
        if self.status != PoolStatus::Inactive {
            let staked = self.stakes.values().try_fold(0u64, |acc, stake| {
                checked_add(acc, stake.staked_amount, "staked total")
            })?;
            let lent = self
                .encumbrances
                .values()
                .try_fold(0u64, |acc, amount| checked_add(acc, *amount, "encumbrance total"))?;
            let backing = checked_add(self.total_liquidity, lent, "stake backing")?;
            if staked > backing {
                return Err(PoolError::InvariantViolation(format!(
                    "{} stakes of {} exceed liquidity {} plus peer draws {}",
                    self.id, staked, self.total_liquidity, lent
                )));
            }
        }
        for (user, stake) in &self.stakes {
            if stake.collateral_amount != collateral_for(stake.staked_amount) {
                return Err(PoolError::InvariantViolation(format!(
                    "{} collateral for '{}' is not derived from stake",
                    self.id, user
                )));
            }
            if stake.shares_minted != self.shares.balance_of(user) {
                return Err(PoolError::InvariantViolation(format!(
                    "{} share record for '{}' disagrees with ledger",
                    self.id, user
                )));
            }
        }
        Ok(())
    }
}

//! Administrator commands: pool creation, status, APY, rewards, funding and emergency exits.

use crate::custody::Holder;
use crate::engine::PoolEngine;
use crate::error::PoolError;
use crate::journal::{JournalEvent, JournalEventKind};
use crate::pool::Pool;
use crate::types::{AccountId, PoolId, PoolSnapshot, PoolStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Serialize)]
struct StatusChanged {
    pool: PoolId,
    status: PoolStatus,
}

#[derive(Serialize)]
struct ApyUpdated {
    pool: PoolId,
    apy_bps: u32,
}

#[derive(Serialize)]
struct RewardsAdded {
    pool: PoolId,
    amount: u64,
    rewards_pot: u64,
}

#[derive(Serialize)]
struct AccountFunded<'a> {
    account: &'a AccountId,
    amount: u64,
}

#[derive(Serialize)]
struct EmergencyWithdrawal<'a> {
    pool: PoolId,
    recipient: &'a AccountId,
    amount: u64,
}

impl PoolEngine {
    fn ensure_admin(&self, caller: &AccountId) -> Result<(), PoolError> {
        if caller != &self.config().administrator {
            warn!(caller = %caller, "rejected admin command from non-administrator");
            return Err(PoolError::UnauthorizedCaller(format!(
                "'{}' is not the administrator",
                caller
            )));
        }
        Ok(())
    }

    /// Create and register a pool for `region`. Regions are unique, case-insensitively.
    pub fn create_pool(
        &mut self,
        caller: &AccountId,
        region: &str,
        now: DateTime<Utc>,
    ) -> Result<PoolSnapshot, PoolError> {
        self.ensure_admin(caller)?;
        let slot = u32::try_from(self.pools().len()).map_err(|_| PoolError::Overflow("pool id"))?;
        let id = PoolId(slot);

        let mut registry = self.registry().clone();
        registry.register(id, region)?;
        let pool = Pool::new(id, region.trim(), now);
        let snapshot = pool.snapshot();

        let event = JournalEvent::new(JournalEventKind::PoolCreated, Some(id), &snapshot)?;
        let entries = self.journal().prepare(now, vec![event]);
        self.install_pool(registry, pool, entries)?;

        info!(pool = %id, region = %snapshot.region, "pool created");
        Ok(snapshot)
    }

    /// Flip Active and Paused.
    pub fn toggle_pool_status(
        &mut self,
        caller: &AccountId,
        pool: PoolId,
        now: DateTime<Utc>,
    ) -> Result<PoolStatus, PoolError> {
        self.ensure_admin(caller)?;
        let status = self.execute(now, |tx| {
            let status = tx.pool_mut(pool)?.toggle_status()?;
            tx.record(
                JournalEventKind::StatusChanged,
                Some(pool),
                &StatusChanged { pool, status },
            )?;
            Ok(status)
        })?;
        info!(pool = %pool, status = %status, "pool status toggled");
        Ok(status)
    }

    pub fn deactivate_pool(
        &mut self,
        caller: &AccountId,
        pool: PoolId,
        now: DateTime<Utc>,
    ) -> Result<(), PoolError> {
        self.ensure_admin(caller)?;
        self.execute(now, |tx| {
            tx.pool_mut(pool)?.deactivate()?;
            tx.record(
                JournalEventKind::StatusChanged,
                Some(pool),
                &StatusChanged {
                    pool,
                    status: PoolStatus::Inactive,
                },
            )
        })?;
        info!(pool = %pool, "pool deactivated");
        Ok(())
    }

    pub fn set_apy(
        &mut self,
        caller: &AccountId,
        pool: PoolId,
        apy_bps: u32,
        now: DateTime<Utc>,
    ) -> Result<(), PoolError> {
        self.ensure_admin(caller)?;
        self.execute(now, |tx| {
            tx.pool_mut(pool)?.set_apy(apy_bps)?;
            tx.record(
                JournalEventKind::ApyUpdated,
                Some(pool),
                &ApyUpdated { pool, apy_bps },
            )
        })?;
        info!(pool = %pool, apy_bps, "pool apy updated");
        Ok(())
    }

    /// Move reward funds from the administrator's custody balance into the pool's rewards pot.
    pub fn add_rewards_to_pool(
        &mut self,
        caller: &AccountId,
        pool: PoolId,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<u64, PoolError> {
        self.ensure_admin(caller)?;
        let rewards_pot = self.execute(now, |tx| {
            let target = tx.pool_mut(pool)?;
            target.add_rewards(amount)?;
            let rewards_pot = target.rewards_pot();
            tx.custody.transfer(
                &Holder::Account(caller.clone()),
                &Holder::Pool(pool),
                amount,
            )?;
            tx.record(
                JournalEventKind::RewardsAdded,
                Some(pool),
                &RewardsAdded {
                    pool,
                    amount,
                    rewards_pot,
                },
            )?;
            Ok(rewards_pot)
        })?;
        info!(pool = %pool, amount, rewards_pot, "rewards added");
        Ok(rewards_pot)
    }

    /// Mint custody value to an account.
    pub fn fund_account(
        &mut self,
        caller: &AccountId,
        account: &AccountId,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<u64, PoolError> {
        self.ensure_admin(caller)?;
        if amount == 0 {
            return Err(PoolError::validation("funding amount must be positive"));
        }
        let holder = Holder::Account(account.clone());
        let balance = self.execute(now, |tx| {
            tx.custody.mint(&holder, amount)?;
            tx.record(
                JournalEventKind::AccountFunded,
                None,
                &AccountFunded { account, amount },
            )?;
            Ok(tx.custody.balance_of(&holder))
        })?;
        info!(account = %account, amount, balance, "account funded");
        Ok(balance)
    }

    /// Drain an Inactive pool's custody to the administrator. Returns the amount moved.
    pub fn emergency_withdraw(
        &mut self,
        caller: &AccountId,
        pool: PoolId,
        now: DateTime<Utc>,
    ) -> Result<u64, PoolError> {
        self.ensure_admin(caller)?;
        let amount = self.execute(now, |tx| {
            let amount = tx.pool_mut(pool)?.drain_for_emergency()?;
            tx.custody.transfer(
                &Holder::Pool(pool),
                &Holder::Account(caller.clone()),
                amount,
            )?;
            tx.record(
                JournalEventKind::EmergencyWithdrawal,
                Some(pool),
                &EmergencyWithdrawal {
                    pool,
                    recipient: caller,
                    amount,
                },
            )?;
            Ok(amount)
        })?;
        warn!(pool = %pool, amount, "emergency withdrawal executed");
        Ok(amount)
    }
}

use crate::config::EngineConfig;
use crate::custody::{CustodyToken, Holder};
use crate::error::PoolError;
use crate::journal::{Journal, JournalEntry, JournalEvent, JournalEventKind};
use crate::math::checked_add;
use crate::pool::Pool;
use crate::protocol::{redistribute, PeerPool};
use crate::registry::PoolRegistry;
use crate::types::{
    AccountId, Debt, DebtSource, FallbackReceipt, PoolId, PoolSnapshot, RepayReceipt,
    StakeReceipt, StakeSnapshot, UnstakeReceipt,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Serializable engine state, used for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineState {
    pub registry: PoolRegistry,
    pub pools: Vec<Pool>,
    pub custody: CustodyToken,
    pub journal: Vec<JournalEntry>,
}

/// Multi-pool accounting engine.
///
/// Pools live in an arena indexed by [`PoolId`]; cross-pool calls resolve identifiers through
/// the registry at call time. Every command runs as one transaction over working copies of the
/// pools it touches and the custody token. Nothing is installed unless every step succeeded.
#[derive(Debug, Clone)]
pub struct PoolEngine {
    config: EngineConfig,
    registry: PoolRegistry,
    pools: Vec<Pool>,
    custody: CustodyToken,
    journal: Journal,
}

/// Working copies for one command.
pub(crate) struct Transaction<'a> {
    committed: &'a [Pool],
    registry: &'a PoolRegistry,
    pools: BTreeMap<PoolId, Pool>,
    pub(crate) custody: CustodyToken,
    events: Vec<JournalEvent>,
}

impl<'a> Transaction<'a> {
    fn new(committed: &'a [Pool], registry: &'a PoolRegistry, custody: &CustodyToken) -> Self {
        Self {
            committed,
            registry,
            pools: BTreeMap::new(),
            custody: custody.clone(),
            events: Vec::new(),
        }
    }

    /// Working copy of `id`, cloned from committed state on first touch.
    pub(crate) fn pool_mut(&mut self, id: PoolId) -> Result<&mut Pool, PoolError> {
        if !self.pools.contains_key(&id) {
            if !self.registry.contains(id) {
                return Err(PoolError::PoolNotFound(id));
            }
            let pool = self
                .committed
                .get(id.index())
                .cloned()
                .ok_or(PoolError::PoolNotFound(id))?;
            self.pools.insert(id, pool);
        }
        self.pools.get_mut(&id).ok_or(PoolError::PoolNotFound(id))
    }

    pub(crate) fn record<T: Serialize>(
        &mut self,
        kind: JournalEventKind,
        pool: Option<PoolId>,
        payload: &T,
    ) -> Result<(), PoolError> {
        self.events.push(JournalEvent::new(kind, pool, payload)?);
        Ok(())
    }
}

#[derive(Serialize)]
struct RedistributedEvent<'a> {
    source: PoolId,
    destination: PoolId,
    user: &'a AccountId,
    amount: u64,
    kind: crate::staging::TransferKind,
}

impl PoolEngine {
    pub fn new(config: EngineConfig) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(Self {
            config,
            registry: PoolRegistry::new(),
            pools: Vec::new(),
            custody: CustodyToken::new(),
            journal: Journal::new(),
        })
    }

    /// Build an engine with one fresh pool per registry entry.
    ///
    /// Registry identifiers must be the arena slots `0..n` in registration order.
    pub fn with_registry(
        config: EngineConfig,
        registry: PoolRegistry,
        now: DateTime<Utc>,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        let mut pools = Vec::with_capacity(registry.len());
        for (slot, entry) in registry.entries().iter().enumerate() {
            if entry.id.index() != slot {
                return Err(PoolError::validation(format!(
                    "{} registered at slot {}",
                    entry.id, slot
                )));
            }
            pools.push(Pool::new(entry.id, entry.region.clone(), now));
        }
        Ok(Self {
            config,
            registry,
            pools,
            custody: CustodyToken::new(),
            journal: Journal::new(),
        })
    }

    /// Restore a persisted engine, verifying arena layout, journal chain and invariants.
    pub fn from_state(config: EngineConfig, state: EngineState) -> Result<Self, PoolError> {
        config.validate()?;
        if state.registry.len() != state.pools.len() {
            return Err(PoolError::InvariantViolation(format!(
                "registry lists {} pools but state holds {}",
                state.registry.len(),
                state.pools.len()
            )));
        }
        for (slot, (entry, pool)) in state
            .registry
            .entries()
            .iter()
            .zip(state.pools.iter())
            .enumerate()
        {
            if entry.id.index() != slot || pool.id() != entry.id {
                return Err(PoolError::InvariantViolation(format!(
                    "pool arena misaligned at slot {}",
                    slot
                )));
            }
        }
        let engine = Self {
            config,
            registry: state.registry,
            pools: state.pools,
            custody: state.custody,
            journal: Journal::from_entries(state.journal)?,
        };
        engine.check_invariants()?;
        Ok(engine)
    }

    pub fn to_state(&self) -> EngineState {
        EngineState {
            registry: self.registry.clone(),
            pools: self.pools.clone(),
            custody: self.custody.clone(),
            journal: self.journal.entries().to_vec(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &PoolRegistry {
        &self.registry
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn custody(&self) -> &CustodyToken {
        &self.custody
    }

    pub fn pools(&self) -> &[Pool] {
        &self.pools
    }

    pub fn pool(&self, id: PoolId) -> Result<&Pool, PoolError> {
        if !self.registry.contains(id) {
            return Err(PoolError::PoolNotFound(id));
        }
        self.pools.get(id.index()).ok_or(PoolError::PoolNotFound(id))
    }

    pub fn get_pool(&self, id: PoolId) -> Result<PoolSnapshot, PoolError> {
        self.pool(id).map(Pool::snapshot)
    }

    pub fn get_pools(&self) -> Vec<PoolSnapshot> {
        self.pools.iter().map(Pool::snapshot).collect()
    }

    pub fn get_stake(&self, pool: PoolId, user: &AccountId) -> Result<StakeSnapshot, PoolError> {
        self.pool(pool).map(|p| p.stake_snapshot(user))
    }

    pub fn get_user_debts(&self, pool: PoolId, user: &AccountId) -> Result<Vec<Debt>, PoolError> {
        self.pool(pool).map(|p| p.debts_of(user).to_vec())
    }

    /// Sum of `user`'s collateral in every pool, paused and inactive ones included.
    pub fn total_collateral_across_pools(&self, user: &AccountId) -> u64 {
        self.pools
            .iter()
            .map(|pool| pool as &dyn PeerPool)
            .fold(0u64, |acc, peer| acc.saturating_add(peer.query_collateral(user)))
    }

    /// Collateral not backing active debt or peer draws in `pool`.
    pub fn collateral_available(&self, pool: PoolId, user: &AccountId) -> Result<u64, PoolError> {
        self.pool(pool).map(|p| p.available_collateral_of(user))
    }

    pub fn balance_of(&self, account: &AccountId) -> u64 {
        self.custody.balance_of(&Holder::Account(account.clone()))
    }

    /// Verify every pool's bookkeeping and that custody backs liquidity plus rewards.
    pub fn check_invariants(&self) -> Result<(), PoolError> {
        for pool in &self.pools {
            check_pool(pool, &self.custody)?;
        }
        Ok(())
    }

    pub fn stake(
        &mut self,
        pool: PoolId,
        user: &AccountId,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<StakeReceipt, PoolError> {
        let receipt = self.execute(now, |tx| {
            let receipt = tx.pool_mut(pool)?.stake(user, amount, now)?;
            tx.custody.transfer(
                &Holder::Account(user.clone()),
                &Holder::Pool(pool),
                amount,
            )?;
            tx.record(JournalEventKind::Staked, Some(pool), &receipt)?;
            Ok(receipt)
        })?;
        info!(
            pool = %pool,
            user = %user,
            amount,
            shares = receipt.shares_minted,
            "stake committed"
        );
        Ok(receipt)
    }

    pub fn unstake(
        &mut self,
        pool: PoolId,
        user: &AccountId,
        share_amount: u64,
        now: DateTime<Utc>,
    ) -> Result<UnstakeReceipt, PoolError> {
        let receipt = self.execute(now, |tx| {
            let receipt = tx.pool_mut(pool)?.unstake(user, share_amount, now)?;
            tx.custody.transfer(
                &Holder::Pool(pool),
                &Holder::Account(user.clone()),
                receipt.amount_returned,
            )?;
            tx.record(JournalEventKind::Unstaked, Some(pool), &receipt)?;
            Ok(receipt)
        })?;
        info!(
            pool = %pool,
            user = %user,
            shares = share_amount,
            returned = receipt.amount_returned,
            "unstake committed"
        );
        Ok(receipt)
    }

    /// Pay `merchant` on the user's behalf, drawing on peer pools when the origin falls short.
    pub fn fallback_pay(
        &mut self,
        origin: PoolId,
        user: &AccountId,
        merchant: &AccountId,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<FallbackReceipt, PoolError> {
        if amount == 0 {
            return Err(PoolError::validation("payment amount must be positive"));
        }
        if user.is_null() || merchant.is_null() {
            return Err(PoolError::validation("user and merchant must not be empty"));
        }
        let origin_pool = self.pool(origin)?;
        origin_pool.ensure_active()?;

        let global = self.total_collateral_across_pools(user);
        if amount > global {
            warn!(
                pool = %origin,
                user = %user,
                requested = amount,
                available = global,
                "fallback payment exceeds global collateral"
            );
            return Err(PoolError::ExceedsGlobalCollateral {
                requested: amount,
                available: global,
            });
        }

        let local_available = origin_pool.available_collateral_of(user);
        let local_liquidity = origin_pool.total_liquidity();
        let staged = if local_available >= amount && local_liquidity >= amount {
            Vec::new()
        } else {
            let local_usable = local_available.min(local_liquidity);
            let needed = amount - local_usable;
            let peers: Vec<&dyn PeerPool> = self
                .registry
                .peers_of(origin)
                .into_iter()
                .filter_map(|id| self.pools.get(id.index()))
                .map(|pool| pool as &dyn PeerPool)
                .collect();
            let outcome = redistribute(origin, &peers, &self.registry, user, needed);
            let covered = local_usable.saturating_add(outcome.raised);
            if covered < amount {
                warn!(
                    pool = %origin,
                    user = %user,
                    requested = amount,
                    covered,
                    skipped = outcome.skipped.len(),
                    "fallback payment short after redistribution"
                );
                return Err(PoolError::InsufficientLiquidity {
                    required: amount,
                    available: covered,
                });
            }
            outcome.staged.into_transfers()
        };

        let lock = self.config.unstake_lock();
        let receipt = self.execute(now, |tx| {
            let mut sources: Vec<DebtSource> = Vec::new();
            for transfer in &staged {
                tx.pool_mut(transfer.source)?.apply_outflow(transfer)?;
                tx.pool_mut(transfer.destination)?
                    .receive_liquidity(transfer.source, transfer.amount)?;
                tx.custody.transfer(
                    &Holder::Pool(transfer.source),
                    &Holder::Pool(transfer.destination),
                    transfer.amount,
                )?;
                match sources.iter_mut().find(|s| s.pool == transfer.source) {
                    Some(source) => {
                        source.outstanding =
                            checked_add(source.outstanding, transfer.amount, "debt source")?
                    }
                    None => sources.push(DebtSource {
                        pool: transfer.source,
                        outstanding: transfer.amount,
                    }),
                }
                tx.record(
                    JournalEventKind::Redistributed,
                    Some(transfer.source),
                    &RedistributedEvent {
                        source: transfer.source,
                        destination: transfer.destination,
                        user: &transfer.user,
                        amount: transfer.amount,
                        kind: transfer.kind,
                    },
                )?;
            }

            let receipt =
                tx.pool_mut(origin)?
                    .settle_fallback(user, merchant, amount, sources, now, lock)?;
            tx.custody.transfer(
                &Holder::Pool(origin),
                &Holder::Account(merchant.clone()),
                amount,
            )?;
            tx.record(JournalEventKind::FallbackPaid, Some(origin), &receipt)?;
            Ok(receipt)
        })?;

        info!(
            pool = %origin,
            user = %user,
            merchant = %merchant,
            amount,
            path = ?receipt.path,
            peers = receipt.sources.len(),
            "fallback payment committed"
        );
        Ok(receipt)
    }

    pub fn repay_debt(
        &mut self,
        pool: PoolId,
        user: &AccountId,
        debt_index: usize,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<RepayReceipt, PoolError> {
        let receipt = self.execute(now, |tx| repay_in(tx, pool, user, debt_index, amount))?;
        info!(
            pool = %pool,
            user = %user,
            debt_index,
            amount,
            remaining = receipt.remaining,
            "repayment committed"
        );
        Ok(receipt)
    }

    /// Repay every active debt of `user` in every operational pool, all or nothing.
    pub fn repay_all_debts(
        &mut self,
        user: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<Vec<RepayReceipt>, PoolError> {
        let mut plan = Vec::new();
        let mut total = 0u64;
        for pool in &self.pools {
            if pool.ensure_operational().is_err() {
                continue;
            }
            for (index, debt) in pool.debts_of(user).iter().enumerate() {
                if debt.is_active() {
                    total = checked_add(total, debt.amount, "repay all total")?;
                    plan.push((pool.id(), index, debt.amount));
                }
            }
        }
        if plan.is_empty() {
            return Ok(Vec::new());
        }
        let balance = self.balance_of(user);
        if balance < total {
            return Err(PoolError::InsufficientBalance {
                holder: user.to_string(),
                required: total,
                available: balance,
            });
        }

        let receipts = self.execute(now, |tx| {
            plan.iter()
                .map(|(pool, index, amount)| repay_in(tx, *pool, user, *index, *amount))
                .collect::<Result<Vec<_>, _>>()
        })?;
        info!(user = %user, debts = receipts.len(), total, "all debts repaid");
        Ok(receipts)
    }

    /// Run `command` against working copies and install the result only if it succeeded.
    pub(crate) fn execute<T>(
        &mut self,
        now: DateTime<Utc>,
        command: impl FnOnce(&mut Transaction<'_>) -> Result<T, PoolError>,
    ) -> Result<T, PoolError> {
        let mut tx = Transaction::new(&self.pools, &self.registry, &self.custody);
        let value = command(&mut tx)?;
        let Transaction {
            pools,
            custody,
            events,
            ..
        } = tx;

        for pool in pools.values() {
            check_pool(pool, &custody)?;
        }
        let entries = self.journal.prepare(now, events);
        self.journal.commit(entries)?;

        for (id, pool) in pools {
            if let Some(slot) = self.pools.get_mut(id.index()) {
                *slot = pool;
            }
        }
        self.custody = custody;
        Ok(value)
    }

    /// Append a pool the registry has just accepted. Used by the factory.
    pub(crate) fn install_pool(
        &mut self,
        registry: PoolRegistry,
        pool: Pool,
        entries: Vec<JournalEntry>,
    ) -> Result<(), PoolError> {
        if pool.id().index() != self.pools.len() {
            return Err(PoolError::InvariantViolation(format!(
                "{} does not fit arena slot {}",
                pool.id(),
                self.pools.len()
            )));
        }
        self.journal.commit(entries)?;
        self.registry = registry;
        self.pools.push(pool);
        Ok(())
    }
}

fn repay_in(
    tx: &mut Transaction<'_>,
    pool: PoolId,
    user: &AccountId,
    debt_index: usize,
    amount: u64,
) -> Result<RepayReceipt, PoolError> {
    let receipt = tx.pool_mut(pool)?.repay(user, debt_index, amount)?;
    tx.custody
        .transfer(&Holder::Account(user.clone()), &Holder::Pool(pool), amount)?;
    for release in &receipt.released {
        let source = tx.pool_mut(release.pool)?;
        source.release_encumbrance(user, release.amount);
        source.receive_liquidity(pool, release.amount)?;
        tx.custody.transfer(
            &Holder::Pool(pool),
            &Holder::Pool(release.pool),
            release.amount,
        )?;
    }
    tx.record(JournalEventKind::DebtRepaid, Some(pool), &receipt)?;
    Ok(receipt)
}

fn check_pool(pool: &Pool, custody: &CustodyToken) -> Result<(), PoolError> {
    pool.check_invariants()?;
    let backing = checked_add(pool.total_liquidity(), pool.rewards_pot(), "pool backing")?;
    let held = custody.balance_of(&Holder::Pool(pool.id()));
    if held != backing {
        return Err(PoolError::InvariantViolation(format!(
            "{} custody {} does not match liquidity plus rewards {}",
            pool.id(),
            held,
            backing
        )));
    }
    Ok(())
}

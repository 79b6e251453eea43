//! Read-only views for dashboards: sorted pool listings, recommendation, totals, positions.

use crate::custody::Holder;
use crate::engine::PoolEngine;
use crate::error::PoolError;
use crate::pool::Pool;
use crate::types::{AccountId, PoolId, PoolSnapshot, PoolStatus};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolSort {
    #[default]
    LiquidityAsc,
    LiquidityDesc,
    ApyAsc,
    ApyDesc,
}

impl PoolSort {
    pub fn name(self) -> &'static str {
        match self {
            Self::LiquidityAsc => "liquidity_asc",
            Self::LiquidityDesc => "liquidity_desc",
            Self::ApyAsc => "apy_asc",
            Self::ApyDesc => "apy_desc",
        }
    }
}

impl FromStr for PoolSort {
    type Err = PoolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "liquidity_asc" => Ok(Self::LiquidityAsc),
            "liquidity_desc" => Ok(Self::LiquidityDesc),
            "apy_asc" => Ok(Self::ApyAsc),
            "apy_desc" => Ok(Self::ApyDesc),
            other => Err(PoolError::validation(format!(
                "invalid sort '{}'; expected liquidity_asc, liquidity_desc, apy_asc or apy_desc",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub pool: PoolId,
    pub region: String,
    pub reason: String,
    pub total_liquidity: u64,
    pub apy_bps: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStats {
    pub total_pools: usize,
    pub active_pools: usize,
    pub total_liquidity: u64,
    pub total_debt: u64,
    pub total_rewards: u64,
    pub journal_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolPosition {
    pub pool: PoolId,
    pub region: String,
    pub shares: u64,
    pub staked_amount: u64,
    pub collateral_amount: u64,
    pub available_collateral: u64,
    pub active_debt: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPositions {
    pub user: AccountId,
    /// Custody value held outside any pool.
    pub balance: u64,
    pub positions: Vec<PoolPosition>,
}

impl PoolEngine {
    /// Pool snapshots in the requested order; ties keep registration order.
    pub fn list_pools(&self, sort: PoolSort) -> Vec<PoolSnapshot> {
        let mut pools = self.get_pools();
        match sort {
            PoolSort::LiquidityAsc => pools.sort_by_key(|p| p.total_liquidity),
            PoolSort::LiquidityDesc => {
                pools.sort_by(|a, b| b.total_liquidity.cmp(&a.total_liquidity))
            }
            PoolSort::ApyAsc => pools.sort_by_key(|p| p.apy_bps),
            PoolSort::ApyDesc => pools.sort_by(|a, b| b.apy_bps.cmp(&a.apy_bps)),
        }
        pools
    }

    /// Highest-liquidity pool that is not Inactive; the earliest registered wins a tie.
    pub fn recommend_pool(&self) -> Option<Recommendation> {
        self.pools()
            .iter()
            .filter(|pool| pool.status() != PoolStatus::Inactive)
            .fold(None, |best: Option<&Pool>, pool| match best {
                Some(current) if current.total_liquidity() >= pool.total_liquidity() => {
                    Some(current)
                }
                _ => Some(pool),
            })
            .map(|pool| Recommendation {
                pool: pool.id(),
                region: pool.region().to_string(),
                reason: "highest liquidity pool for better stability".to_string(),
                total_liquidity: pool.total_liquidity(),
                apy_bps: pool.apy_bps(),
            })
    }

    pub fn system_stats(&self) -> SystemStats {
        self.pools().iter().fold(
            SystemStats {
                journal_entries: self.journal().len(),
                ..SystemStats::default()
            },
            |mut stats, pool| {
                stats.total_pools += 1;
                if pool.status() == PoolStatus::Active {
                    stats.active_pools += 1;
                }
                stats.total_liquidity = stats.total_liquidity.saturating_add(pool.total_liquidity());
                stats.total_debt = stats.total_debt.saturating_add(pool.total_debt());
                stats.total_rewards = stats.total_rewards.saturating_add(pool.rewards_pot());
                stats
            },
        )
    }

    /// Custody balance plus every pool the user holds shares, stake or debt in.
    pub fn user_positions(&self, user: &AccountId) -> UserPositions {
        let positions = self
            .pools()
            .iter()
            .filter_map(|pool| {
                let stake = pool.stake_of(user).cloned().unwrap_or_default();
                let shares = pool.shares().balance_of(user);
                let active_debt = pool.active_debt_of(user);
                if shares == 0 && stake.staked_amount == 0 && active_debt == 0 {
                    return None;
                }
                Some(PoolPosition {
                    pool: pool.id(),
                    region: pool.region().to_string(),
                    shares,
                    staked_amount: stake.staked_amount,
                    collateral_amount: stake.collateral_amount,
                    available_collateral: pool.available_collateral_of(user),
                    active_debt,
                })
            })
            .collect();
        UserPositions {
            user: user.clone(),
            balance: self.custody().balance_of(&Holder::Account(user.clone())),
            positions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use chrono::Utc;

    fn engine() -> PoolEngine {
        let admin = AccountId::new("admin");
        let alice = AccountId::new("alice");
        let mut engine = PoolEngine::new(EngineConfig::default()).unwrap();
        for region in ["north", "south", "east"] {
            engine.create_pool(&admin, region, Utc::now()).unwrap();
        }
        engine
            .fund_account(&admin, &alice, 1_000, Utc::now())
            .unwrap();
        engine.stake(PoolId(1), &alice, 500, Utc::now()).unwrap();
        engine.stake(PoolId(2), &alice, 500, Utc::now()).unwrap();
        engine.set_apy(&admin, PoolId(0), 900, Utc::now()).unwrap();
        engine
    }

    #[test]
    fn sorts_by_liquidity_and_apy() {
        let engine = engine();
        let ids = |pools: Vec<PoolSnapshot>| pools.into_iter().map(|p| p.id).collect::<Vec<_>>();

        assert_eq!(
            ids(engine.list_pools(PoolSort::LiquidityAsc)),
            vec![PoolId(0), PoolId(1), PoolId(2)]
        );
        assert_eq!(
            ids(engine.list_pools(PoolSort::LiquidityDesc)),
            vec![PoolId(1), PoolId(2), PoolId(0)]
        );
        assert_eq!(ids(engine.list_pools(PoolSort::ApyDesc))[0], PoolId(0));
        assert!("sideways".parse::<PoolSort>().is_err());
        assert_eq!("APY_ASC".parse::<PoolSort>().unwrap(), PoolSort::ApyAsc);
    }

    #[test]
    fn recommendation_prefers_earliest_on_tie() {
        let engine = engine();
        let recommendation = engine.recommend_pool().unwrap();
        assert_eq!(recommendation.pool, PoolId(1));
        assert_eq!(recommendation.total_liquidity, 500);
        assert!(PoolEngine::new(EngineConfig::default())
            .unwrap()
            .recommend_pool()
            .is_none());
    }

    #[test]
    fn stats_and_positions() {
        let engine = engine();
        let stats = engine.system_stats();
        assert_eq!(stats.total_pools, 3);
        assert_eq!(stats.active_pools, 3);
        assert_eq!(stats.total_liquidity, 1_000);

        let positions = engine.user_positions(&AccountId::new("alice"));
        assert_eq!(positions.balance, 0);
        assert_eq!(positions.positions.len(), 2);
        assert_eq!(positions.positions[0].collateral_amount, 100);
    }
}

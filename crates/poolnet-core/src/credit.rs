//! Deterministic credit scoring over a user's positions across every pool.

use crate::config::CreditConfig;
use crate::engine::PoolEngine;
use crate::error::PoolError;
use crate::math::{bps_mul, mul_div, BPS_DENOMINATOR};
use crate::types::AccountId;
use serde::{Deserialize, Serialize};

/// Raw figures a score is computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditInputs {
    pub total_staked: u64,
    pub total_debt: u64,
    pub pools_staked_in: u32,
    pub active_debts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditFactors {
    pub total_staked: u64,
    pub total_debt: u64,
    pub pools_staked_in: u32,
    pub active_debts: u32,
    pub debt_to_stake_bps: Option<u64>,
    pub has_active_debt: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditScore {
    pub user: AccountId,
    pub score: u32,
    pub factors: CreditFactors,
    /// Human-readable trail of every bonus and penalty applied.
    pub adjustments: Vec<String>,
}

/// Score `inputs` in `[0, config.max_score]`.
pub fn score(config: &CreditConfig, inputs: &CreditInputs) -> Result<(u32, Vec<String>), PoolError> {
    let max = i64::from(config.max_score);
    let mut adjustments = Vec::new();
    let mut score = i64::from(config.base_score);

    let stake_points = mul_div(
        inputs.total_staked.min(config.stake_normalizer),
        u64::from(config.max_stake_bonus),
        config.stake_normalizer,
    )?;
    score += stake_points as i64;
    adjustments.push(format!("stake bonus +{}", stake_points));

    let diversification = (u64::from(inputs.pools_staked_in) * u64::from(config.per_pool_bonus))
        .min(u64::from(config.max_diversification_bonus));
    score += diversification as i64;
    adjustments.push(format!("diversification bonus +{}", diversification));

    if inputs.total_debt > 0 {
        let penalty = mul_div(
            inputs.total_debt.min(config.debt_normalizer),
            u64::from(config.max_debt_penalty),
            config.debt_normalizer,
        )?;
        score -= penalty as i64;
        adjustments.push(format!("debt penalty -{}", penalty));
    }
    if inputs.active_debts > 1 {
        let penalty =
            i64::from(inputs.active_debts - 1) * i64::from(config.extra_debt_penalty);
        score -= penalty;
        adjustments.push(format!("multiple debts penalty -{}", penalty));
    }
    score = score.clamp(0, max);

    if inputs.total_staked > 0 && inputs.total_debt > 0 {
        let ratio = debt_to_stake_bps(inputs).unwrap_or(u64::MAX);
        let penalty_bps = if ratio > config.heavy_ratio_bps {
            Some(config.heavy_ratio_penalty_bps)
        } else if ratio > config.moderate_ratio_bps {
            Some(config.moderate_ratio_penalty_bps)
        } else {
            None
        };
        if let Some(bps) = penalty_bps {
            let penalty = bps_mul(score as u64, bps)? as i64;
            score -= penalty;
            adjustments.push(format!("debt-to-stake ratio penalty -{}", penalty));
        }
    }
    if inputs.total_staked == 0 && inputs.total_debt > 0 {
        score -= i64::from(config.unbacked_debt_penalty);
        adjustments.push(format!(
            "debt without stake penalty -{}",
            config.unbacked_debt_penalty
        ));
    }
    if inputs.total_staked > config.clean_stake_threshold && inputs.total_debt == 0 {
        score += i64::from(config.clean_stake_bonus);
        adjustments.push(format!("clean stake bonus +{}", config.clean_stake_bonus));
    }

    Ok((score.clamp(0, max) as u32, adjustments))
}

fn debt_to_stake_bps(inputs: &CreditInputs) -> Option<u64> {
    if inputs.total_staked == 0 {
        return None;
    }
    mul_div(inputs.total_debt, BPS_DENOMINATOR, inputs.total_staked).ok()
}

impl PoolEngine {
    pub fn credit_inputs(&self, user: &AccountId) -> CreditInputs {
        let mut inputs = CreditInputs::default();
        for pool in self.pools() {
            let staked = pool.stake_of(user).map(|s| s.staked_amount).unwrap_or(0);
            if staked > 0 {
                inputs.total_staked = inputs.total_staked.saturating_add(staked);
                inputs.pools_staked_in += 1;
            }
            for debt in pool.debts_of(user).iter().filter(|d| d.is_active()) {
                inputs.total_debt = inputs.total_debt.saturating_add(debt.amount);
                inputs.active_debts += 1;
            }
        }
        inputs
    }

    pub fn credit_score(&self, user: &AccountId) -> Result<CreditScore, PoolError> {
        let inputs = self.credit_inputs(user);
        let (score, adjustments) = score(&self.config().credit, &inputs)?;
        Ok(CreditScore {
            user: user.clone(),
            score,
            factors: CreditFactors {
                total_staked: inputs.total_staked,
                total_debt: inputs.total_debt,
                pools_staked_in: inputs.pools_staked_in,
                active_debts: inputs.active_debts,
                debt_to_stake_bps: debt_to_stake_bps(&inputs),
                has_active_debt: inputs.active_debts > 0,
            },
            adjustments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(total_staked: u64, total_debt: u64, pools: u32, debts: u32) -> u32 {
        let inputs = CreditInputs {
            total_staked,
            total_debt,
            pools_staked_in: pools,
            active_debts: debts,
        };
        score(&CreditConfig::default(), &inputs).unwrap().0
    }

    #[test]
    fn newcomer_scores_base() {
        assert_eq!(run(0, 0, 0, 0), 500);
    }

    #[test]
    fn diversified_clean_stake_is_rewarded() {
        // 500 + 200 stake + 50 diversification + 50 clean bonus
        assert_eq!(run(1_000, 0, 2, 0), 800);
        // Stake bonus caps at the normalizer.
        assert_eq!(run(50_000, 0, 8, 0), 850);
    }

    #[test]
    fn unbacked_debt_is_penalized() {
        // 500 - 300 debt, then -150 with nothing staked
        assert_eq!(run(0, 500, 0, 1), 50);
        assert_eq!(run(0, 5_000, 0, 4), 0);
    }

    #[test]
    fn debt_ratio_penalties() {
        // 425 before the 10% moderate-ratio penalty
        assert_eq!(run(1_000, 600, 1, 1), 383);
        // 375 before the 20% heavy-ratio penalty
        assert_eq!(run(1_000, 900, 1, 2), 300);
    }

    #[test]
    fn engine_gathers_inputs_across_pools() {
        use crate::config::EngineConfig;
        use crate::registry::PoolRegistry;
        use crate::types::PoolId;
        use chrono::Utc;

        let mut registry = PoolRegistry::new();
        registry.register(PoolId(0), "north").unwrap();
        registry.register(PoolId(1), "south").unwrap();
        let mut engine =
            PoolEngine::with_registry(EngineConfig::default(), registry, Utc::now()).unwrap();
        let admin = AccountId::new("admin");
        let alice = AccountId::new("alice");
        engine
            .fund_account(&admin, &alice, 1_000, Utc::now())
            .unwrap();
        engine.stake(PoolId(0), &alice, 600, Utc::now()).unwrap();
        engine.stake(PoolId(1), &alice, 400, Utc::now()).unwrap();

        let report = engine.credit_score(&alice).unwrap();
        assert_eq!(report.factors.total_staked, 1_000);
        assert_eq!(report.factors.pools_staked_in, 2);
        assert!(!report.factors.has_active_debt);
        assert_eq!(report.score, 800);
    }
}

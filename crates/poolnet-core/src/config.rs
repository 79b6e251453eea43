use crate::error::PoolError;
use crate::types::AccountId;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Default unstake lock after a fallback payment: seven days.
pub const DEFAULT_UNSTAKE_LOCK_SECS: u64 = 7 * 24 * 60 * 60;

/// Longest lock accepted by `EngineConfig::validate` (ten years).
pub const MAX_UNSTAKE_LOCK_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Pool engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Identity allowed to run factory/admin commands.
    pub administrator: AccountId,
    pub unstake_lock_secs: u64,
    pub credit: CreditConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            administrator: AccountId::new("admin"),
            unstake_lock_secs: DEFAULT_UNSTAKE_LOCK_SECS,
            credit: CreditConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.administrator.is_null() {
            return Err(PoolError::validation("administrator identity must not be empty"));
        }
        if self.unstake_lock_secs > MAX_UNSTAKE_LOCK_SECS {
            return Err(PoolError::validation(format!(
                "unstake lock of {}s exceeds maximum {}s",
                self.unstake_lock_secs, MAX_UNSTAKE_LOCK_SECS
            )));
        }
        self.credit.validate()
    }

    pub fn unstake_lock(&self) -> Duration {
        // Clamped to the range `validate` accepts.
        Duration::seconds(self.unstake_lock_secs.min(MAX_UNSTAKE_LOCK_SECS) as i64)
    }
}

/// Deterministic credit scoring parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreditConfig {
    pub base_score: u32,
    pub max_score: u32,
    /// Total stake that earns the full stake bonus.
    pub stake_normalizer: u64,
    pub max_stake_bonus: u32,
    pub per_pool_bonus: u32,
    pub max_diversification_bonus: u32,
    /// Total debt that incurs the full debt penalty.
    pub debt_normalizer: u64,
    pub max_debt_penalty: u32,
    /// Applied for every active debt beyond the first.
    pub extra_debt_penalty: u32,
    /// Debt/stake ratio above which the heavy penalty applies.
    pub heavy_ratio_bps: u64,
    pub heavy_ratio_penalty_bps: u64,
    pub moderate_ratio_bps: u64,
    pub moderate_ratio_penalty_bps: u64,
    pub unbacked_debt_penalty: u32,
    /// Stake strictly above this with no debt earns `clean_stake_bonus`.
    pub clean_stake_threshold: u64,
    pub clean_stake_bonus: u32,
}

impl Default for CreditConfig {
    fn default() -> Self {
        Self {
            base_score: 500,
            max_score: 1_000,
            stake_normalizer: 1_000,
            max_stake_bonus: 200,
            per_pool_bonus: 25,
            max_diversification_bonus: 100,
            debt_normalizer: 500,
            max_debt_penalty: 300,
            extra_debt_penalty: 50,
            heavy_ratio_bps: 8_000,
            heavy_ratio_penalty_bps: 2_000,
            moderate_ratio_bps: 5_000,
            moderate_ratio_penalty_bps: 1_000,
            unbacked_debt_penalty: 150,
            clean_stake_threshold: 100,
            clean_stake_bonus: 50,
        }
    }
}

impl CreditConfig {
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.stake_normalizer == 0 || self.debt_normalizer == 0 {
            return Err(PoolError::validation("credit normalizers must be positive"));
        }
        if self.base_score > self.max_score {
            return Err(PoolError::validation("credit base score exceeds max score"));
        }
        if self.heavy_ratio_bps < self.moderate_ratio_bps {
            return Err(PoolError::validation(
                "heavy debt ratio threshold must not be below the moderate threshold",
            ));
        }
        if self.heavy_ratio_penalty_bps > 10_000 || self.moderate_ratio_penalty_bps > 10_000 {
            return Err(PoolError::validation("ratio penalties cannot exceed 100%"));
        }
        Ok(())
    }
}

use crate::types::PoolId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Pool engine errors.
///
/// Every variant is fatal to the command that produced it: no partial state survives a failed
/// command. Peer failures during redistribution never surface here directly; they are absorbed
/// by the redistribution loop and only the final shortfall is reported.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Pool {0} not found")]
    PoolNotFound(PoolId),

    #[error("Insufficient balance for '{holder}': required {required}, available {available}")]
    InsufficientBalance {
        holder: String,
        required: u64,
        available: u64,
    },

    #[error("Insufficient collateral: required {required}, remaining {remaining}")]
    InsufficientCollateral { required: u64, remaining: u64 },

    #[error("Insufficient liquidity: required {required}, available {available}")]
    InsufficientLiquidity { required: u64, available: u64 },

    #[error("Payment of {requested} exceeds global collateral {available}")]
    ExceedsGlobalCollateral { requested: u64, available: u64 },

    #[error("Unauthorized caller: {0}")]
    UnauthorizedCaller(String),

    #[error("Pool {pool} is not active (status: {status})")]
    PoolNotActive { pool: PoolId, status: String },

    #[error("Withdrawal locked until {until}")]
    WithdrawalLocked { until: DateTime<Utc> },

    #[error("Arithmetic overflow in {0}")]
    Overflow(&'static str),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Journal error: {0}")]
    Journal(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Stable error categories exposed to external collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    InsufficientBalance,
    InsufficientCollateral,
    InsufficientLiquidity,
    ExceedsGlobalCollateral,
    Unauthorized,
    PoolNotActive,
    WithdrawalLocked,
    Internal,
}

impl PoolError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::PoolNotFound(_) => ErrorKind::NotFound,
            Self::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Self::InsufficientCollateral { .. } => ErrorKind::InsufficientCollateral,
            Self::InsufficientLiquidity { .. } => ErrorKind::InsufficientLiquidity,
            Self::ExceedsGlobalCollateral { .. } => ErrorKind::ExceedsGlobalCollateral,
            Self::UnauthorizedCaller(_) => ErrorKind::Unauthorized,
            Self::PoolNotActive { .. } => ErrorKind::PoolNotActive,
            Self::WithdrawalLocked { .. } => ErrorKind::WithdrawalLocked,
            Self::Overflow(_)
            | Self::InvariantViolation(_)
            | Self::Journal(_)
            | Self::Serialization(_) => ErrorKind::Internal,
        }
    }
}

//! Regional liquidity pools with collateral-backed cross-pool fallback payments.
//!
//! Each pool keeps its own proportional-share ledger, stakes and debts. A fallback payment is
//! funded from the user's own pool first and, when that falls short, from their holdings in peer
//! pools through a two-phase redistribution protocol. Every command is one all-or-nothing
//! transaction recorded in a hash-chained journal.

#![deny(unsafe_code)]

pub mod config;
pub mod credit;
pub mod custody;
pub mod engine;
pub mod error;
pub mod factory;
pub mod insights;
pub mod journal;
pub mod math;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod shares;
pub mod staging;
pub mod types;

pub use config::{CreditConfig, EngineConfig, DEFAULT_UNSTAKE_LOCK_SECS};
pub use credit::{CreditFactors, CreditInputs, CreditScore};
pub use custody::{CustodyToken, Holder};
pub use engine::{EngineState, PoolEngine};
pub use error::{ErrorKind, PoolError};
pub use insights::{PoolPosition, PoolSort, Recommendation, SystemStats, UserPositions};
pub use journal::{Journal, JournalEntry, JournalEvent, JournalEventKind};
pub use math::{collateral_for, COLLATERAL_RATE_BPS};
pub use pool::{Pool, MAX_APY_BPS};
pub use protocol::{redistribute, PeerFailure, PeerPool, Redistribution, TransferRequest};
pub use registry::{PoolRegistry, RegistryEntry};
pub use shares::ShareLedger;
pub use staging::{StagedLog, StagedTransfer, TransferKind};
pub use types::{
    AccountId, Debt, DebtSource, EncumbranceRelease, FallbackReceipt, FundingPath, PoolId,
    PoolSnapshot, PoolStatus, RepayReceipt, Stake, StakeReceipt, StakeSnapshot, UnstakeReceipt,
};

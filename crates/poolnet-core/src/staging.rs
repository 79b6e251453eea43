use crate::types::{AccountId, PoolId};
use serde::{Deserialize, Serialize};

/// Which protocol command proposed a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    /// Phase 1: redistribution of already-available collateral.
    Redistribution,
    /// Phase 2: contribution drawn from the user's stake entitlement.
    Contribution,
}

/// A proposed peer-to-origin value move. Nothing is mutated until the log is committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedTransfer {
    pub source: PoolId,
    pub destination: PoolId,
    pub user: AccountId,
    pub amount: u64,
    pub kind: TransferKind,
}

/// Staged-apply log for one top-level command.
///
/// Peers validate new proposals against their committed state minus whatever this log already
/// holds against them, so sequential calls within a command observe each other. The engine either
/// commits every entry or drops the log.
#[derive(Debug, Clone, Default)]
pub struct StagedLog {
    transfers: Vec<StagedTransfer>,
}

impl StagedLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, transfer: StagedTransfer) {
        self.transfers.push(transfer);
    }

    pub fn transfers(&self) -> &[StagedTransfer] {
        &self.transfers
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// Total value staged to leave `pool`.
    pub fn outflow_from(&self, pool: PoolId) -> u64 {
        self.transfers
            .iter()
            .filter(|t| t.source == pool)
            .fold(0u64, |acc, t| acc.saturating_add(t.amount))
    }

    /// Value staged to leave `pool` on behalf of `user`.
    pub fn drawn_for(&self, pool: PoolId, user: &AccountId) -> u64 {
        self.transfers
            .iter()
            .filter(|t| t.source == pool && &t.user == user)
            .fold(0u64, |acc, t| acc.saturating_add(t.amount))
    }

    pub fn into_transfers(self) -> Vec<StagedTransfer> {
        self.transfers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_by_pool_and_user() {
        let alice = AccountId::new("alice");
        let bob = AccountId::new("bob");
        let mut log = StagedLog::new();
        log.push(StagedTransfer {
            source: PoolId(1),
            destination: PoolId(0),
            user: alice.clone(),
            amount: 30,
            kind: TransferKind::Redistribution,
        });
        log.push(StagedTransfer {
            source: PoolId(1),
            destination: PoolId(0),
            user: bob.clone(),
            amount: 5,
            kind: TransferKind::Contribution,
        });

        assert_eq!(log.outflow_from(PoolId(1)), 35);
        assert_eq!(log.drawn_for(PoolId(1), &alice), 30);
        assert_eq!(log.drawn_for(PoolId(2), &alice), 0);
        assert!(log
            .into_transfers()
            .iter()
            .all(|t| t.destination == PoolId(0)));
    }
}

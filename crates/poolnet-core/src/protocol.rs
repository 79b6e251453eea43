use crate::error::PoolError;
use crate::pool::Pool;
use crate::registry::PoolRegistry;
use crate::staging::{StagedLog, StagedTransfer, TransferKind};
use crate::types::{AccountId, PoolId, PoolStatus};
use tracing::{debug, warn};

/// Cross-pool value request addressed to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Pool issuing the call.
    pub caller: PoolId,
    /// Pool that receives the value.
    pub destination: PoolId,
    pub user: AccountId,
    pub amount: u64,
}

/// Command/query surface a pool exposes to its peers.
///
/// Queries and proposals are evaluated against committed state net of what `staged` already
/// draws from the peer. Proposals never mutate; the engine commits accepted proposals through
/// the commit-side methods once the whole command has been validated.
pub trait PeerPool {
    fn pool_id(&self) -> PoolId;

    fn is_active(&self) -> bool;

    /// Raw collateral recorded for `user`.
    fn query_collateral(&self, user: &AccountId) -> u64;

    /// Collateral not backing local debt or earlier draws.
    fn query_available_collateral(&self, user: &AccountId, staged: &StagedLog) -> u64;

    /// Collateral the user's stake entitles them to, net of earlier draws.
    fn query_entitled_collateral(&self, user: &AccountId, staged: &StagedLog) -> u64;

    fn query_liquidity(&self, staged: &StagedLog) -> u64;

    /// Phase 1 move of already-available collateral. Bounded by liquidity only.
    fn transfer_out(
        &self,
        request: &TransferRequest,
        registry: &PoolRegistry,
        staged: &StagedLog,
    ) -> Result<StagedTransfer, PoolError>;

    /// Phase 2 contribution bounded by the user's entitlement.
    fn contribute_for_payment(
        &self,
        request: &TransferRequest,
        registry: &PoolRegistry,
        staged: &StagedLog,
    ) -> Result<StagedTransfer, PoolError>;

    fn apply_outflow(&mut self, transfer: &StagedTransfer) -> Result<(), PoolError>;

    fn receive_liquidity(&mut self, from: PoolId, amount: u64) -> Result<(), PoolError>;

    /// Release encumbrance held for `user`. Returns what was actually released.
    fn release_encumbrance(&mut self, user: &AccountId, amount: u64) -> u64;
}

impl Pool {
    fn propose(
        &self,
        request: &TransferRequest,
        registry: &PoolRegistry,
        staged: &StagedLog,
        kind: TransferKind,
    ) -> Result<StagedTransfer, PoolError> {
        registry.authorize_transfer(request.caller, self.id(), request.destination)?;
        self.ensure_active()?;
        if request.amount == 0 {
            return Err(PoolError::validation("transfer amount must be positive"));
        }
        let liquidity = self.query_liquidity(staged);
        if request.amount > liquidity {
            return Err(PoolError::InsufficientLiquidity {
                required: request.amount,
                available: liquidity,
            });
        }
        Ok(StagedTransfer {
            source: self.id(),
            destination: request.destination,
            user: request.user.clone(),
            amount: request.amount,
            kind,
        })
    }
}

impl PeerPool for Pool {
    fn pool_id(&self) -> PoolId {
        self.id()
    }

    fn is_active(&self) -> bool {
        self.status() == PoolStatus::Active
    }

    fn query_collateral(&self, user: &AccountId) -> u64 {
        self.collateral_of(user)
    }

    fn query_available_collateral(&self, user: &AccountId, staged: &StagedLog) -> u64 {
        self.available_collateral_of(user)
            .saturating_sub(staged.drawn_for(self.id(), user))
    }

    fn query_entitled_collateral(&self, user: &AccountId, staged: &StagedLog) -> u64 {
        self.entitled_collateral_of(user)
            .saturating_sub(staged.drawn_for(self.id(), user))
    }

    fn query_liquidity(&self, staged: &StagedLog) -> u64 {
        self.total_liquidity()
            .saturating_sub(staged.outflow_from(self.id()))
    }

    fn transfer_out(
        &self,
        request: &TransferRequest,
        registry: &PoolRegistry,
        staged: &StagedLog,
    ) -> Result<StagedTransfer, PoolError> {
        self.propose(request, registry, staged, TransferKind::Redistribution)
    }

    fn contribute_for_payment(
        &self,
        request: &TransferRequest,
        registry: &PoolRegistry,
        staged: &StagedLog,
    ) -> Result<StagedTransfer, PoolError> {
        let entitled = self.query_entitled_collateral(&request.user, staged);
        if request.amount > entitled {
            return Err(PoolError::InsufficientCollateral {
                required: request.amount,
                remaining: entitled,
            });
        }
        self.propose(request, registry, staged, TransferKind::Contribution)
    }

    fn apply_outflow(&mut self, transfer: &StagedTransfer) -> Result<(), PoolError> {
        if transfer.source != self.id() {
            return Err(PoolError::InvariantViolation(format!(
                "{} asked to apply outflow staged against {}",
                self.id(),
                transfer.source
            )));
        }
        self.debit_liquidity(transfer.amount)?;
        self.encumber(&transfer.user, transfer.amount)
    }

    fn receive_liquidity(&mut self, from: PoolId, amount: u64) -> Result<(), PoolError> {
        debug!(pool = %self.id(), from = %from, amount, "receiving peer liquidity");
        self.credit_liquidity(amount)
    }

    fn release_encumbrance(&mut self, user: &AccountId, amount: u64) -> u64 {
        self.release(user, amount)
    }
}

/// A peer call that failed and was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerFailure {
    pub pool: PoolId,
    pub kind: TransferKind,
    pub error: PoolError,
}

/// Result of the two-phase peer sweep. Nothing has been applied yet.
#[derive(Debug, Clone, Default)]
pub struct Redistribution {
    pub staged: StagedLog,
    pub raised: u64,
    pub skipped: Vec<PeerFailure>,
}

/// Sweep `peers` in order to raise `needed` for `user` into `origin`.
///
/// Phase 1 draws available collateral; phase 2 draws stake entitlement for whatever is still
/// missing. A failing peer is logged and skipped. The caller decides whether `raised` suffices.
pub fn redistribute(
    origin: PoolId,
    peers: &[&dyn PeerPool],
    registry: &PoolRegistry,
    user: &AccountId,
    needed: u64,
) -> Redistribution {
    let mut outcome = Redistribution::default();
    let mut still_needed = needed;

    for phase in [TransferKind::Redistribution, TransferKind::Contribution] {
        for peer in peers {
            if still_needed == 0 {
                break;
            }
            if peer.pool_id() == origin || !peer.is_active() {
                continue;
            }
            let collateral = match phase {
                TransferKind::Redistribution => {
                    peer.query_available_collateral(user, &outcome.staged)
                }
                TransferKind::Contribution => peer.query_entitled_collateral(user, &outcome.staged),
            };
            let take = collateral
                .min(still_needed)
                .min(peer.query_liquidity(&outcome.staged));
            if take == 0 {
                continue;
            }

            let request = TransferRequest {
                caller: origin,
                destination: origin,
                user: user.clone(),
                amount: take,
            };
            let proposed = match phase {
                TransferKind::Redistribution => {
                    peer.transfer_out(&request, registry, &outcome.staged)
                }
                TransferKind::Contribution => {
                    peer.contribute_for_payment(&request, registry, &outcome.staged)
                }
            };
            match proposed {
                Ok(transfer) => {
                    debug!(
                        origin = %origin,
                        peer = %transfer.source,
                        amount = transfer.amount,
                        kind = ?transfer.kind,
                        "peer transfer staged"
                    );
                    still_needed -= transfer.amount.min(still_needed);
                    outcome.raised = outcome.raised.saturating_add(transfer.amount);
                    outcome.staged.push(transfer);
                }
                Err(error) => {
                    warn!(
                        origin = %origin,
                        peer = %peer.pool_id(),
                        error = %error,
                        "peer call failed, skipping"
                    );
                    outcome.skipped.push(PeerFailure {
                        pool: peer.pool_id(),
                        kind: phase,
                        error,
                    });
                }
            }
        }
    }

    outcome
}

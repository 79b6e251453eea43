//! End-to-end payment scenarios across regional pools.

use chrono::{Duration, Utc};
use poolnet_core::{
    AccountId, EngineConfig, FundingPath, Holder, PoolEngine, PoolError, PoolId, TransferKind,
};

fn admin() -> AccountId {
    AccountId::new("admin")
}

fn user() -> AccountId {
    AccountId::new("user-u")
}

fn merchant() -> AccountId {
    AccountId::new("merchant-m")
}

fn engine(regions: &[&str]) -> PoolEngine {
    let mut engine = PoolEngine::new(EngineConfig::default()).expect("default config is valid");
    for region in regions {
        engine
            .create_pool(&admin(), region, Utc::now())
            .expect("pool created");
    }
    engine
}

fn fund_and_stake(engine: &mut PoolEngine, pool: PoolId, amount: u64) {
    engine
        .fund_account(&admin(), &user(), amount, Utc::now())
        .expect("funded");
    engine
        .stake(pool, &user(), amount, Utc::now())
        .expect("staked");
}

#[test]
fn local_fast_path_debits_stake_and_records_debt() {
    let mut engine = engine(&["alpha"]);
    fund_and_stake(&mut engine, PoolId(0), 1_000);
    let stake = engine.get_stake(PoolId(0), &user()).unwrap();
    assert_eq!(stake.staked_amount, 1_000);
    assert_eq!(stake.collateral_amount, 200);

    let receipt = engine
        .fallback_pay(PoolId(0), &user(), &merchant(), 150, Utc::now())
        .unwrap();
    assert_eq!(receipt.path, FundingPath::Local);

    let stake = engine.get_stake(PoolId(0), &user()).unwrap();
    assert_eq!(stake.staked_amount, 850);
    assert_eq!(stake.collateral_amount, 170);

    let debts = engine.get_user_debts(PoolId(0), &user()).unwrap();
    assert_eq!(debts.len(), 1);
    assert_eq!(debts[0].amount, 150);
    assert_eq!(debts[0].merchant, merchant());
    assert!(!debts[0].is_repaid);

    assert_eq!(engine.balance_of(&merchant()), 150);
    assert!(engine.check_invariants().is_ok());
}

#[test]
fn shortfall_is_pulled_from_peer_pool() {
    let mut engine = engine(&["alpha", "beta"]);
    // 50 collateral in A, 80 in B.
    fund_and_stake(&mut engine, PoolId(0), 250);
    fund_and_stake(&mut engine, PoolId(1), 400);
    assert_eq!(engine.total_collateral_across_pools(&user()), 130);

    let receipt = engine
        .fallback_pay(PoolId(0), &user(), &merchant(), 100, Utc::now())
        .unwrap();
    assert_eq!(receipt.path, FundingPath::Redistributed);
    assert_eq!(receipt.sources.len(), 1);
    assert_eq!(receipt.sources[0].pool, PoolId(1));
    assert_eq!(receipt.sources[0].outstanding, 50);

    // B lost 50; A gained 50 and then paid out 100.
    assert_eq!(engine.get_pool(PoolId(1)).unwrap().total_liquidity, 350);
    assert_eq!(engine.get_pool(PoolId(0)).unwrap().total_liquidity, 200);
    assert_eq!(engine.get_pool(PoolId(0)).unwrap().total_debt, 100);
    assert_eq!(engine.balance_of(&merchant()), 100);

    let redistributed = engine
        .journal()
        .entries()
        .iter()
        .filter(|e| e.kind == poolnet_core::JournalEventKind::Redistributed)
        .count();
    assert_eq!(redistributed, 1);
    assert!(engine.journal().verify_chain());
    assert!(engine.check_invariants().is_ok());
}

#[test]
fn request_above_global_collateral_changes_nothing() {
    let mut engine = engine(&["alpha", "beta"]);
    fund_and_stake(&mut engine, PoolId(0), 250);
    fund_and_stake(&mut engine, PoolId(1), 400);
    let before = engine.to_state();

    let err = engine
        .fallback_pay(PoolId(0), &user(), &merchant(), 131, Utc::now())
        .unwrap_err();
    assert_eq!(
        err,
        PoolError::ExceedsGlobalCollateral {
            requested: 131,
            available: 130
        }
    );
    assert_eq!(engine.to_state(), before);
    assert_eq!(engine.balance_of(&merchant()), 0);
}

#[test]
fn unstake_below_active_debt_is_rejected() {
    let mut engine = engine(&["alpha"]);
    fund_and_stake(&mut engine, PoolId(0), 1_000);
    let now = Utc::now();
    engine
        .fallback_pay(PoolId(0), &user(), &merchant(), 150, now)
        .unwrap();

    // Past the lock, the collateral guard still applies: 850 staked, 150 owed.
    let later = now + Duration::days(8);
    let shares = engine.get_stake(PoolId(0), &user()).unwrap().shares_minted;
    let err = engine
        .unstake(PoolId(0), &user(), shares, later)
        .unwrap_err();
    assert!(matches!(err, PoolError::InsufficientCollateral { .. }));

    // Keeping 150 / 20% = 750 staked is fine.
    let stake = engine.get_stake(PoolId(0), &user()).unwrap();
    let keep = stake.shares_minted * 750 / stake.staked_amount;
    let receipt = engine
        .unstake(PoolId(0), &user(), stake.shares_minted - keep, later)
        .unwrap();
    assert!(receipt.amount_returned <= 100);
    assert!(engine.check_invariants().is_ok());
}

#[test]
fn debt_round_trip_restores_position() {
    let mut engine = engine(&["alpha", "beta"]);
    fund_and_stake(&mut engine, PoolId(0), 250);
    fund_and_stake(&mut engine, PoolId(1), 400);
    let now = Utc::now();
    engine
        .fallback_pay(PoolId(0), &user(), &merchant(), 100, now)
        .unwrap();
    assert_eq!(engine.collateral_available(PoolId(1), &user()).unwrap(), 30);

    engine
        .fund_account(&admin(), &user(), 100, now)
        .unwrap();
    engine
        .repay_debt(PoolId(0), &user(), 0, 40, now)
        .unwrap();
    let receipt = engine
        .repay_debt(PoolId(0), &user(), 0, 60, now)
        .unwrap();
    assert!(receipt.fully_repaid);

    let pool = engine.get_pool(PoolId(0)).unwrap();
    assert_eq!(pool.total_debt, 0);
    let stake = engine.get_stake(PoolId(0), &user()).unwrap();
    assert_eq!(stake.staked_amount, 250);
    assert_eq!(stake.active_debt, 0);
    assert!(stake.unstake_locked_until.is_none());
    assert_eq!(engine.collateral_available(PoolId(1), &user()).unwrap(), 80);
    assert!(engine.get_user_debts(PoolId(0), &user()).unwrap()[0].is_repaid);
    // The 50 drawn from beta went back to beta.
    assert_eq!(engine.get_pool(PoolId(0)).unwrap().total_liquidity, 250);
    assert_eq!(engine.get_pool(PoolId(1)).unwrap().total_liquidity, 400);
    assert_eq!(
        engine.custody().balance_of(&Holder::Pool(PoolId(1))),
        400
    );
    assert!(engine.check_invariants().is_ok());
}

#[test]
fn repaid_peer_draw_leaves_every_stake_withdrawable() {
    let mut engine = engine(&["alpha", "beta"]);
    let other = AccountId::new("user-v");
    fund_and_stake(&mut engine, PoolId(0), 250);
    fund_and_stake(&mut engine, PoolId(1), 400);
    engine
        .fund_account(&admin(), &other, 600, Utc::now())
        .unwrap();
    engine.stake(PoolId(1), &other, 600, Utc::now()).unwrap();

    let now = Utc::now();
    let receipt = engine
        .fallback_pay(PoolId(0), &user(), &merchant(), 100, now)
        .unwrap();
    assert_eq!(receipt.sources[0].outstanding, 50);
    engine
        .fund_account(&admin(), &user(), 100, now)
        .unwrap();
    let repaid = engine
        .repay_debt(PoolId(0), &user(), 0, 100, now)
        .unwrap();
    assert_eq!(repaid.released[0].pool, PoolId(1));
    assert_eq!(repaid.released[0].amount, 50);

    let later = now + Duration::days(30);
    for (pool, who) in [
        (PoolId(1), user()),
        (PoolId(1), other.clone()),
        (PoolId(0), user()),
    ] {
        let stake = engine.get_stake(pool, &who).unwrap();
        let out = engine
            .unstake(pool, &who, stake.shares_minted, later)
            .unwrap();
        assert_eq!(out.amount_returned, stake.staked_amount);
    }
    assert_eq!(engine.balance_of(&other), 600);
    assert_eq!(engine.get_pool(PoolId(0)).unwrap().total_liquidity, 0);
    assert_eq!(engine.get_pool(PoolId(1)).unwrap().total_liquidity, 0);
    assert!(engine.check_invariants().is_ok());
}

#[test]
fn short_payment_after_staged_peer_draw_changes_nothing() {
    let mut engine = engine(&["alpha", "beta", "gamma"]);
    let other = AccountId::new("user-w");
    fund_and_stake(&mut engine, PoolId(0), 100);
    fund_and_stake(&mut engine, PoolId(1), 200);
    fund_and_stake(&mut engine, PoolId(2), 1_000);
    // Another staker's exit from beta leaves its liquidity at our own stake.
    engine
        .fund_account(&admin(), &other, 500, Utc::now())
        .unwrap();
    engine.stake(PoolId(1), &other, 500, Utc::now()).unwrap();
    let shares = engine.get_stake(PoolId(1), &other).unwrap().shares_minted;
    engine
        .unstake(PoolId(1), &other, shares, Utc::now())
        .unwrap();
    engine
        .toggle_pool_status(&admin(), PoolId(2), Utc::now())
        .unwrap();

    // Paused gamma still counts towards the global bound.
    assert_eq!(engine.total_collateral_across_pools(&user()), 260);
    let before = engine.to_state();
    let journal_len = engine.journal().len();

    // 20 local plus 40 staged from beta, gamma is skipped.
    let err = engine
        .fallback_pay(PoolId(0), &user(), &merchant(), 150, Utc::now())
        .unwrap_err();
    assert_eq!(
        err,
        PoolError::InsufficientLiquidity {
            required: 150,
            available: 60
        }
    );
    assert_eq!(engine.to_state(), before);
    assert_eq!(engine.journal().len(), journal_len);
    assert_eq!(engine.pool(PoolId(1)).unwrap().encumbrance_of(&user()), 0);

    // The staged draw was discarded, so beta can still fund a payment it covers.
    let receipt = engine
        .fallback_pay(PoolId(0), &user(), &merchant(), 60, Utc::now())
        .unwrap();
    assert_eq!(receipt.sources[0].outstanding, 40);
    assert!(engine.check_invariants().is_ok());
}

#[test]
fn cross_pool_debt_gates_peer_unstake() {
    let mut engine = engine(&["alpha", "beta"]);
    fund_and_stake(&mut engine, PoolId(0), 250);
    fund_and_stake(&mut engine, PoolId(1), 400);
    engine
        .fallback_pay(PoolId(0), &user(), &merchant(), 100, Utc::now())
        .unwrap();

    // 50 of B's collateral is encumbered for the debt held in A.
    let shares = engine.get_stake(PoolId(1), &user()).unwrap().shares_minted;
    assert!(matches!(
        engine.unstake(PoolId(1), &user(), shares, Utc::now()),
        Err(PoolError::InsufficientCollateral {
            required: 50,
            remaining: 0
        })
    ));
}

#[test]
fn phase_two_reaches_collateral_behind_peer_debt() {
    let mut engine = engine(&["alpha", "beta"]);
    fund_and_stake(&mut engine, PoolId(0), 100);
    fund_and_stake(&mut engine, PoolId(1), 1_000);
    // Debt in B consumes its available collateral.
    engine
        .fallback_pay(PoolId(1), &user(), &merchant(), 190, Utc::now())
        .unwrap();
    assert_eq!(engine.collateral_available(PoolId(1), &user()).unwrap(), 0);

    let receipt = engine
        .fallback_pay(PoolId(0), &user(), &merchant(), 60, Utc::now())
        .unwrap();
    assert_eq!(receipt.path, FundingPath::Redistributed);
    let contributed = engine
        .journal()
        .entries()
        .iter()
        .filter(|e| e.kind == poolnet_core::JournalEventKind::Redistributed)
        .any(|e| e.payload["kind"] == serde_json::json!(TransferKind::Contribution));
    assert!(contributed);
    assert!(engine.check_invariants().is_ok());
}

#[test]
fn paused_origin_rejects_payment_but_allows_repay() {
    let mut engine = engine(&["alpha"]);
    fund_and_stake(&mut engine, PoolId(0), 1_000);
    engine
        .fallback_pay(PoolId(0), &user(), &merchant(), 10, Utc::now())
        .unwrap();
    engine
        .toggle_pool_status(&admin(), PoolId(0), Utc::now())
        .unwrap();

    assert!(matches!(
        engine.fallback_pay(PoolId(0), &user(), &merchant(), 10, Utc::now()),
        Err(PoolError::PoolNotActive { .. })
    ));
    engine
        .fund_account(&admin(), &user(), 10, Utc::now())
        .unwrap();
    engine
        .repay_debt(PoolId(0), &user(), 0, 10, Utc::now())
        .unwrap();
    assert_eq!(
        engine.custody().balance_of(&Holder::Pool(PoolId(0))),
        engine.get_pool(PoolId(0)).unwrap().total_liquidity
    );
}

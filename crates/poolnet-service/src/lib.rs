#![deny(unsafe_code)]

pub mod store;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use poolnet_core::{
    AccountId, CreditScore, Debt, EngineConfig, ErrorKind, FallbackReceipt, JournalEntry,
    JournalEventKind, PoolEngine, PoolError, PoolId, PoolSnapshot, PoolSort, PoolStatus,
    Recommendation, RepayReceipt, StakeReceipt, StakeSnapshot, SystemStats, UnstakeReceipt,
    UserPositions,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use store::{PersistedEngineStore, StoreError};
use thiserror::Error;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Snapshot file; `None` keeps the engine in memory only.
    pub state_path: Option<PathBuf>,
    pub engine: EngineConfig,
    /// Regions that get a pool at startup when missing.
    pub regions: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            state_path: Some(PathBuf::from("poolnet/data/engine.json")),
            engine: EngineConfig::default(),
            regions: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct ServiceState {
    pub engine: Arc<Mutex<PoolEngine>>,
    pub store: Option<Arc<PersistedEngineStore>>,
}

impl ServiceState {
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, ServiceError> {
        let ServiceConfig {
            state_path,
            engine: engine_config,
            regions,
        } = config;

        let store = state_path.map(PersistedEngineStore::new);
        let restored = match &store {
            Some(store) => store.load(engine_config.clone())?,
            None => None,
        };
        let mut engine = match restored {
            Some(engine) => {
                info!(
                    pools = engine.pools().len(),
                    journal_entries = engine.journal().len(),
                    "engine state restored"
                );
                engine
            }
            None => PoolEngine::new(engine_config.clone())?,
        };

        let administrator = engine_config.administrator.clone();
        let mut created = 0usize;
        for region in regions {
            if engine.registry().find_region(&region).is_none() {
                engine.create_pool(&administrator, &region, Utc::now())?;
                created += 1;
            }
        }
        if let Some(store) = &store {
            if created > 0 || !store.path().exists() {
                store.persist(&engine)?;
            }
        } else {
            warn!("no state file configured; engine state is kept in memory only");
        }

        Ok(Self {
            engine: Arc::new(Mutex::new(engine)),
            store: store.map(Arc::new),
        })
    }

    /// Run a command and install its result.
    ///
    /// With a store, the command runs against a copy that is installed only once its snapshot
    /// is on disk; the file write happens on the blocking pool. Without one, engine commands
    /// are already all-or-nothing and run in place.
    pub async fn execute<T>(
        &self,
        command: impl FnOnce(&mut PoolEngine, DateTime<Utc>) -> Result<T, PoolError>,
    ) -> Result<T, ApiError> {
        let mut engine = self.engine.lock().await;
        let Some(store) = &self.store else {
            return Ok(command(&mut engine, Utc::now())?);
        };
        let mut next = engine.clone();
        let value = command(&mut next, Utc::now())?;
        *engine = Arc::clone(store).persist_owned(next).await?;
        Ok(value)
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/pools", get(list_pools))
        .route("/v1/pools/:pool", get(get_pool))
        .route("/v1/pools/:pool/stakes/:user", get(get_stake))
        .route("/v1/pools/:pool/debts/:user", get(get_debts))
        .route("/v1/pools/:pool/collateral/:user", get(get_available_collateral))
        .route("/v1/pools/:pool/stake", post(stake))
        .route("/v1/pools/:pool/unstake", post(unstake))
        .route("/v1/pools/:pool/fallback-pay", post(fallback_pay))
        .route("/v1/pools/:pool/repay", post(repay))
        .route("/v1/users/:user/collateral", get(get_total_collateral))
        .route("/v1/users/:user/credit-score", get(get_credit_score))
        .route("/v1/users/:user/positions", get(get_positions))
        .route("/v1/users/:user/repay-all", post(repay_all))
        .route("/v1/recommendation", get(get_recommendation))
        .route("/v1/stats", get(get_stats))
        .route("/v1/journal/entries", get(list_journal_entries))
        .route("/v1/admin/pools", post(create_pool))
        .route("/v1/admin/pools/:pool/toggle", post(toggle_pool))
        .route("/v1/admin/pools/:pool/deactivate", post(deactivate_pool))
        .route("/v1/admin/pools/:pool/apy", post(set_apy))
        .route("/v1/admin/pools/:pool/rewards", post(add_rewards))
        .route(
            "/v1/admin/pools/:pool/emergency-withdraw",
            post(emergency_withdraw),
        )
        .route("/v1/admin/accounts/:account/fund", post(fund_account))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("pool engine error: {0}")]
    Engine(#[from] PoolError),
    #[error("state store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Engine(#[from] PoolError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PoolNotActive | ErrorKind::WithdrawalLocked => StatusCode::CONFLICT,
        ErrorKind::InsufficientBalance
        | ErrorKind::InsufficientCollateral
        | ErrorKind::InsufficientLiquidity
        | ErrorKind::ExceedsGlobalCollateral => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Http { status, message } => (
                status,
                Json(serde_json::json!({ "error": message, "kind": "request" })),
            )
                .into_response(),
            ApiError::Engine(err) => {
                let kind = err.kind();
                (
                    status_for(kind),
                    Json(serde_json::json!({ "error": err.to_string(), "kind": kind })),
                )
                    .into_response()
            }
            ApiError::Store(err) => {
                warn!(error = %err, "state persistence failed; command discarded");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({
                        "error": err.to_string(),
                        "kind": ErrorKind::Internal
                    })),
                )
                    .into_response()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    pools: usize,
    journal_entries: usize,
    persistent: bool,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    let engine = state.engine.lock().await;
    Json(HealthResponse {
        status: "ok",
        service: "poolnet-service",
        pools: engine.pools().len(),
        journal_entries: engine.journal().len(),
        persistent: state.store.is_some(),
    })
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct PoolsQuery {
    sort: Option<String>,
}

async fn list_pools(
    State(state): State<ServiceState>,
    Query(query): Query<PoolsQuery>,
) -> Result<Json<Vec<PoolSnapshot>>, ApiError> {
    let sort = match query.sort.as_deref() {
        Some(value) => value.parse::<PoolSort>()?,
        None => PoolSort::default(),
    };
    let engine = state.engine.lock().await;
    Ok(Json(engine.list_pools(sort)))
}

async fn get_pool(
    State(state): State<ServiceState>,
    Path(pool): Path<u32>,
) -> Result<Json<PoolSnapshot>, ApiError> {
    let engine = state.engine.lock().await;
    Ok(Json(engine.get_pool(PoolId(pool))?))
}

async fn get_stake(
    State(state): State<ServiceState>,
    Path((pool, user)): Path<(u32, String)>,
) -> Result<Json<StakeSnapshot>, ApiError> {
    let engine = state.engine.lock().await;
    Ok(Json(engine.get_stake(PoolId(pool), &AccountId::new(user))?))
}

async fn get_debts(
    State(state): State<ServiceState>,
    Path((pool, user)): Path<(u32, String)>,
) -> Result<Json<Vec<Debt>>, ApiError> {
    let engine = state.engine.lock().await;
    Ok(Json(engine.get_user_debts(PoolId(pool), &AccountId::new(user))?))
}

#[derive(Debug, Clone, Serialize)]
struct CollateralResponse {
    user: AccountId,
    pool: Option<PoolId>,
    collateral: u64,
}

async fn get_available_collateral(
    State(state): State<ServiceState>,
    Path((pool, user)): Path<(u32, String)>,
) -> Result<Json<CollateralResponse>, ApiError> {
    let user = AccountId::new(user);
    let engine = state.engine.lock().await;
    let collateral = engine.collateral_available(PoolId(pool), &user)?;
    Ok(Json(CollateralResponse {
        user,
        pool: Some(PoolId(pool)),
        collateral,
    }))
}

async fn get_total_collateral(
    State(state): State<ServiceState>,
    Path(user): Path<String>,
) -> Json<CollateralResponse> {
    let user = AccountId::new(user);
    let engine = state.engine.lock().await;
    let collateral = engine.total_collateral_across_pools(&user);
    Json(CollateralResponse {
        user,
        pool: None,
        collateral,
    })
}

async fn get_credit_score(
    State(state): State<ServiceState>,
    Path(user): Path<String>,
) -> Result<Json<CreditScore>, ApiError> {
    let engine = state.engine.lock().await;
    Ok(Json(engine.credit_score(&AccountId::new(user))?))
}

async fn get_positions(
    State(state): State<ServiceState>,
    Path(user): Path<String>,
) -> Json<UserPositions> {
    let engine = state.engine.lock().await;
    Json(engine.user_positions(&AccountId::new(user)))
}

async fn get_recommendation(
    State(state): State<ServiceState>,
) -> Result<Json<Recommendation>, ApiError> {
    let engine = state.engine.lock().await;
    engine.recommend_pool().map(Json).ok_or_else(|| ApiError::Http {
        status: StatusCode::NOT_FOUND,
        message: "no pool available for recommendation".to_string(),
    })
}

async fn get_stats(State(state): State<ServiceState>) -> Json<SystemStats> {
    let engine = state.engine.lock().await;
    Json(engine.system_stats())
}

#[derive(Debug, Clone, Deserialize)]
struct JournalEntriesQuery {
    kind: Option<String>,
    pool: Option<u32>,
    limit: Option<usize>,
    offset: Option<usize>,
    order: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct JournalEntriesResponse {
    head_hash: Option<String>,
    total: usize,
    returned: usize,
    items: Vec<JournalEntry>,
}

fn parse_kind_filter(kind: Option<&str>) -> Result<Option<JournalEventKind>, ApiError> {
    match kind {
        None => Ok(None),
        Some(value) => value
            .to_ascii_lowercase()
            .parse::<JournalEventKind>()
            .map(Some)
            .map_err(|err| ApiError::bad_request(err.to_string())),
    }
}

async fn list_journal_entries(
    State(state): State<ServiceState>,
    Query(query): Query<JournalEntriesQuery>,
) -> Result<Json<JournalEntriesResponse>, ApiError> {
    let kind_filter = parse_kind_filter(query.kind.as_deref())?;

    let engine = state.engine.lock().await;
    let head_hash = engine.journal().head_hash().map(str::to_string);
    let mut entries = engine.journal().entries().to_vec();
    drop(engine);

    if let Some(kind) = kind_filter {
        entries.retain(|entry| entry.kind == kind);
    }

    if let Some(pool) = query.pool {
        entries.retain(|entry| entry.pool == Some(PoolId(pool)));
    }

    let order = query
        .order
        .as_deref()
        .unwrap_or("desc")
        .to_ascii_lowercase();
    if order == "desc" {
        entries.reverse();
    } else if order != "asc" {
        return Err(ApiError::bad_request(format!(
            "invalid order '{}'; expected asc or desc",
            order
        )));
    }

    let total = entries.len();
    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(100).min(1000);
    let items = entries
        .into_iter()
        .skip(offset)
        .take(limit)
        .collect::<Vec<_>>();
    let returned = items.len();

    Ok(Json(JournalEntriesResponse {
        head_hash,
        total,
        returned,
        items,
    }))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct StakeRequest {
    user: AccountId,
    amount: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct UnstakeRequest {
    user: AccountId,
    shares: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct FallbackPayRequest {
    user: AccountId,
    merchant: AccountId,
    amount: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct RepayRequest {
    user: AccountId,
    debt_index: usize,
    amount: u64,
}

async fn stake(
    State(state): State<ServiceState>,
    Path(pool): Path<u32>,
    Json(request): Json<StakeRequest>,
) -> Result<Json<StakeReceipt>, ApiError> {
    let receipt = state
        .execute(|engine, now| engine.stake(PoolId(pool), &request.user, request.amount, now))
        .await?;
    Ok(Json(receipt))
}

async fn unstake(
    State(state): State<ServiceState>,
    Path(pool): Path<u32>,
    Json(request): Json<UnstakeRequest>,
) -> Result<Json<UnstakeReceipt>, ApiError> {
    let receipt = state
        .execute(|engine, now| engine.unstake(PoolId(pool), &request.user, request.shares, now))
        .await?;
    Ok(Json(receipt))
}

async fn fallback_pay(
    State(state): State<ServiceState>,
    Path(pool): Path<u32>,
    Json(request): Json<FallbackPayRequest>,
) -> Result<Json<FallbackReceipt>, ApiError> {
    let receipt = state
        .execute(|engine, now| {
            engine.fallback_pay(
                PoolId(pool),
                &request.user,
                &request.merchant,
                request.amount,
                now,
            )
        })
        .await?;
    Ok(Json(receipt))
}

async fn repay(
    State(state): State<ServiceState>,
    Path(pool): Path<u32>,
    Json(request): Json<RepayRequest>,
) -> Result<Json<RepayReceipt>, ApiError> {
    let receipt = state
        .execute(|engine, now| {
            engine.repay_debt(
                PoolId(pool),
                &request.user,
                request.debt_index,
                request.amount,
                now,
            )
        })
        .await?;
    Ok(Json(receipt))
}

async fn repay_all(
    State(state): State<ServiceState>,
    Path(user): Path<String>,
) -> Result<Json<Vec<RepayReceipt>>, ApiError> {
    let user = AccountId::new(user);
    let receipts = state
        .execute(|engine, now| engine.repay_all_debts(&user, now))
        .await?;
    Ok(Json(receipts))
}

#[derive(Debug, Clone, Deserialize)]
struct AdminRequest {
    caller: AccountId,
}

#[derive(Debug, Clone, Deserialize)]
struct CreatePoolRequest {
    caller: AccountId,
    region: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ApyRequest {
    caller: AccountId,
    apy_bps: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct AmountRequest {
    caller: AccountId,
    amount: u64,
}

#[derive(Debug, Clone, Serialize)]
struct PoolStatusResponse {
    pool: PoolId,
    status: PoolStatus,
}

#[derive(Debug, Clone, Serialize)]
struct AmountResponse {
    pool: Option<PoolId>,
    account: Option<AccountId>,
    amount: u64,
}

async fn create_pool(
    State(state): State<ServiceState>,
    Json(request): Json<CreatePoolRequest>,
) -> Result<Json<PoolSnapshot>, ApiError> {
    let snapshot = state
        .execute(|engine, now| engine.create_pool(&request.caller, &request.region, now))
        .await?;
    Ok(Json(snapshot))
}

async fn toggle_pool(
    State(state): State<ServiceState>,
    Path(pool): Path<u32>,
    Json(request): Json<AdminRequest>,
) -> Result<Json<PoolStatusResponse>, ApiError> {
    let status = state
        .execute(|engine, now| engine.toggle_pool_status(&request.caller, PoolId(pool), now))
        .await?;
    Ok(Json(PoolStatusResponse {
        pool: PoolId(pool),
        status,
    }))
}

async fn deactivate_pool(
    State(state): State<ServiceState>,
    Path(pool): Path<u32>,
    Json(request): Json<AdminRequest>,
) -> Result<Json<PoolStatusResponse>, ApiError> {
    state
        .execute(|engine, now| engine.deactivate_pool(&request.caller, PoolId(pool), now))
        .await?;
    Ok(Json(PoolStatusResponse {
        pool: PoolId(pool),
        status: PoolStatus::Inactive,
    }))
}

async fn set_apy(
    State(state): State<ServiceState>,
    Path(pool): Path<u32>,
    Json(request): Json<ApyRequest>,
) -> Result<Json<PoolSnapshot>, ApiError> {
    let snapshot = state
        .execute(|engine, now| {
            engine.set_apy(&request.caller, PoolId(pool), request.apy_bps, now)?;
            engine.get_pool(PoolId(pool))
        })
        .await?;
    Ok(Json(snapshot))
}

async fn add_rewards(
    State(state): State<ServiceState>,
    Path(pool): Path<u32>,
    Json(request): Json<AmountRequest>,
) -> Result<Json<AmountResponse>, ApiError> {
    let rewards_pot = state
        .execute(|engine, now| {
            engine.add_rewards_to_pool(&request.caller, PoolId(pool), request.amount, now)
        })
        .await?;
    Ok(Json(AmountResponse {
        pool: Some(PoolId(pool)),
        account: None,
        amount: rewards_pot,
    }))
}

async fn emergency_withdraw(
    State(state): State<ServiceState>,
    Path(pool): Path<u32>,
    Json(request): Json<AdminRequest>,
) -> Result<Json<AmountResponse>, ApiError> {
    let amount = state
        .execute(|engine, now| engine.emergency_withdraw(&request.caller, PoolId(pool), now))
        .await?;
    Ok(Json(AmountResponse {
        pool: Some(PoolId(pool)),
        account: Some(request.caller),
        amount,
    }))
}

async fn fund_account(
    State(state): State<ServiceState>,
    Path(account): Path<String>,
    Json(request): Json<AmountRequest>,
) -> Result<Json<AmountResponse>, ApiError> {
    let account = AccountId::new(account);
    let balance = state
        .execute(|engine, now| engine.fund_account(&request.caller, &account, request.amount, now))
        .await?;
    Ok(Json(AmountResponse {
        pool: None,
        account: Some(account),
        amount: balance,
    }))
}

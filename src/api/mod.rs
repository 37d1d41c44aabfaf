//! HTTP API for health checks, transfer status and submission

use crate::chain::ChainId;
use crate::config::ApiConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::fee::FeeQuote;
use crate::orchestrator::{GasStatus, TrackRequest, TransferOrchestrator, TransferRequest};
use crate::scanner::ScannerSnapshot;
use crate::state::{StateManager, TransferStats};
use crate::transfer::{Transfer, TransferOutcome};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<TransferOrchestrator>,
    pub store: Option<Arc<StateManager>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(orchestrator: Arc<TransferOrchestrator>, store: Option<Arc<StateManager>>) -> Self {
        Self {
            orchestrator,
            store,
            started_at: Instant::now(),
        }
    }
}

/// Routes of the API. Transfer ids contain `/`, hence the wildcard segments.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/status", get(get_status))
        .route("/chains", get(get_chains))
        .route("/stats", get(get_stats))
        .route("/fees", get(get_fees))
        .route("/gas/:chain_id/:account", get(get_gas))
        .route("/transfers", get(list_transfers).post(submit_transfer))
        .route("/transfer/*id", get(get_transfer))
        .route("/track", post(track_transfer))
        .route("/execute/*id", post(execute_call))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server until cancelled
pub async fn run_server(config: ApiConfig, state: AppState, cancel: CancellationToken) -> TrackerResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TrackerError::Internal(format!("API bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| TrackerError::Internal(format!("API server: {}", e)))?;

    Ok(())
}

/// Tracker errors rendered as JSON with a matching status code
struct ApiError(TrackerError);

impl From<TrackerError> for ApiError {
    fn from(e: TrackerError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TrackerError::TransferNotFound { .. } | TrackerError::ChainNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            TrackerError::DuplicateTransfer { .. } => StatusCode::CONFLICT,
            TrackerError::InvalidTransferState { .. } | TrackerError::UnsupportedTransfer(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            TrackerError::WalletUnavailable { .. } | TrackerError::FeeUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            e if e.is_submission_error() => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse {
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - store and chain connectivity
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match &state.store {
        Some(store) => store.health_check().await.is_ok(),
        None => true,
    };

    let details = chain_health(&state).await;
    let chains = details.iter().all(|c| c.healthy);
    let ready = database && chains;

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            ready,
            database,
            chains,
            details,
        }),
    )
}

async fn chain_health(state: &AppState) -> Vec<ChainHealth> {
    state
        .orchestrator
        .chains()
        .health_check()
        .await
        .into_iter()
        .map(|(chain_id, healthy)| ChainHealth { chain_id, healthy })
        .collect()
}

/// Tracker status: uptime, chains and scanners
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        connected_chains: state.orchestrator.chains().connected_chains(),
        chain_status: chain_health(&state).await,
        scanners: state.orchestrator.scanner().snapshots().await,
        active_transfers: state.orchestrator.registry().active().await.len(),
    })
}

/// Configured chains
async fn get_chains(State(state): State<AppState>) -> impl IntoResponse {
    let chains = state
        .orchestrator
        .chains()
        .registry()
        .iter()
        .map(|c| ChainSummary {
            id: c.id.clone(),
            name: c.name.clone(),
            kind: c.kind.to_string(),
            native_symbol: c.native_currency.symbol.clone(),
            auto_execution: c.auto_execution,
        })
        .collect();
    Json(ChainsResponse { chains })
}

/// Transfer counts by status and outcome
async fn get_stats(State(state): State<AppState>) -> ApiResult<StatsResponse> {
    let transfers = state.orchestrator.registry().list().await;

    let mut by_status = BTreeMap::new();
    let mut by_outcome = BTreeMap::new();
    for transfer in &transfers {
        *by_status.entry(transfer.status.as_str().to_string()).or_insert(0u64) += 1;
        *by_outcome.entry(outcome_name(transfer.outcome())).or_insert(0u64) += 1;
    }

    let persisted = match &state.store {
        Some(store) => Some(store.get_stats().await?),
        None => None,
    };

    Ok(Json(StatsResponse {
        total: transfers.len() as u64,
        by_status,
        by_outcome,
        persisted,
    }))
}

fn outcome_name(outcome: TransferOutcome) -> String {
    match outcome {
        TransferOutcome::Pending => "pending",
        TransferOutcome::Completed => "completed",
        TransferOutcome::RollbackRequired => "rollback_required",
        TransferOutcome::RolledBack => "rolled_back",
        TransferOutcome::Failed => "failed",
    }
    .to_string()
}

#[derive(Debug, Deserialize)]
struct FeeParams {
    #[serde(default)]
    with_rollback: bool,
}

/// Protocol fees between every pair of chains
async fn get_fees(State(state): State<AppState>, Query(params): Query<FeeParams>) -> impl IntoResponse {
    Json(FeesResponse {
        fees: state.orchestrator.fees().quote_all(params.with_rollback).await,
    })
}

/// Native balance of an account against the chain's gas threshold
async fn get_gas(
    State(state): State<AppState>,
    Path((chain_id, account)): Path<(String, String)>,
) -> ApiResult<GasStatus> {
    let status = state
        .orchestrator
        .gas_check(&ChainId::from(chain_id), &account)
        .await?;
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    active: bool,
}

/// Known transfers, newest first
async fn list_transfers(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let registry = state.orchestrator.registry();
    let transfers = if params.active {
        registry.active().await
    } else {
        registry.list().await
    };
    Json(TransfersResponse { transfers })
}

async fn get_transfer(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<TransferView> {
    let transfer = state
        .orchestrator
        .registry()
        .get(&id)
        .await
        .ok_or(TrackerError::TransferNotFound { id })?;
    Ok(Json(TransferView::from(transfer)))
}

/// Sign and submit a transfer with the tracker's wallet
async fn submit_transfer(
    State(state): State<AppState>,
    Json(request): Json<TransferRequest>,
) -> Result<(StatusCode, Json<TransferView>), ApiError> {
    let transfer = state.orchestrator.execute_transfer(request).await?;
    Ok((StatusCode::CREATED, Json(TransferView::from(transfer))))
}

/// Track a transaction submitted elsewhere
async fn track_transfer(
    State(state): State<AppState>,
    Json(request): Json<TrackRequest>,
) -> Result<(StatusCode, Json<TransferView>), ApiError> {
    let transfer = state.orchestrator.track_submitted(request).await?;
    Ok((StatusCode::CREATED, Json(TransferView::from(transfer))))
}

#[derive(Debug, Deserialize)]
struct ExecuteBody {
    account: String,
}

/// Execute a delivered message on a chain without auto-execution
async fn execute_call(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ExecuteBody>,
) -> ApiResult<ExecuteResponse> {
    let tx_hash = state.orchestrator.execute_call(&id, &body.account).await?;
    Ok(Json(ExecuteResponse { tx_hash }))
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    database: bool,
    chains: bool,
    details: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain_id: ChainId,
    healthy: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_seconds: u64,
    connected_chains: Vec<ChainId>,
    chain_status: Vec<ChainHealth>,
    scanners: Vec<ScannerSnapshot>,
    active_transfers: usize,
}

#[derive(Serialize)]
struct ChainSummary {
    id: ChainId,
    name: String,
    kind: String,
    native_symbol: String,
    auto_execution: bool,
}

#[derive(Serialize)]
struct ChainsResponse {
    chains: Vec<ChainSummary>,
}

#[derive(Serialize)]
struct StatsResponse {
    total: u64,
    by_status: BTreeMap<String, u64>,
    by_outcome: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    persisted: Option<TransferStats>,
}

#[derive(Serialize)]
struct FeesResponse {
    fees: Vec<FeeQuote>,
}

#[derive(Serialize)]
struct TransfersResponse {
    transfers: Vec<Transfer>,
}

/// A transfer with its derived outcome and human readable status
#[derive(Serialize)]
struct TransferView {
    #[serde(flatten)]
    transfer: Transfer,
    outcome: String,
    label: String,
    message: String,
}

impl From<Transfer> for TransferView {
    fn from(transfer: Transfer) -> Self {
        Self {
            outcome: outcome_name(transfer.outcome()),
            label: transfer.status.label().to_string(),
            message: transfer.source_transaction.message().to_string(),
            transfer,
        }
    }
}

#[derive(Serialize)]
struct ExecuteResponse {
    tx_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::fee::FeeQuoter;
    use crate::scanner::tests::scanner_for;
    use crate::test_utils::FakeIconChain;
    use crate::transfer::TransferRegistry;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> (Arc<FakeIconChain>, Router) {
        let (a, b) = (FakeIconChain::new("0x1.icon"), FakeIconChain::new("0x2.icon"));
        let (manager, scanner) = scanner_for(&[a.clone(), b], &["0x1.icon", "0x2.icon"]);
        let fees = Arc::new(FeeQuoter::new(manager.clone(), Duration::from_secs(30)));
        let orchestrator = TransferOrchestrator::new(
            manager,
            fees,
            scanner,
            Arc::new(TransferRegistry::new()),
            TrackerConfig {
                max_retries: 2,
                retry_delay_ms: 1,
                ..TrackerConfig::default()
            },
            CancellationToken::new(),
        );
        (a, router(AppState::new(Arc::new(orchestrator), None)))
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = tokio_test::assert_ok!(app.clone().oneshot(request).await);
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (_, app) = app();
        let (status, body) = call(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_track_then_get() {
        let (chain, app) = app();
        let hash = chain.submit_call_message_sent(9, "0x2.icon/hxrecipient");
        chain.mine();

        let (status, body) = call(
            &app,
            post(
                "/track",
                json!({
                    "source_chain": "0x1.icon",
                    "destination_chain": "0x2.icon",
                    "tx_hash": hash,
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "TRANSFER_REQUESTED");
        assert_eq!(body["outcome"], "pending");

        let id = body["id"].as_str().unwrap().to_string();
        let (status, body) = call(&app, get(&format!("/transfer/{}", id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source_transaction"]["hash"], hash.as_str());

        let (_, body) = call(&app, get("/transfers?active=true")).await;
        assert_eq!(body["transfers"].as_array().unwrap().len(), 1);

        let (_, body) = call(&app, get("/stats")).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["by_outcome"]["pending"], 1);
    }

    #[tokio::test]
    async fn test_errors_map_to_status_codes() {
        let (_, app) = app();

        let (status, body) = call(&app, get("/transfer/0x1.icon/0xmissing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("0xmissing"));

        let track = json!({
            "source_chain": "0x1.icon",
            "destination_chain": "0x2.icon",
            "tx_hash": "0xabc",
            "destination_start_height": 10,
        });
        let (status, _) = call(&app, post("/track", track.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = call(&app, post("/track", track)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&app, get("/gas/nowhere/hxsender")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_fees() {
        let (chain, app) = app();
        chain.set_fee(2500);

        let (status, body) = call(&app, get("/fees?with_rollback=true")).await;
        assert_eq!(status, StatusCode::OK);
        let fees = body["fees"].as_array().unwrap();
        assert_eq!(fees.len(), 2);
        let from_icon = fees.iter().find(|f| f["source"] == "0x1.icon").unwrap();
        assert_eq!(from_icon["fee"], "2500");
    }
}

//! REST API server for PeerChain
//!
//! Exposes the ledger, mining, peer registry and consensus operations of a
//! [`Node`] over HTTP. Handlers only translate between JSON and node calls.

use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{self, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::blockchain::Block;
use crate::error::ChainError;
use crate::network::{ChainResponse, NewTransactionRequest, NodesResponse, PendingResponse, RegisterRequest};
use crate::node::{BlockOutcome, Node, NodeState, NodeStats};
use crate::transaction::Transaction;

/// Shared handler state: the node plus request counters.
#[derive(Clone)]
pub struct ApiState {
    node: Arc<Node>,
    stats: Arc<RwLock<ApiStats>>,
}

impl ApiState {
    pub fn new(node: Arc<Node>) -> Self {
        ApiState {
            node,
            stats: Arc::new(RwLock::new(ApiStats::default())),
        }
    }
}

/// API statistics and monitoring
#[derive(Debug, Default, Clone, Serialize)]
struct ApiStats {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    transactions_submitted: u64,
}

impl ApiStats {
    fn record_request(&mut self, success: bool) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
    }
}

// ============================================================================
// API Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BlockchainError(ChainError),
    InvalidInput(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BlockchainError(e) => {
                let status = match &e {
                    ChainError::InvalidTransaction(_) | ChainError::InvalidPeerAddress(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    e if e.is_validation_failure() => StatusCode::CONFLICT,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        ApiError::BlockchainError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidInput(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
pub struct MineResponse {
    pub message: String,
    #[serde(flatten)]
    pub block: Block,
}

#[derive(Serialize)]
pub struct TransactionResponse {
    pub message: String,
    pub index: u64,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub message: String,
    pub total_nodes: Vec<String>,
}

#[derive(Serialize)]
pub struct ResolveResponse {
    pub message: String,
    pub replaced: bool,
    pub chain: Vec<Block>,
    pub length: usize,
}

#[derive(Serialize)]
pub struct DiscoverResponse {
    pub added: usize,
    pub nodes: Vec<String>,
}

#[derive(Serialize)]
pub struct BlockAcceptedResponse {
    pub message: String,
    pub length: usize,
    pub replaced: bool,
}

#[derive(Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub node: NodeStats,
    pub api: serde_json::Value,
}

// ============================================================================
// Middleware
// ============================================================================

async fn stats_middleware(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    let response = next.run(req).await;

    let success = response.status().is_success();
    state.stats.write().await.record_request(success);

    response
}

/// Logs method, path, status and duration of every request.
async fn logging_middleware(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    let duration = start.elapsed();
    let status = response.status();
    let node_state = state.node.state().await;

    tracing::info!(
        method = %method,
        path = %path,
        status = %status.as_u16(),
        duration_ms = %duration.as_millis(),
        node_state = ?node_state,
        "api.request"
    );

    response
}

// ============================================================================
// API Server
// ============================================================================

/// Build the API router with all endpoints
pub fn build_api_router(node: Arc<Node>) -> Router {
    let state = ApiState::new(node);

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(vec![
            http::Method::GET,
            http::Method::POST,
            http::Method::OPTIONS,
        ])
        .allow_headers(vec![http::header::CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        // Ledger
        .route("/mine", get(mine))
        .route("/chain", get(full_chain))
        .route("/blocks/new", post(receive_block))
        // Transactions
        .route("/transactions/new", post(new_transaction))
        .route("/transactions/pending", get(pending_transactions))
        // Peers & consensus
        .route("/nodes/list", get(list_nodes))
        .route("/nodes/register", post(register_nodes))
        .route("/nodes/discover", get(discover_nodes))
        .route("/nodes/resolve", get(resolve_conflicts))
        // Monitoring
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .layer(middleware::from_fn_with_state(state.clone(), stats_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), logging_middleware))
        .layer(cors)
        .with_state(state)
}

/// Serve the API on an already bound listener until the server stops.
pub async fn run_api_server(node: Arc<Node>, listener: TcpListener) -> Result<(), ChainError> {
    let app = build_api_router(node);
    tracing::info!(address = ?listener.local_addr().ok(), "API server started");
    axum::serve(listener, app).await?;
    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn health_check(State(state): State<ApiState>) -> impl IntoResponse {
    let node_state = state.node.state().await;
    let (status, label) = match node_state {
        NodeState::Ready => (StatusCode::OK, "healthy"),
        NodeState::Booting | NodeState::Syncing => (StatusCode::OK, "starting"),
        NodeState::Degraded => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
    };
    (
        status,
        Json(serde_json::json!({
            "status": label,
            "node_state": format!("{:?}", node_state),
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}

async fn mine(State(state): State<ApiState>) -> Result<Json<MineResponse>, ApiError> {
    let block = state.node.mine().await?;
    Ok(Json(MineResponse {
        message: "New Block Forged".to_string(),
        block,
    }))
}

async fn full_chain(State(state): State<ApiState>) -> Json<ChainResponse> {
    let chain = state.node.chain().await;
    Json(ChainResponse {
        length: chain.len(),
        chain,
    })
}

async fn receive_block(
    State(state): State<ApiState>,
    payload: Result<Json<Block>, JsonRejection>,
) -> Result<Json<BlockAcceptedResponse>, ApiError> {
    let Json(block) = payload?;
    let response = match state.node.receive_block(block).await? {
        BlockOutcome::Appended { index } => BlockAcceptedResponse {
            message: format!("Block {} appended", index),
            length: index as usize + 1,
            replaced: false,
        },
        BlockOutcome::Resolved(resolution) => BlockAcceptedResponse {
            message: if resolution.replaced {
                "Our chain was replaced".to_string()
            } else {
                "Our chain is authoritative".to_string()
            },
            length: resolution.length,
            replaced: resolution.replaced,
        },
    };
    Ok(Json(response))
}

async fn new_transaction(
    State(state): State<ApiState>,
    payload: Result<Json<NewTransactionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TransactionResponse>), ApiError> {
    let Json(req) = payload?;
    let submission = state
        .node
        .submit_transaction(req.sender, req.recipient, req.amount)
        .await?;
    if submission.accepted {
        state.stats.write().await.transactions_submitted += 1;
    }

    let message = if submission.accepted {
        format!("Transaction will be added to Block {}", submission.block_index)
    } else {
        format!("Transaction already known, expected in Block {}", submission.block_index)
    };
    Ok((
        StatusCode::CREATED,
        Json(TransactionResponse {
            message,
            index: submission.block_index,
        }),
    ))
}

async fn pending_transactions(State(state): State<ApiState>) -> Json<PendingResponse> {
    let transactions: Vec<Transaction> = state.node.pending().await;
    Json(PendingResponse { transactions })
}

fn peer_strings(node: &Node) -> Vec<String> {
    node.list_peers().iter().map(ToString::to_string).collect()
}

async fn list_nodes(State(state): State<ApiState>) -> Json<NodesResponse> {
    Json(NodesResponse {
        nodes: peer_strings(&state.node),
    })
}

async fn register_nodes(
    State(state): State<ApiState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let Json(req) = payload?;
    state.node.register_peers(req.nodes.as_slice())?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "New nodes have been added".to_string(),
            total_nodes: peer_strings(&state.node),
        }),
    ))
}

async fn discover_nodes(State(state): State<ApiState>) -> Json<DiscoverResponse> {
    let added = state.node.discover().await;
    Json(DiscoverResponse {
        added,
        nodes: peer_strings(&state.node),
    })
}

async fn resolve_conflicts(State(state): State<ApiState>) -> Json<ResolveResponse> {
    let resolution = state.node.resolve().await;
    let chain = state.node.chain().await;
    let message = if resolution.replaced {
        "Our chain was replaced"
    } else {
        "Our chain is authoritative"
    };
    Json(ResolveResponse {
        message: message.to_string(),
        replaced: resolution.replaced,
        length: chain.len(),
        chain,
    })
}

async fn get_stats(State(state): State<ApiState>) -> Result<Json<StatsResponse>, ApiError> {
    let node = state.node.stats().await;
    let api = serde_json::to_value(state.stats.read().await.clone())
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    Ok(Json(StatsResponse { node, api }))
}

//! # REST API
//!
//! Builds the axum router that exposes the node's HTTP interface. All
//! endpoints share application state through axum's `State` extractor.
//! Hashes go in and out as 81-character tryte strings.
//!
//! ## Endpoints
//!
//! | Method | Path                   | Description                         |
//! |--------|------------------------|-------------------------------------|
//! | GET    | `/health`              | Liveness check                      |
//! | GET    | `/status`              | Node status summary                 |
//! | GET    | `/neighbors`           | Neighbors and their counters        |
//! | GET    | `/tips`                | Current tip hashes                  |
//! | GET    | `/transactions/:hash`  | Transaction by hash                 |
//! | GET    | `/milestones/latest`   | Latest known milestone              |

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use tangle_protocol::crypto::Hash;
use tangle_protocol::ledger::{MilestoneIndex, TipIndex};
use tangle_protocol::network::{GossipEngine, GossipStats, NeighborStats};
use tangle_protocol::storage::Tangle;
use tangle_protocol::transaction::ternary::trits_to_trytes;
use tangle_protocol::transaction::{TransactionRecord, TransactionType};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone. Everything is behind `Arc` or is itself a handle.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    pub tangle: Tangle,
    pub engine: Arc<GossipEngine>,
    pub tips: Arc<TipIndex>,
    pub milestones: Arc<MilestoneIndex>,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/neighbors", get(neighbors_handler))
        .route("/tips", get(tips_handler))
        .route("/transactions/:hash", get(transaction_by_hash_handler))
        .route("/milestones/latest", get(latest_milestone_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub transactions: u64,
    pub tips: usize,
    pub solid_tips: usize,
    pub latest_milestone: Option<MilestoneResponse>,
    pub gossip: GossipStats,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TipsResponse {
    pub count: usize,
    pub hashes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MilestoneResponse {
    pub index: u32,
    pub hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub hash: String,
    pub trytes: String,
    pub address: String,
    pub value: i64,
    pub tag: String,
    pub timestamp: i64,
    pub current_index: i64,
    pub last_index: i64,
    pub bundle: String,
    pub trunk: String,
    pub branch: String,
    pub weight_magnitude: u32,
    pub solid: bool,
    pub confirmed: bool,
    pub height: u64,
    pub arrival_time: i64,
    pub sender: String,
    pub approvers: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — returns 200 if the node is alive.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status` — node status summary.
///
/// A storage failure while counting transactions is reported as zero
/// rather than failing the whole status reply.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let transactions = match TransactionRecord::count(&state.tangle).await {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!(error = %e, "status: cannot count transactions");
            0
        }
    };

    Json(StatusResponse {
        version: state.version.clone(),
        transactions,
        tips: state.tips.size(),
        solid_tips: state.tips.solid_size(),
        latest_milestone: state.milestones.latest_known().map(|m| MilestoneResponse {
            index: m.index,
            hash: m.hash.to_trytes(),
        }),
        gossip: state.engine.stats(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `GET /neighbors` — neighbors with their traffic counters.
async fn neighbors_handler(State(state): State<AppState>) -> Json<Vec<NeighborStats>> {
    Json(state.engine.neighbor_stats())
}

/// `GET /tips` — every current tip, solid or not.
async fn tips_handler(State(state): State<AppState>) -> Json<TipsResponse> {
    let hashes: Vec<String> = state.tips.tips().iter().map(Hash::to_trytes).collect();
    Json(TipsResponse {
        count: hashes.len(),
        hashes,
    })
}

/// `GET /transactions/:hash` — transaction by tryte hash.
///
/// Returns 400 for a malformed hash and 404 if the payload is not stored.
async fn transaction_by_hash_handler(
    Path(hash): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let hash = match Hash::from_trytes(&hash) {
        Ok(hash) => hash,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("Invalid hash: {}", e)),
    };

    let record = match TransactionRecord::load(&state.tangle, hash).await {
        Ok(record) if record.tx_type() == TransactionType::Filled => record,
        Ok(_) => {
            return error_response(
                StatusCode::NOT_FOUND,
                format!("Transaction not found: {}", hash.to_trytes()),
            )
        }
        Err(e) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Storage error: {}", e),
            )
        }
    };

    let approvers = match record.approvers(&state.tangle).await {
        Ok(approvers) => approvers.iter().map(Hash::to_trytes).collect(),
        Err(e) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Storage error: {}", e),
            )
        }
    };
    let trytes = match trits_to_trytes(record.trits()) {
        Ok(trytes) => trytes,
        Err(e) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Encoding error: {}", e),
            )
        }
    };

    let resp = TransactionResponse {
        hash: record.hash().to_trytes(),
        trytes,
        address: record.address().to_trytes(),
        value: record.value(),
        tag: record.tag().to_trytes(),
        timestamp: record.timestamp(),
        current_index: record.current_index(),
        last_index: record.last_index(),
        bundle: record.bundle().to_trytes(),
        trunk: record.trunk().to_trytes(),
        branch: record.branch().to_trytes(),
        weight_magnitude: record.weight_magnitude(),
        solid: record.is_solid(),
        confirmed: record.is_confirmed(),
        height: record.height(),
        arrival_time: record.arrival_time(),
        sender: record.sender(),
        approvers,
    };
    (StatusCode::OK, Json(resp)).into_response()
}

/// `GET /milestones/latest` — the highest stored milestone.
async fn latest_milestone_handler(State(state): State<AppState>) -> Response {
    match state.milestones.latest().await {
        Ok(Some(m)) => (
            StatusCode::OK,
            Json(MilestoneResponse {
                index: m.index,
                hash: m.hash.to_trytes(),
            }),
        )
            .into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "No milestone stored yet".into()),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Storage error: {}", e),
        ),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

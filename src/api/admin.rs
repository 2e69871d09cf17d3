//! Admin API handlers for blocklist, config, and history inspection.
//!
//! These endpoints exist for operability and are not on the hot path.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;
use validator::Validate;

use crate::app::AppState;
use crate::domain::{
    AppError, BatchStatus, BlocklistEntry, DatabaseError, PaginatedResponse, PaginationParams,
    TipHistory, TippingConfig, ValidationError,
};

/// Response for single-address blocklist operations
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BlocklistResponse {
    pub success: bool,
    pub message: String,
}

/// Response for listing all blocklist entries
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListBlocklistResponse {
    pub count: usize,
    pub entries: Vec<BlocklistEntry>,
}

/// Response for the clear-all operation
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ClearBlocklistResponse {
    pub success: bool,
    /// Number of entries dropped
    pub cleared: u64,
}

/// Settlement batch summary for inspection
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BatchResponse {
    pub id: String,
    pub status: BatchStatus,
    pub tx_ref: Option<String>,
    pub last_error: Option<String>,
    pub item_count: usize,
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// List all blocklisted addresses
#[utoipa::path(
    get,
    path = "/admin/blocklist",
    tag = "admin",
    responses(
        (status = 200, description = "Current blocklist snapshot", body = ListBlocklistResponse),
    )
)]
pub async fn list_blocklist_handler(
    State(state): State<Arc<AppState>>,
) -> Json<ListBlocklistResponse> {
    let entries = state.blocklist.snapshot();
    Json(ListBlocklistResponse {
        count: entries.len(),
        entries,
    })
}

/// Clear the entire blocklist.
///
/// Always safe: membership is a cache of chain state, and the next
/// admission attempt for any address re-derives it through the slow path.
#[utoipa::path(
    delete,
    path = "/admin/blocklist",
    tag = "admin",
    responses(
        (status = 200, description = "Blocklist cleared", body = ClearBlocklistResponse),
    )
)]
pub async fn clear_blocklist_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ClearBlocklistResponse>, AppError> {
    let cleared = state.blocklist.clear_all().await?;

    warn!(cleared = cleared, "Admin cleared the blocklist");

    Ok(Json(ClearBlocklistResponse {
        success: true,
        cleared,
    }))
}

/// Remove a single address from the blocklist
#[utoipa::path(
    delete,
    path = "/admin/blocklist/{address}",
    tag = "admin",
    params(
        ("address" = String, Path, description = "Wallet address to reset")
    ),
    responses(
        (status = 200, description = "Address removed from blocklist", body = BlocklistResponse),
        (status = 404, description = "Address not found in blocklist", body = crate::domain::ErrorResponse),
    )
)]
pub async fn remove_blocklist_handler(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<Json<BlocklistResponse>, AppError> {
    if state.blocklist.remove(&address).await? {
        warn!(address = %address, "Admin removed address from blocklist");
        Ok(Json(BlocklistResponse {
            success: true,
            message: format!("Address {} removed from blocklist", address),
        }))
    } else {
        Err(AppError::Database(DatabaseError::NotFound(format!(
            "Address {} not found in blocklist",
            address
        ))))
    }
}

/// Read a recipient's resolved tipping configuration
#[utoipa::path(
    get,
    path = "/admin/configs/{fid}",
    tag = "admin",
    params(
        ("fid" = u64, Path, description = "Recipient's social identifier")
    ),
    responses(
        (status = 200, description = "Tipping configuration", body = TippingConfig),
        (status = 404, description = "Recipient not configured", body = crate::domain::ErrorResponse),
    )
)]
pub async fn get_config_handler(
    State(state): State<Arc<AppState>>,
    Path(fid): Path<u64>,
) -> Result<Json<TippingConfig>, AppError> {
    let config = state
        .store
        .get_tipping_config(fid)
        .await?
        .ok_or_else(|| AppError::Database(DatabaseError::NotFound(format!("fid {}", fid))))?;
    Ok(Json(config))
}

/// List confirmed tips with pagination
#[utoipa::path(
    get,
    path = "/admin/history",
    tag = "admin",
    params(
        ("limit" = Option<i64>, Query, description = "Maximum number of records to return (1-100, default: 20)"),
        ("cursor" = Option<String>, Query, description = "Cursor for pagination (row id to start after)")
    ),
    responses(
        (status = 200, description = "Confirmed tip history", body = PaginatedResponse<TipHistory>),
        (status = 400, description = "Invalid pagination parameters", body = crate::domain::ErrorResponse),
    )
)]
pub async fn list_history_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<PaginatedResponse<TipHistory>>, AppError> {
    params
        .validate()
        .map_err(|e| AppError::Validation(ValidationError::Malformed(e.to_string())))?;

    let history = state
        .store
        .list_tip_history(params.limit, params.cursor.as_deref())
        .await?;
    Ok(Json(history))
}

/// Inspect a settlement batch
pub async fn get_batch_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BatchResponse>, AppError> {
    let batch = state
        .store
        .get_batch(&id)
        .await?
        .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id)))?;

    Ok(Json(BatchResponse {
        id: batch.id,
        status: batch.status,
        tx_ref: batch.tx_ref,
        last_error: batch.last_error,
        item_count: batch.items.len(),
        submitted_at: batch.submitted_at,
        created_at: batch.created_at,
    }))
}

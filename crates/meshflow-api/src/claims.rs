use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::{error, info};

use meshflow_ingest::claim::generate_claim_key;
use meshflow_types::api::{ClaimResponse, Claims};
use meshflow_types::hex_to_node_id;

use crate::state::AppState;

/// Node ids in paths may be decimal (`987654321`) or Meshtastic hex (`!3ade68b1`).
fn parse_node_id(raw: &str) -> Result<i64, StatusCode> {
    raw.parse::<i64>()
        .ok()
        .or_else(|| hex_to_node_id(raw))
        .ok_or(StatusCode::BAD_REQUEST)
}

/// `POST /api/nodes/{node_id}/claim` -- start claiming a node; the response carries
/// the key to send from the radio as a direct message.
pub async fn create_claim(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let node_id = parse_node_id(&node_id)?;

    let db = state.db.clone();
    let user_id = claims.sub;
    let claim = tokio::task::spawn_blocking(move || {
        db.get_observed_node(node_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::NOT_FOUND)?;

        db.create_claim(node_id, user_id, &generate_claim_key(), Utc::now())
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::CONFLICT)
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })??;

    info!("{} ({}) started a claim on node {}", claims.username, user_id, node_id);
    Ok((StatusCode::CREATED, Json(ClaimResponse::from(claim))))
}

/// `GET /api/nodes/{node_id}/claim` -- the caller's claim on a node.
pub async fn get_claim(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let node_id = parse_node_id(&node_id)?;

    let db = state.db.clone();
    let claim = tokio::task::spawn_blocking(move || db.get_claim(node_id, claims.sub))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(ClaimResponse::from(claim)))
}

/// `DELETE /api/nodes/{node_id}/claim` -- withdraw the caller's claim.
pub async fn delete_claim(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let node_id = parse_node_id(&node_id)?;

    let db = state.db.clone();
    let deleted = tokio::task::spawn_blocking(move || db.delete_claim(node_id, claims.sub))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

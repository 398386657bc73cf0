use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};
use tracing::error;

use meshflow_ingest::IngestError;
use meshflow_types::api::IngestResponse;
use meshflow_types::models::ManagedNode;

use crate::state::AppState;

/// `POST /api/packets/ingest` -- one packet as uploaded by a gateway.
pub async fn ingest_packet(
    State(state): State<AppState>,
    Extension(observer): Extension<ManagedNode>,
    Json(payload): Json<Value>,
) -> Result<impl IntoResponse, Response> {
    // Run blocking DB work off the async runtime
    let service = state.ingest.clone();
    let outcome = tokio::task::spawn_blocking(move || service.ingest(&observer, &payload))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })?
        .map_err(reject)?;

    Ok((
        StatusCode::CREATED,
        Json(IngestResponse {
            status: "success",
            message: "Packet ingested successfully".into(),
            warnings: outcome.warnings,
        }),
    ))
}

fn reject(err: IngestError) -> Response {
    match err {
        IngestError::Invalid { field, reason } => {
            let mut body = Map::new();
            body.insert(field, Value::String(reason));
            (StatusCode::BAD_REQUEST, Json(Value::Object(body))).into_response()
        }
        IngestError::Storage(e) => {
            error!("Packet ingest failed: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": "Packet could not be stored" })),
            )
                .into_response()
        }
    }
}

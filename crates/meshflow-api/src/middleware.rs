use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{error, warn};

use meshflow_db::models::ApiKeyLookup;
use meshflow_types::api::Claims;

use crate::state::AppState;

/// Validate a JWT signed with the server secret.
pub fn decode_token(secret: &str, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

/// Extract and validate JWT from Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = decode_token(&state.jwt_secret, token).ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Resolve a gateway API key to the managed node it uploads for.
///
/// Accepts `X-API-KEY: <key>` or `Authorization: Token <key>`. The observer is
/// stored in request extensions for the ingest handler.
pub async fn require_node_key(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let key = node_key(req.headers()).ok_or(StatusCode::UNAUTHORIZED)?;

    let db = state.db.clone();
    let lookup = tokio::task::spawn_blocking(move || db.observer_for_api_key(&key, Utc::now()))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("API key lookup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let observer = match lookup {
        ApiKeyLookup::Observer(node) => node,
        ApiKeyLookup::Unknown => return Err(StatusCode::UNAUTHORIZED),
        ApiKeyLookup::Unlinked => {
            warn!("API key is not linked to a managed node");
            return Err(StatusCode::FORBIDDEN);
        }
        ApiKeyLookup::Ambiguous => {
            warn!("API key is linked to several managed nodes");
            return Err(StatusCode::FORBIDDEN);
        }
    };

    req.extensions_mut().insert(observer);
    Ok(next.run(req).await)
}

fn node_key(headers: &HeaderMap) -> Option<String> {
    let from_header = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    let from_auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Token "));

    from_header
        .or(from_auth)
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

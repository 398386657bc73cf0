use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::claims;
use crate::ingest::ingest_packet;
use crate::middleware::{require_auth, require_node_key};
use crate::state::AppState;

/// REST surface: gateway uploads (API key) and node claims (JWT).
pub fn api_routes(state: AppState) -> Router {
    let gateway_routes = Router::new()
        .route("/api/packets/ingest", post(ingest_packet))
        .layer(middleware::from_fn_with_state(state.clone(), require_node_key))
        .with_state(state.clone());

    let user_routes = Router::new()
        .route(
            "/api/nodes/{node_id}/claim",
            get(claims::get_claim).post(claims::create_claim).delete(claims::delete_claim),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().merge(gateway_routes).merge(user_routes)
}

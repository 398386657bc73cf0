mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use meshflow_api::middleware::decode_token;
use meshflow_api::{AppStateInner, api_routes};
use meshflow_gateway::{Notifier, connection};
use meshflow_ingest::IngestService;

use crate::config::Config;

#[derive(Clone)]
struct ServerState {
    notifier: Notifier,
    jwt_secret: String,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meshflow=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(meshflow_db::Database::open(&config.db_path)?);

    // Shared state
    let notifier = Notifier::new(config.broadcast_capacity);
    let app_state = Arc::new(AppStateInner {
        db: db.clone(),
        ingest: IngestService::new(db, Arc::new(notifier.clone())),
        jwt_secret: config.jwt_secret.clone(),
    });

    let state = ServerState {
        notifier,
        jwt_secret: config.jwt_secret.clone(),
    };

    // Routes
    let ws_route = Router::new()
        .route("/ws/messages", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(api_routes(app_state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Meshflow listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Validate the viewer's JWT at the HTTP upgrade, then stream messages.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let Some(claims) = query
        .token
        .as_deref()
        .and_then(|token| decode_token(&state.jwt_secret, token))
    else {
        warn!("Rejected message stream upgrade without a valid token");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    ws.on_upgrade(move |socket| {
        connection::handle_viewer(socket, state.notifier, claims.sub, claims.username)
    })
}

use axum::{
    extract::State,
    http::Method,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use haven_core::router::RouterCommand;

use crate::ws;

#[derive(Clone)]
pub struct AppState {
    /// Command queue of the router task.
    pub commands: mpsc::UnboundedSender<RouterCommand>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws::handle_websocket))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
    connections: usize,
    servers: usize,
    users: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let (reply, rx) = oneshot::channel();
    let stats = if state.commands.send(RouterCommand::Stats { reply }).is_ok() {
        rx.await.ok()
    } else {
        None
    };

    match stats {
        Some(stats) => Json(HealthResponse {
            status: "ok",
            timestamp: Utc::now(),
            connections: stats.connections,
            servers: stats.communities,
            users: stats.identities,
        }),
        // Router task is gone; report degraded rather than hanging.
        None => Json(HealthResponse {
            status: "degraded",
            timestamp: Utc::now(),
            connections: 0,
            servers: 0,
            users: 0,
        }),
    }
}

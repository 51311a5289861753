//! HTTP read endpoint.
//!
//! Provides:
//! - `/albums` - Most recently updated albums as pretty-printed JSON
//!
//! Every request runs its own read-only transaction on a pooled session. A
//! failed request answers 500 with an empty body; the cause is only logged.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::catalog::list_recent_albums;
use crate::storage::Client;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    client: Client,
    default_limit: u32,
}

impl AppState {
    pub fn new(client: Client, default_limit: u32) -> Self {
        Self {
            client,
            default_limit,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AlbumsParams {
    limit: Option<u32>,
}

/// Create the HTTP router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/albums", get(albums_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handle GET /albums.
async fn albums_handler(
    State(state): State<AppState>,
    Query(params): Query<AlbumsParams>,
) -> Response {
    let limit = params.limit.unwrap_or(state.default_limit);

    let albums = match list_recent_albums(&state.client, limit).await {
        Ok(albums) => albums,
        Err(e) => {
            tracing::error!(error = %e, limit, "Failed to list albums");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match serde_json::to_vec_pretty(&albums) {
        Ok(mut body) => {
            body.push(b'\n');
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode albums");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Run the HTTP server until `shutdown_rx` changes.
pub async fn run_http_server(
    addr: SocketAddr,
    state: AppState,
    mut shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "Starting HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
            tracing::info!("HTTP server shutting down");
        })
        .await?;

    Ok(())
}

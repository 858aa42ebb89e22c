use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{Method, StatusCode, Uri, header},
    response::IntoResponse,
    routing::get,
};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{MetricsAggregator, render_exposition};
use crate::error::BridgeError;

#[derive(Clone)]
pub struct MetricsState {
    pub metrics: Arc<MetricsAggregator>,
    /// Upstream address used as the `repo` label.
    pub repo: Arc<str>,
    /// Log every request.
    pub debug: bool,
}

pub fn build_metrics_router(state: MetricsState) -> Router {
    Router::new()
        .route("/_metrics", get(get_metrics))
        .fallback(not_found)
        .with_state(state)
}

async fn get_metrics(
    State(state): State<MetricsState>,
    method: Method,
    uri: Uri,
) -> impl IntoResponse {
    if state.debug {
        info!("HTTP {method} {uri}");
    }
    let body = render_exposition(&state.metrics.snapshot(), &state.repo);
    ([(header::CONTENT_TYPE, "text/plain")], body)
}

async fn not_found(
    State(state): State<MetricsState>,
    method: Method,
    uri: Uri,
) -> impl IntoResponse {
    if state.debug {
        info!("HTTP {method} {uri}");
    }
    (StatusCode::NOT_FOUND, "Not Found")
}

/// Binds `listen` and serves the metrics router until `token` is cancelled.
pub async fn serve_metrics(
    listen: &str,
    state: MetricsState,
    token: CancellationToken,
) -> Result<JoinHandle<()>, BridgeError> {
    let listener = TcpListener::bind(listen)
        .await
        .map_err(|e| BridgeError::connection(format!("metrics {listen}"), e))?;
    let local = listener
        .local_addr()
        .map_err(|e| BridgeError::connection(format!("metrics {listen}"), e))?;
    info!("Metrics endpoint active: http://{local}/_metrics");
    let router = build_metrics_router(state);
    let handle = tokio::spawn(async move {
        let shutdown = async move { token.cancelled().await };
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            warn!(error = %e, "metrics server stopped with error");
        }
    });
    Ok(handle)
}

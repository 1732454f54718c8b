//! Axum-based HTTP and WebSocket server.

use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade},
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::connection::handle_ws_connection;
use crate::state::GatewayState;

const BANNER: &str = "<!doctype html>
<html>
<head><title>voxrelay</title></head>
<body>
<h1>voxrelay</h1>
<p>Voice relay is running. Stream audio chunks to <code>/ws</code>.</p>
</body>
</html>
";

/// Build the application router.
pub fn router(state: Arc<GatewayState>) -> Router {
    let app = Router::new()
        .route("/", get(index_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(metrics_handler));

    app.layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the gateway and serve until Ctrl-C.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let bind_addr = state.config.gateway_bind();
    let transcriber = state.engines.transcriber.describe();
    let tts = state
        .engines
        .synthesizer
        .as_ref()
        .map(|s| s.describe())
        .unwrap_or_else(|| "disabled".to_string());

    let app = router(state);

    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%transcriber, %tts, "Gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(BANNER)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(state, socket))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let sessions = state.session_count().await;
    let tts = state
        .engines
        .synthesizer
        .as_ref()
        .map(|s| s.describe());

    axum::Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": sessions,
        "turns": state.turns_total(),
        "transcriber": state.engines.transcriber.describe(),
        "generator": state.engines.generator.model(),
        "tts": tts,
    }))
}

#[cfg(feature = "metrics")]
async fn metrics_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (axum::http::StatusCode::OK, handle.render()),
        None => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        ),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(%e, "Failed to listen for Ctrl-C; shutdown only on process exit");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

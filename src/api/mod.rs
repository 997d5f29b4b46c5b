mod errors;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::engine::Engine;

/// Shared application state accessible by all handlers.
pub struct AppState {
    pub engine: Arc<Engine>,
}

/// Build the HTTP router around an engine.
pub fn router(engine: Arc<Engine>, max_body: usize) -> Router {
    let state = Arc::new(AppState { engine });

    Router::new()
        .route(
            "/executions",
            post(handlers::start_execution).get(handlers::list_executions),
        )
        .route(
            "/executions/{id}",
            get(handlers::get_execution).delete(handlers::cancel_execution),
        )
        .route("/executions/{id}/resume", post(handlers::resume_execution))
        .route("/graph", get(handlers::get_graph))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the REST API server.
pub async fn serve(host: &str, port: u16, engine: Arc<Engine>, max_body: usize) -> Result<()> {
    let app = router(engine, max_body);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("InfraFlow API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

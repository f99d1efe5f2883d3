//! HTTP API over the resolver.

mod handlers;
mod state;

use axum::routing::{get, post};
use axum::Router;
use state::AppState;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::location::LocationResolver;

pub fn build_router(resolver: Arc<LocationResolver>) -> Router {
    let state = Arc::new(AppState { resolver });

    Router::new()
        .route("/api/resolve", get(handlers::resolve))
        .route("/api/package", post(handlers::package))
        .route("/api/quality", get(handlers::quality))
        .route("/api/sites", get(handlers::sites))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start(resolver: Arc<LocationResolver>, host: &str, port: u16) -> std::io::Result<()> {
    let app = build_router(resolver);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(%addr, "geofuse server listening");
    eprintln!("  geofuse server listening on http://{}", addr);
    eprintln!("  Press Ctrl+C to stop.");

    axum::serve(listener, app).await
}

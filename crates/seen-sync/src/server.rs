//! Axum HTTP server: router, listener, graceful shutdown.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::response::Response;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::SyncConfig;
use crate::handler::SeenHandler;

/// Shared application state.
pub struct AppState {
    pub config: SyncConfig,
    pub handler: SeenHandler,
}

/// Build the router.
///
/// There are no explicit routes: every path and method goes to the seen-list
/// handler so that 404/405 responses and CORS headers come from one place.
pub fn router(state: AppState) -> Router {
    Router::new()
        .fallback(handle_request)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Bind the configured address and serve until Ctrl+C.
pub async fn run(state: AppState) -> anyhow::Result<()> {
    let listen_addr = state.config.server.listen_address.clone();
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "seen-sync listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("seen-sync shut down gracefully");
    Ok(())
}

async fn handle_request(State(state): State<Arc<AppState>>, request: Request) -> Response {
    state.handler.handle(request).await
}

/// Wait for SIGINT (Ctrl+C) for graceful shutdown.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler, graceful shutdown disabled");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections...");
}

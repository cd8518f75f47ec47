//! HTTP boundary for the session runner.
//!
//! Exposes `POST /api/run` (an SSE stream of the session's events),
//! `POST /api/stop`, `GET /api/sessions`, and a `GET /health` probe on an
//! axum router. Every route shares one [`AppState`].

pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::GlobalConfig;
use crate::runner::SessionRunner;
use crate::{AppError, Result};

/// State shared by all route handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<GlobalConfig>,
    /// Session runner owning the registry.
    pub runner: SessionRunner,
    /// Cancelled on server shutdown; open streams end when it fires.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Build state with a fresh runner for `config`.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>, shutdown: CancellationToken) -> Self {
        let runner = SessionRunner::new(&config);
        Self {
            config,
            runner,
            shutdown,
        }
    }
}

/// Build the router with every route mounted.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/run", post(handlers::run))
        .route("/api/stop", post(handlers::stop))
        .route("/api/sessions", get(handlers::list))
        .with_state(state)
}

/// Bind `config.bind_addr()` and serve until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Config` if the listener cannot bind, or
/// `AppError::Http` if the server fails while running.
pub async fn serve(state: Arc<AppState>, ct: CancellationToken) -> Result<()> {
    let bind = state.config.bind_addr();
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind HTTP on {bind}: {err}")))?;
    serve_on(listener, state, ct).await
}

/// Serve on an already-bound listener until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Http` if the server fails while running.
pub async fn serve_on(
    listener: TcpListener,
    state: Arc<AppState>,
    ct: CancellationToken,
) -> Result<()> {
    let local = listener
        .local_addr()
        .map_err(|err| AppError::Http(format!("listener has no local address: {err}")))?;
    info!(%local, project_root = %state.config.project_root.display(), "starting HTTP server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Http(format!("server error: {err}")))?;

    info!("HTTP server shut down");
    Ok(())
}

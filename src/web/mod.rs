//! Admin HTTP surface: outbox inspection and manual drain triggers.

pub mod error;
pub mod handlers;

use crate::sync::ReconcileEngine;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use error::{ErrorResponse, WebError};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconcileEngine>,
}

impl AppState {
    pub fn new(engine: Arc<ReconcileEngine>) -> Self {
        Self { engine }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/v1/orgs/:org_id/sync-records",
            get(handlers::list_sync_records),
        )
        .route("/api/v1/sync/run", post(handlers::run_sync))
        .route(
            "/api/v1/sync-records/:sync_id/retry",
            post(handlers::retry_sync_record),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

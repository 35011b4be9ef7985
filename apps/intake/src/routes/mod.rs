pub mod debug;
pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::intake::handlers;
use crate::state::AppState;

/// Room for multipart boundaries and the text fields on top of the file itself,
/// so an oversized file is still read far enough to report its limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD;
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/test", get(debug::handle_test))
        .route("/echo", get(debug::handle_echo).post(debug::handle_echo))
        .route(
            "/upload",
            post(handlers::handle_upload).get(handlers::handle_status),
        )
        .route("/upload/:id/resume", post(handlers::handle_resume))
        .route("/upload/:id/cancel", post(handlers::handle_cancel))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/books/{id}/run", post(jobs::start_run))
        .route("/books/{id}/job", get(jobs::latest_job))
        .route("/jobs/{id}", get(jobs::get_job))
        .route("/jobs/{id}/preview", get(jobs::preview))
}

/// Long-lived routes, mounted outside the request timeout.
///
/// ```text
/// /api/v1/jobs/{id}/stream   server-sent events
/// ```
pub fn stream_router() -> Router<AppState> {
    Router::new().route("/api/v1/jobs/{id}/stream", get(jobs::stream_job))
}

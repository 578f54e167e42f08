pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree, except event streams.
///
/// ```text
/// /books/{id}/run          start a run (POST)
/// /books/{id}/job          latest job for the book
/// /jobs/{id}               job snapshot
/// /jobs/{id}/preview       latest artifact bytes
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().merge(jobs::router())
}

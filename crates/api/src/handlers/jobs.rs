//! Handlers for starting book runs and following jobs.

use std::convert::Infallible;
use std::path::Path as FsPath;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use bookgen_core::error::CoreError;
use bookgen_worker::{job_stream, JobSnapshot, WorkerError};
use serde::Serialize;
use tokio_stream::{Stream, StreamExt};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Response body for a started run.
#[derive(Debug, Serialize)]
pub struct StartedJob {
    pub job_id: String,
}

/// POST /api/v1/books/{id}/run
///
/// Loads the book and starts it in the background. Returns 202 with the
/// job id without waiting for any generation.
pub async fn start_run(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> AppResult<(StatusCode, Json<DataResponse<StartedJob>>)> {
    let book = state.books.load(&book_id).await?;
    let job_id = state.registry.start_job(book).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: StartedJob { job_id },
        }),
    ))
}

/// GET /api/v1/books/{id}/job
pub async fn latest_job(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> AppResult<Json<DataResponse<JobSnapshot>>> {
    state.books.path_for(&book_id)?;
    let job = state
        .registry
        .latest_for_book(&book_id)
        .await
        .ok_or_else(|| CoreError::NotFound {
            entity: "Job for book",
            id: book_id,
        })?;
    Ok(Json(DataResponse { data: job }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<DataResponse<JobSnapshot>>> {
    let job = find_job(&state, &job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// GET /api/v1/jobs/{id}/stream
///
/// Server-sent events named `log`, `image`, `progress` and `done`.
pub async fn stream_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    find_job(&state, &job_id).await?;

    let events = job_stream(
        state.registry.clone(),
        state.service.clone(),
        job_id,
        state.stream,
    )
    .map(|event| {
        Ok::<_, Infallible>(
            Event::default()
                .event(event.event_name())
                .data(event.data()),
        )
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// GET /api/v1/jobs/{id}/preview
///
/// Bytes of the job's most recently saved artifact.
pub async fn preview(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job = find_job(&state, &job_id).await?;
    let not_found = || CoreError::NotFound {
        entity: "Preview for job",
        id: job_id.clone(),
    };
    let path = job.last_image.ok_or_else(not_found)?;
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found().into()),
        Err(e) => return Err(AppError::InternalError(format!("{}: {e}", path.display()))),
    };
    Ok(([(header::CONTENT_TYPE, image_content_type(&path))], bytes))
}

async fn find_job(state: &AppState, job_id: &str) -> AppResult<JobSnapshot> {
    state
        .registry
        .status(job_id)
        .await
        .ok_or_else(|| WorkerError::JobNotFound(job_id.to_string()).into())
}

fn image_content_type(path: &FsPath) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

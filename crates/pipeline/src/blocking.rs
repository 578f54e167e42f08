//! Filesystem and decode work kept off the async worker threads.

use crate::error::PipelineError;

/// Run `work` on the blocking pool.
///
/// A panic inside `work` resumes on the caller, so a run's own panic
/// handling still sees it.
pub async fn run_blocking<T, F>(work: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(PipelineError::JobFailure(format!("blocking task failed: {e}"))),
    }
}

use std::sync::Arc;

use bookgen_forge::ImageService;
use bookgen_worker::{BookStore, JobRegistry, StreamSettings};

use crate::config::ServerConfig;

/// Shared application state available to all handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (host, port, timeouts, CORS origins).
    pub config: Arc<ServerConfig>,
    /// Running and finished jobs.
    pub registry: Arc<JobRegistry>,
    /// Book definitions on disk.
    pub books: Arc<BookStore>,
    /// Queried for synthesis progress while streaming a job.
    pub service: Arc<dyn ImageService>,
    pub stream: StreamSettings,
}

use bookgen_core::error::CoreError;

/// Errors from configuration, book loading and job bookkeeping.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Invalid value for {key}: {value}")]
    Config { key: &'static str, value: String },

    #[error("Invalid book id: {0}")]
    InvalidBookId(String),

    #[error("Book not found: {0}")]
    BookNotFound(String),

    #[error("Book {id} is not valid JSON: {source}")]
    BookParse {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

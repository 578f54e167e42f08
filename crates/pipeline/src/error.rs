use std::path::PathBuf;

use bookgen_core::error::CoreError;
use bookgen_forge::ForgeApiError;

/// Failures inside a generation run.
///
/// Only [`PipelineError::JobFailure`] ends a job; every other variant is
/// logged at the record or page boundary and turned into a skip.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Record skipped: {0}")]
    RecordSkipped(String),

    #[error("Synthesis failed: {0}")]
    SynthesisFailure(#[source] ForgeApiError),

    #[error("Swap failed: {0}")]
    SwapFailure(#[source] ForgeApiError),

    #[error("Write-back failed: {0}")]
    WriteBackFailure(String),

    #[error("Job failed: {0}")]
    JobFailure(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Workbook error: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("Workbook write error: {0}")]
    WorkbookWrite(#[from] rust_xlsxwriter::XlsxError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

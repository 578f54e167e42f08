//! Record ingestion, spreadsheet write-back and the generation loop.

pub mod blocking;
pub mod error;
pub mod images;
pub mod ingest;
pub mod joblog;
pub mod orchestrator;
pub mod sheet;
pub mod table;

pub use error::PipelineError;
pub use joblog::{JobLog, LogTag};
pub use orchestrator::{ApiRunner, BookRunner, RunContext, RunEvent, RunSummary};

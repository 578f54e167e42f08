//! Job registry, event stream and configuration for running books in the
//! background.

pub mod books;
pub mod config;
pub mod error;
pub mod registry;
pub mod stream;

pub use books::BookStore;
pub use config::WorkerConfig;
pub use error::WorkerError;
pub use registry::{JobRegistry, JobSnapshot};
pub use stream::{job_stream, JobStreamEvent, StreamSettings};

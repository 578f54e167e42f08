//! Run one book from the command line and print its event stream.
//!
//! ```text
//! bookgen-worker <book-id | path/to/book.json>
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use bookgen_core::job::JobStatus;
use bookgen_forge::ImageService;
use bookgen_pipeline::ApiRunner;
use bookgen_worker::{job_stream, BookStore, JobRegistry, JobStreamEvent, StreamSettings, WorkerConfig};
use tokio_stream::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bookgen_worker=debug,bookgen_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let target = std::env::args()
        .nth(1)
        .context("usage: bookgen-worker <book-id | path/to/book.json>")?;

    let config = WorkerConfig::from_env()?;
    let book = if Path::new(&target).is_file() {
        BookStore::load_file(Path::new(&target)).await?
    } else {
        BookStore::new(&config.books_dir).load(&target).await?
    };
    tracing::info!(book_id = %book.id, pages = book.pages.len(), "Book loaded");

    let service: Arc<dyn ImageService> = Arc::new(config.forge_api());
    let runner = Arc::new(ApiRunner::new(Arc::clone(&service)));
    let registry = Arc::new(JobRegistry::new(runner, &config));

    let job_id = registry.start_job(book).await?;
    tracing::info!(job_id = %job_id, "Streaming job events");

    // The job is already running; replay so its opening lines are printed.
    let settings = StreamSettings {
        poll: config.stream_poll,
        progress_interval: config.progress_poll,
        replay_log: true,
    };
    let mut events = job_stream(Arc::clone(&registry), service, job_id.clone(), settings);
    let mut status = JobStatus::Failed;
    while let Some(event) = events.next().await {
        match &event {
            JobStreamEvent::Log(line) => println!("{line}"),
            JobStreamEvent::Done(done) => status = *done,
            JobStreamEvent::ImageChanged(_) | JobStreamEvent::Progress(_) => {
                tracing::debug!(event = event.event_name(), data = %event.data());
            }
        }
    }

    if let Some(job) = registry.status(&job_id).await {
        if let Some(summary) = &job.summary {
            println!("{}", serde_json::to_string_pretty(summary)?);
        }
    }

    Ok(match status {
        JobStatus::Finished => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

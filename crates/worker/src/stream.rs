//! Live view of one job: new log lines, artifact changes and synthesis
//! progress, ending with a single terminal event.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use bookgen_core::job::JobStatus;
use bookgen_forge::ImageService;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;

use crate::registry::JobRegistry;

/// Buffered events per subscriber before the pump waits on the reader.
const STREAM_BUFFER: usize = 64;

/// One event delivered to a job subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum JobStreamEvent {
    /// A line appended to the job log.
    Log(String),
    /// The latest artifact changed; carries its modification time in
    /// milliseconds since the epoch.
    ImageChanged(i64),
    /// Synthesis progress, 0..=100.
    Progress(u8),
    /// Always the last event.
    Done(JobStatus),
}

impl JobStreamEvent {
    /// Server-sent event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Log(_) => "log",
            Self::ImageChanged(_) => "image",
            Self::Progress(_) => "progress",
            Self::Done(_) => "done",
        }
    }

    /// Server-sent event payload.
    pub fn data(&self) -> String {
        match self {
            Self::Log(line) => line.clone(),
            Self::ImageChanged(mtime) => mtime.to_string(),
            Self::Progress(pct) => pct.to_string(),
            Self::Done(status) => status.as_str().to_string(),
        }
    }
}

/// Polling cadence for a stream.
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    pub poll: Duration,
    /// Minimum interval between progress queries.
    pub progress_interval: Duration,
    /// Tail the log from its first line instead of its current end.
    pub replay_log: bool,
}

/// Subscribe to `job_id`.
///
/// Log lines are tailed from the current end of the file, so a subscriber
/// only sees lines written after it connected, unless
/// [`StreamSettings::replay_log`] is set. The stream ends after
/// [`JobStreamEvent::Done`], or immediately if the job is unknown.
pub fn job_stream(
    registry: Arc<JobRegistry>,
    service: Arc<dyn ImageService>,
    job_id: String,
    settings: StreamSettings,
) -> ReceiverStream<JobStreamEvent> {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    tokio::spawn(async move {
        if pump(&registry, service.as_ref(), &job_id, settings, &tx)
            .await
            .is_err()
        {
            tracing::debug!(job_id = %job_id, "Stream subscriber went away");
        }
    });
    ReceiverStream::new(rx)
}

type Closed = mpsc::error::SendError<JobStreamEvent>;

async fn pump(
    registry: &JobRegistry,
    service: &dyn ImageService,
    job_id: &str,
    settings: StreamSettings,
    tx: &mpsc::Sender<JobStreamEvent>,
) -> Result<(), Closed> {
    let Some(initial) = registry.status(job_id).await else {
        return Ok(());
    };
    let mut tail = if settings.replay_log {
        LogTail::from_start(&initial.log_path)
    } else {
        LogTail::at_end(&initial.log_path).await
    };
    let mut last_mtime: Option<i64> = None;
    let mut last_progress: Option<u8> = None;
    let mut last_progress_poll: Option<Instant> = None;

    let mut ticker = tokio::time::interval(settings.poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        for line in tail.read_new_lines().await {
            tx.send(JobStreamEvent::Log(line)).await?;
        }

        let Some(job) = registry.status(job_id).await else {
            return Ok(());
        };

        if let Some(image) = &job.last_image {
            if let Some(mtime) = modified_millis(image).await {
                if last_mtime != Some(mtime) {
                    last_mtime = Some(mtime);
                    tx.send(JobStreamEvent::ImageChanged(mtime)).await?;
                }
            }
        }

        if job.status.is_terminal() {
            for line in tail.read_new_lines().await {
                tx.send(JobStreamEvent::Log(line)).await?;
            }
            tx.send(JobStreamEvent::Progress(100)).await?;
            tx.send(JobStreamEvent::Done(job.status)).await?;
            return Ok(());
        }

        let due = last_progress_poll.map_or(true, |at| at.elapsed() >= settings.progress_interval);
        if due {
            last_progress_poll = Some(Instant::now());
            if let Ok(fraction) = service.progress().await {
                let pct = progress_percent(fraction);
                if last_progress != Some(pct) {
                    last_progress = Some(pct);
                    tx.send(JobStreamEvent::Progress(pct)).await?;
                }
            }
        }
    }
}

fn progress_percent(fraction: f64) -> u8 {
    if !fraction.is_finite() {
        return 0;
    }
    (fraction.clamp(0.0, 1.0) * 100.0).round() as u8
}

async fn modified_millis(path: &Path) -> Option<i64> {
    let modified = tokio::fs::metadata(path).await.ok()?.modified().ok()?;
    let since = modified.duration_since(UNIX_EPOCH).ok()?;
    i64::try_from(since.as_millis()).ok()
}

/// Incremental reader over a growing log file.
struct LogTail {
    path: PathBuf,
    offset: u64,
    /// Bytes after the last newline; may end inside a UTF-8 sequence.
    partial: Vec<u8>,
}

impl LogTail {
    fn from_start(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            offset: 0,
            partial: Vec::new(),
        }
    }

    async fn at_end(path: &Path) -> Self {
        let offset = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
        Self {
            offset,
            ..Self::from_start(path)
        }
    }

    /// Complete lines appended since the last call. A trailing line
    /// without its newline is held back until it is finished.
    async fn read_new_lines(&mut self) -> Vec<String> {
        let Ok(mut file) = tokio::fs::File::open(&self.path).await else {
            return Vec::new();
        };
        let len = file.metadata().await.map(|m| m.len()).unwrap_or(0);
        if len < self.offset {
            // Truncated underneath us.
            self.offset = 0;
            self.partial.clear();
        }
        if len == self.offset || file.seek(SeekFrom::Start(self.offset)).await.is_err() {
            return Vec::new();
        }

        let mut buf = Vec::new();
        let Ok(read) = file.read_to_end(&mut buf).await else {
            return Vec::new();
        };
        self.offset += read as u64;
        self.partial.extend_from_slice(&buf);

        let Some(last_newline) = self.partial.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        String::from_utf8_lossy(&complete)
            .lines()
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect()
    }
}

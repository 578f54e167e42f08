//! Per-job log file.
//!
//! The log file is what a user watches while a job runs, so every line
//! carries a bracketed tag. Each line is mirrored to `tracing` with the
//! job id attached.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// Line category written in front of every log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTag {
    Info,
    Warn,
    Err,
    Skip,
    Record,
    Page,
    Pose,
    Swap,
    Ok,
    Sheet,
    Done,
}

impl LogTag {
    pub fn label(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Err => "ERR",
            Self::Skip => "SKIP",
            Self::Record => "RECORD",
            Self::Page => "PAGE",
            Self::Pose => "POSE",
            Self::Swap => "SWAP",
            Self::Ok => "OK",
            Self::Sheet => "SHEET",
            Self::Done => "DONE",
        }
    }
}

/// Cheaply cloneable handle to one job's log file.
#[derive(Clone)]
pub struct JobLog {
    job_id: Arc<str>,
    file: Option<Arc<Mutex<File>>>,
}

impl JobLog {
    /// Open (append) the log file at `path`, creating parent directories.
    pub fn create(path: &Path, job_id: &str) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            job_id: job_id.into(),
            file: Some(Arc::new(Mutex::new(file))),
        })
    }

    /// A log that only reaches `tracing`.
    pub fn discard() -> Self {
        Self {
            job_id: "-".into(),
            file: None,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Append `[TAG] message` and mirror it to `tracing`.
    pub fn line(&self, tag: LogTag, message: impl AsRef<str>) {
        let message = message.as_ref();
        match tag {
            LogTag::Err => tracing::error!(job_id = %self.job_id, tag = tag.label(), "{message}"),
            LogTag::Warn => tracing::warn!(job_id = %self.job_id, tag = tag.label(), "{message}"),
            _ => tracing::info!(job_id = %self.job_id, tag = tag.label(), "{message}"),
        }

        let Some(file) = &self.file else {
            return;
        };
        // A writer that panicked mid-line leaves the file usable.
        let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
        let written = writeln!(file, "[{}] {}", tag.label(), message).and_then(|_| file.flush());
        if let Err(e) = written {
            tracing::warn!(job_id = %self.job_id, error = %e, "Failed to write job log line");
        }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.line(LogTag::Info, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.line(LogTag::Warn, message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.line(LogTag::Err, message);
    }
}

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use bookgen_forge::{ForgeApi, ForgeTimeouts};

use crate::error::WorkerError;

/// Worker configuration loaded from environment variables.
///
/// All fields have defaults suitable for a synthesis service running on
/// the same machine.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Synthesis service base URL.
    pub forge_base_url: String,
    /// Identity-swap base URL; defaults to the synthesis URL.
    pub swap_base_url: String,
    pub timeouts: ForgeTimeouts,
    pub data_dir: PathBuf,
    /// Book JSON files, `<books_dir>/<book_id>.json`.
    pub books_dir: PathBuf,
    /// Job logs, `<logs_dir>/<job_id>.log`.
    pub logs_dir: PathBuf,
    /// Output root for books that do not set one.
    pub default_output_root: PathBuf,
    /// Event stream tick.
    pub stream_poll: Duration,
    /// Minimum interval between synthesis progress polls.
    pub progress_poll: Duration,
    /// Capacity of the runner -> registry event channel.
    pub event_channel_capacity: usize,
    /// Finished jobs kept in memory besides each book's latest job.
    pub job_history_limit: usize,
}

fn env_or<T: FromStr>(key: &'static str, default: &str) -> Result<T, WorkerError> {
    let value = std::env::var(key).unwrap_or_else(|_| default.into());
    value
        .trim()
        .parse()
        .map_err(|_| WorkerError::Config { key, value })
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                 |
    /// |-----------------------------|-------------------------|
    /// | `FORGE_BASE_URL`            | `http://127.0.0.1:7861` |
    /// | `SWAP_BASE_URL`             | `FORGE_BASE_URL`        |
    /// | `SYNTHESIS_TIMEOUT_SECS`    | `600`                   |
    /// | `SWAP_TIMEOUT_SECS`         | `180`                   |
    /// | `AVAILABILITY_TIMEOUT_SECS` | `5`                     |
    /// | `PROGRESS_TIMEOUT_SECS`     | `2`                     |
    /// | `DATA_DIR`                  | `./data`                |
    /// | `BOOKS_DIR`                 | `$DATA_DIR/books`       |
    /// | `LOGS_DIR`                  | `$DATA_DIR/logs`        |
    /// | `DEFAULT_OUTPUT_ROOT`       | `./out`                 |
    /// | `STREAM_POLL_MS`            | `500`                   |
    /// | `PROGRESS_POLL_MS`          | `1000`                  |
    /// | `EVENT_CHANNEL_CAPACITY`    | `64`                    |
    /// | `JOB_HISTORY_LIMIT`         | `100`                   |
    pub fn from_env() -> Result<Self, WorkerError> {
        let forge_base_url =
            std::env::var("FORGE_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:7861".into());
        let swap_base_url = std::env::var("SWAP_BASE_URL").unwrap_or_else(|_| forge_base_url.clone());

        let timeouts = ForgeTimeouts {
            synthesis: Duration::from_secs(env_or("SYNTHESIS_TIMEOUT_SECS", "600")?),
            swap: Duration::from_secs(env_or("SWAP_TIMEOUT_SECS", "180")?),
            availability: Duration::from_secs(env_or("AVAILABILITY_TIMEOUT_SECS", "5")?),
            progress: Duration::from_secs(env_or("PROGRESS_TIMEOUT_SECS", "2")?),
        };

        let data_dir = PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".into()));
        let books_dir = std::env::var("BOOKS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("books"));
        let logs_dir = std::env::var("LOGS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("logs"));
        let default_output_root =
            PathBuf::from(std::env::var("DEFAULT_OUTPUT_ROOT").unwrap_or_else(|_| "./out".into()));

        let event_channel_capacity: usize = env_or("EVENT_CHANNEL_CAPACITY", "64")?;
        if event_channel_capacity == 0 {
            return Err(WorkerError::Config {
                key: "EVENT_CHANNEL_CAPACITY",
                value: "0".into(),
            });
        }

        Ok(Self {
            job_history_limit: env_or("JOB_HISTORY_LIMIT", "100")?,
            forge_base_url,
            swap_base_url,
            timeouts,
            books_dir,
            logs_dir,
            default_output_root,
            stream_poll: Duration::from_millis(env_or("STREAM_POLL_MS", "500")?),
            progress_poll: Duration::from_millis(env_or("PROGRESS_POLL_MS", "1000")?),
            event_channel_capacity,
            data_dir,
        })
    }

    /// Defaults rooted at `data_dir`, without reading the environment.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            forge_base_url: "http://127.0.0.1:7861".into(),
            swap_base_url: "http://127.0.0.1:7861".into(),
            timeouts: ForgeTimeouts::default(),
            books_dir: data_dir.join("books"),
            logs_dir: data_dir.join("logs"),
            default_output_root: data_dir.join("out"),
            stream_poll: Duration::from_millis(500),
            progress_poll: Duration::from_millis(1000),
            event_channel_capacity: 64,
            job_history_limit: 100,
            data_dir,
        }
    }

    /// HTTP client for the configured services.
    pub fn forge_api(&self) -> ForgeApi {
        ForgeApi::with_client(
            reqwest::Client::new(),
            self.forge_base_url.clone(),
            self.swap_base_url.clone(),
        )
        .with_timeouts(self.timeouts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_defaults_nest_books_and_logs() {
        let config = WorkerConfig::with_data_dir("/srv/bookgen");
        assert_eq!(config.books_dir, PathBuf::from("/srv/bookgen/books"));
        assert_eq!(config.logs_dir, PathBuf::from("/srv/bookgen/logs"));
        assert_eq!(config.stream_poll, Duration::from_millis(500));
        assert_eq!(config.forge_api().api_url(), "http://127.0.0.1:7861");
    }
}

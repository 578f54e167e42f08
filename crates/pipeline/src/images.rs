//! Image loading, pose caching and artifact persistence.

use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bookgen_core::naming::is_image_file;
use bookgen_forge::messages::strip_data_url;
use image::ImageFormat;
use sha2::{Digest, Sha256};

use crate::blocking::run_blocking;
use crate::error::PipelineError;
use crate::joblog::{JobLog, LogTag};

/// Decode an image file of any supported format and return it as base64
/// PNG.
pub fn load_image_b64(path: &Path) -> Result<String, PipelineError> {
    let img = image::open(path)?;
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)?;
    Ok(STANDARD.encode(buf.into_inner()))
}

/// Decode plain base64 or a base64 data URL.
pub fn decode_b64(data: &str) -> Result<Vec<u8>, PipelineError> {
    Ok(STANDARD.decode(strip_data_url(data).trim())?)
}

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Write a base64 image to `dest`, creating parent directories.
///
/// The bytes go to a sibling temp file first so a crash never leaves a
/// partial artifact behind at `dest`.
pub fn save_b64_image(data: &str, dest: &Path) -> Result<(), PipelineError> {
    let bytes = decode_b64(data)?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".part");
    let tmp = dest.with_file_name(tmp_name);
    fs::write(&tmp, &bytes)?;
    fs::rename(&tmp, dest)?;
    Ok(())
}

/// Resolve a pose source to one image file. A directory yields its first
/// image file in name order.
pub fn resolve_pose_file(source: &Path) -> Option<PathBuf> {
    if source.is_file() {
        return Some(source.to_path_buf());
    }
    if !source.is_dir() {
        return None;
    }
    let mut candidates: Vec<PathBuf> = fs::read_dir(source)
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && is_image_file(p))
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

fn load_pose(source: &Path, log: &JobLog) -> Option<String> {
    let Some(file) = resolve_pose_file(source) else {
        log.warn(format!("pose source {} has no image", source.display()));
        return None;
    };
    match load_image_b64(&file) {
        Ok(b64) => {
            log.line(LogTag::Pose, format!("loaded {}", file.display()));
            Some(b64)
        }
        Err(e) => {
            log.warn(format!("pose {} unreadable: {e}", file.display()));
            None
        }
    }
}

/// Pose images keyed by their source path. Each source is read at most
/// once per run, including sources that failed to load.
#[derive(Debug, Default)]
pub struct PoseCache {
    entries: HashMap<PathBuf, Option<String>>,
    loads: usize,
}

impl PoseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&mut self, source: &Path, log: &JobLog) -> Option<String> {
        if let Some(cached) = self.entries.get(source) {
            return cached.clone();
        }

        self.loads += 1;
        let (owned, task_log) = (source.to_path_buf(), log.clone());
        let loaded = run_blocking(move || Ok(load_pose(&owned, &task_log)))
            .await
            .unwrap_or_else(|e| {
                log.warn(format!("pose {}: {e}", source.display()));
                None
            });
        self.entries.insert(source.to_path_buf(), loaded.clone());
        loaded
    }

    /// Number of distinct sources read from disk.
    pub fn loads(&self) -> usize {
        self.loads
    }
}

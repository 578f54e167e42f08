//! Book, settings and page definitions as stored in book JSON files.
//!
//! Every field has a serde default so partially filled or older files
//! still load. Legacy names are accepted through `alias`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::conditioning::UnitConfig;
use crate::error::CoreError;
use crate::naming::RANDOM_SEED;

/// Where a book's records come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// A CSV file or `.xlsx` workbook with a header row.
    #[default]
    #[serde(alias = "excel", alias = "csv")]
    Spreadsheet,
    /// A directory tree of face images, one sub-directory per group.
    #[serde(alias = "folder")]
    Folders,
}

/// Ingestion and output settings of a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookSettings {
    pub data_source: DataSource,
    #[serde(alias = "excel_path")]
    pub spreadsheet_path: Option<PathBuf>,
    pub faces_dir: Option<PathBuf>,
    /// Book-level pose image or directory used by pages without their own.
    pub poses_dir: Option<PathBuf>,
    pub output_root: Option<PathBuf>,
    pub col_photo: String,
    pub col_first: String,
    pub col_last: String,
    pub col_class: String,
    /// Optional column receiving all of a record's paths joined by `; `.
    pub col_out: Option<String>,
    pub page_label_prefix: String,
}

impl Default for BookSettings {
    fn default() -> Self {
        Self {
            data_source: DataSource::Spreadsheet,
            spreadsheet_path: None,
            faces_dir: None,
            poses_dir: None,
            output_root: None,
            col_photo: "@photo".into(),
            col_first: "student name".into(),
            col_last: "student last name".into(),
            col_class: "class".into(),
            col_out: None,
            page_label_prefix: "@page".into(),
        }
    }
}

/// Treat `Some("")` like `None`.
fn non_empty(path: &Option<PathBuf>) -> Option<&Path> {
    path.as_deref().filter(|p| !p.as_os_str().is_empty())
}

impl BookSettings {
    pub fn spreadsheet(&self) -> Option<&Path> {
        non_empty(&self.spreadsheet_path)
    }

    pub fn faces_root(&self) -> Option<&Path> {
        non_empty(&self.faces_dir)
    }

    pub fn poses_root(&self) -> Option<&Path> {
        non_empty(&self.poses_dir)
    }

    /// Configured output root, or `fallback`.
    pub fn output_root_or(&self, fallback: &Path) -> PathBuf {
        non_empty(&self.output_root)
            .unwrap_or(fallback)
            .to_path_buf()
    }

    /// Name of the out column, if one is configured.
    pub fn out_column(&self) -> Option<&str> {
        self.col_out
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Whether records from this source can be written back.
    pub fn supports_write_back(&self) -> bool {
        self.data_source == DataSource::Spreadsheet && self.spreadsheet().is_some()
    }
}

fn default_sampler() -> String {
    "Euler a".into()
}

fn default_steps() -> i64 {
    12
}

fn default_width() -> i64 {
    1980
}

fn default_height() -> i64 {
    1020
}

fn default_cfg_scale() -> f64 {
    4.0
}

fn default_seed() -> i64 {
    RANDOM_SEED
}

fn default_true() -> bool {
    true
}

/// One desired output variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based, unique within a book.
    pub index: u32,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default)]
    pub checkpoint: Option<String>,
    #[serde(default = "default_sampler", alias = "sampling_method")]
    pub sampler: String,
    #[serde(default = "default_steps", alias = "sampling_steps")]
    pub steps: i64,
    #[serde(default = "default_width")]
    pub width: i64,
    #[serde(default = "default_height")]
    pub height: i64,
    #[serde(default = "default_cfg_scale")]
    pub cfg_scale: f64,
    #[serde(default = "default_seed")]
    pub seed: i64,
    #[serde(default)]
    pub styles: Vec<String>,
    #[serde(default = "default_true", alias = "use_controlnet")]
    pub use_conditioning: bool,
    #[serde(default = "UnitConfig::face_default")]
    pub face_unit: UnitConfig,
    #[serde(default = "UnitConfig::pose_default")]
    pub pose_unit: UnitConfig,
    #[serde(default)]
    pub pose_path: Option<PathBuf>,
    #[serde(default, alias = "use_reactor")]
    pub use_swap: bool,
    /// Free-form swap options; see [`crate::swap::SwapOptions`].
    #[serde(default, alias = "reactor_json")]
    pub swap_options: serde_json::Value,
}

impl Page {
    /// A page with every default applied.
    pub fn new(index: u32) -> Self {
        Self {
            index,
            prompt: String::new(),
            negative_prompt: String::new(),
            checkpoint: None,
            sampler: default_sampler(),
            steps: default_steps(),
            width: default_width(),
            height: default_height(),
            cfg_scale: default_cfg_scale(),
            seed: default_seed(),
            styles: Vec::new(),
            use_conditioning: true,
            face_unit: UnitConfig::face_default(),
            pose_unit: UnitConfig::pose_default(),
            pose_path: None,
            use_swap: false,
            swap_options: serde_json::Value::Null,
        }
    }

    /// Checkpoint to switch to for this page, if any.
    pub fn checkpoint_override(&self) -> Option<&str> {
        self.checkpoint
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Pose source for this page, falling back to the book-level one.
    pub fn pose_source<'a>(&'a self, settings: &'a BookSettings) -> Option<&'a Path> {
        non_empty(&self.pose_path).or_else(|| settings.poses_root())
    }
}

/// A set of pages plus the settings they are rendered with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    #[serde(default, alias = "title")]
    pub name: String,
    #[serde(default)]
    pub settings: BookSettings,
    #[serde(default)]
    pub pages: Vec<Page>,
}

impl Book {
    /// Pages sorted by index.
    pub fn ordered_pages(&self) -> Vec<&Page> {
        let mut pages: Vec<&Page> = self.pages.iter().collect();
        pages.sort_by_key(|p| p.index);
        pages
    }

    /// Number of page columns to reserve for write-back.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Page indices must be positive and unique.
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut seen = HashSet::new();
        for page in &self.pages {
            if page.index == 0 {
                return Err(CoreError::Validation(format!(
                    "book {}: page index must be 1 or greater",
                    self.id
                )));
            }
            if !seen.insert(page.index) {
                return Err(CoreError::Validation(format!(
                    "book {}: duplicate page index {}",
                    self.id, page.index
                )));
            }
        }
        Ok(())
    }
}

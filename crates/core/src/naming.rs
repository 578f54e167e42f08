//! Artifact naming and numeric policies.
//!
//! The artifact path `output_root/<group>/<name>/page<index>.png` is the
//! idempotence marker for a (record, page) pair, so every producer must go
//! through [`artifact_path`].

use std::path::{Path, PathBuf};

/// File extension of every generated artifact.
pub const ARTIFACT_EXTENSION: &str = "png";

/// Smallest width/height sent to the synthesis service.
pub const MIN_DIMENSION: u32 = 64;

/// Largest width/height sent to the synthesis service.
pub const MAX_DIMENSION: u32 = 2048;

/// Seed value that asks the service to pick one.
pub const RANDOM_SEED: i64 = -1;

/// Recognized image file extensions (lowercase, without the dot).
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp"];

/// Clamp a requested dimension into `[MIN_DIMENSION, MAX_DIMENSION]`.
pub fn clamp_dimension(value: i64) -> u32 {
    value.clamp(MIN_DIMENSION as i64, MAX_DIMENSION as i64) as u32
}

/// Whether `path` has one of [`IMAGE_EXTENSIONS`].
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Make a string safe to use as one directory name.
///
/// Path separators and `: | *` become spaces, then whitespace runs collapse
/// to a single space.
pub fn sanitize_segment(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' | '|' | '*' => ' ',
            other => other,
        })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Directory holding one record's artifacts. A blank group adds no segment.
pub fn record_dir(output_root: &Path, group: &str, name: &str) -> PathBuf {
    let mut dir = output_root.to_path_buf();
    let group = sanitize_segment(group);
    if !group.is_empty() {
        dir.push(group);
    }
    dir.push(sanitize_segment(name));
    dir
}

/// `page<index>.png`
pub fn page_file_name(page_index: u32) -> String {
    format!("page{page_index}.{ARTIFACT_EXTENSION}")
}

/// Final artifact location of one (record, page) pair.
///
/// ```
/// use std::path::{Path, PathBuf};
/// use bookgen_core::naming::artifact_path;
///
/// assert_eq!(
///     artifact_path(Path::new("out"), "2-A", "Deniz", 3),
///     PathBuf::from("out/2-A/Deniz/page3.png")
/// );
/// ```
pub fn artifact_path(output_root: &Path, group: &str, name: &str, page_index: u32) -> PathBuf {
    record_dir(output_root, group, name).join(page_file_name(page_index))
}

/// Header label of the `n`th page column, e.g. `@page3`.
pub fn page_column_label(prefix: &str, n: usize) -> String {
    format!("{prefix}{n}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_are_clamped() {
        assert_eq!(clamp_dimension(10), 64);
        assert_eq!(clamp_dimension(-5), 64);
        assert_eq!(clamp_dimension(1024), 1024);
        assert_eq!(clamp_dimension(4096), 2048);
    }

    #[test]
    fn artifact_path_shape() {
        let root = Path::new("/out");
        assert_eq!(
            artifact_path(root, "3-B", "Ada Lovelace", 2),
            PathBuf::from("/out/3-B/Ada Lovelace/page2.png")
        );
        assert_eq!(
            artifact_path(root, "", "Ada", 1),
            PathBuf::from("/out/Ada/page1.png")
        );
    }

    #[test]
    fn segments_are_sanitized() {
        assert_eq!(sanitize_segment("  3/B : main "), "3 B main");
        assert_eq!(sanitize_segment("a\\b|c*d"), "a b c d");
        assert_eq!(
            artifact_path(Path::new("/o"), "x/y", "n", 1),
            PathBuf::from("/o/x y/n/page1.png")
        );
    }

    #[test]
    fn image_extension_check_is_case_insensitive() {
        assert!(is_image_file(Path::new("a/b.JPG")));
        assert!(is_image_file(Path::new("b.webp")));
        assert!(!is_image_file(Path::new("b.txt")));
        assert!(!is_image_file(Path::new("noext")));
    }

    #[test]
    fn column_labels() {
        assert_eq!(page_column_label("@page", 3), "@page3");
    }
}

//! Record ingestion from a spreadsheet (CSV or workbook) or a directory
//! tree of face images.
//!
//! Order is deterministic (file row order, or group then name for
//! folders) because reruns rely on the same records mapping to the same
//! rows and artifact paths.

use std::path::{Path, PathBuf};

use bookgen_core::book::{BookSettings, DataSource};
use bookgen_core::naming::{is_image_file, sanitize_segment};
use bookgen_core::record::{FieldMap, Record};
use walkdir::WalkDir;

use crate::error::PipelineError;
use crate::joblog::{JobLog, LogTag};
use crate::table::Table;

/// Photo columns tried after the configured one.
const PHOTO_FALLBACK_COLUMNS: &[&str] = &["@photo", "photo"];

/// Placeholder shown when a book names no source path at all.
const UNSET_SOURCE: &str = "(not configured)";

/// First data row number; row 1 is the header.
pub const FIRST_DATA_ROW: usize = 2;

/// Collect the book's records.
///
/// A missing source is logged and yields no records. An unreadable source
/// is an error.
pub fn collect_records(settings: &BookSettings, log: &JobLog) -> Result<Vec<Record>, PipelineError> {
    let result = match settings.data_source {
        DataSource::Spreadsheet => match settings.spreadsheet() {
            Some(path) => from_spreadsheet(path, settings, log),
            None => Err(PipelineError::SourceNotFound(PathBuf::from(UNSET_SOURCE))),
        },
        DataSource::Folders => match settings.faces_root() {
            Some(root) => from_folders(root, log),
            None => Err(PipelineError::SourceNotFound(PathBuf::from(UNSET_SOURCE))),
        },
    };

    match result {
        Err(e @ PipelineError::SourceNotFound(_)) => {
            log.warn(format!("{e}; nothing to generate"));
            Ok(Vec::new())
        }
        other => other,
    }
}

/// Turn a photo cell into a path: `\` and `/` both separate, relative
/// paths are joined onto `base`.
pub fn resolve_photo_path(raw: &str, base: Option<&Path>) -> PathBuf {
    let normalized = raw.trim().replace('\\', "/");
    let path = PathBuf::from(&normalized);
    let joined = match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path,
    };
    std::path::absolute(&joined).unwrap_or(joined)
}

fn from_spreadsheet(
    path: &Path,
    settings: &BookSettings,
    log: &JobLog,
) -> Result<Vec<Record>, PipelineError> {
    if !path.is_file() {
        return Err(PipelineError::SourceNotFound(path.to_path_buf()));
    }
    let table = Table::read(path)?;
    for (line, reason) in &table.malformed {
        log.warn(format!("line {line} unreadable, skipped: {reason}"));
    }

    let base = settings
        .faces_root()
        .map(Path::to_path_buf)
        .or_else(|| path.parent().map(Path::to_path_buf));
    let photo_columns: Vec<&str> = std::iter::once(settings.col_photo.as_str())
        .chain(PHOTO_FALLBACK_COLUMNS.iter().copied())
        .collect();

    let mut records = Vec::new();
    for (i, row) in table.rows.iter().enumerate() {
        let row_number = i + FIRST_DATA_ROW;
        let fields: FieldMap = table
            .headers
            .iter()
            .enumerate()
            .map(|(col, header)| (header.as_str(), row.get(col).map(String::as_str).unwrap_or("")))
            .collect();

        match spreadsheet_record(fields, row_number, &photo_columns, base.as_deref(), settings) {
            Ok(record) => records.push(record),
            Err(e) => log.line(LogTag::Skip, e.to_string()),
        }
    }

    log.info(format!(
        "{} of {} rows usable from {}",
        records.len(),
        table.rows.len(),
        path.display()
    ));
    Ok(records)
}

fn spreadsheet_record(
    mut fields: FieldMap,
    row_number: usize,
    photo_columns: &[&str],
    base: Option<&Path>,
    settings: &BookSettings,
) -> Result<Record, PipelineError> {
    let photo_raw = fields
        .first_non_empty(photo_columns)
        .map(|p| p.replace('\\', "/"))
        .ok_or_else(|| PipelineError::RecordSkipped(format!("row {row_number}: no photo")))?;

    let face_image_path = resolve_photo_path(&photo_raw, base);
    if !face_image_path.is_file() {
        return Err(PipelineError::RecordSkipped(format!(
            "row {row_number}: photo not found: {}",
            face_image_path.display()
        )));
    }

    let first = fields.get(&settings.col_first).unwrap_or("").trim();
    let last = fields.get(&settings.col_last).unwrap_or("").trim();
    let joined = [first, last]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    let name = first_usable_name([
        joined,
        file_stem(&face_image_path),
        format!("row{row_number}"),
    ]);
    let group = fields.get(&settings.col_class).unwrap_or("").trim().to_string();

    fields.insert_default("name", name.as_str());
    fields.insert_default("class", group.as_str());
    fields.insert_default("@photo", photo_raw.as_str());

    Ok(Record {
        face_image_path,
        name,
        group,
        fields,
        source_row: Some(row_number),
    })
}

fn from_folders(root: &Path, log: &JobLog) -> Result<Vec<Record>, PipelineError> {
    if !root.is_dir() {
        return Err(PipelineError::SourceNotFound(root.to_path_buf()));
    }

    let mut records = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log.warn(format!("cannot read {}: {e}", root.display()));
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || !is_image_file(path) {
            continue;
        }

        let group = match path.parent() {
            Some(parent) if parent != root => parent
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            _ => String::new(),
        };
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        let name = first_usable_name([file_stem(path), relative.clone()]);

        let mut fields = FieldMap::new();
        fields.insert("name", name.as_str());
        fields.insert("class", group.as_str());
        fields.insert("@photo", relative);

        records.push(Record {
            face_image_path: std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf()),
            name,
            group,
            fields,
            source_row: None,
        });
    }

    records.sort_by(|a, b| {
        (a.group.as_str(), a.name.as_str(), &a.face_image_path)
            .cmp(&(b.group.as_str(), b.name.as_str(), &b.face_image_path))
    });
    log.info(format!("{} images found under {}", records.len(), root.display()));
    Ok(records)
}

/// The first candidate that still names a directory once sanitized, so
/// two records never share an artifact folder through an empty name.
fn first_usable_name<const N: usize>(candidates: [String; N]) -> String {
    candidates
        .into_iter()
        .find(|c| !sanitize_segment(c).is_empty())
        .unwrap_or_default()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch_png(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        image::RgbImage::new(2, 2).save(path).unwrap();
    }

    fn spreadsheet_settings(csv: &Path, faces: &Path) -> BookSettings {
        BookSettings {
            spreadsheet_path: Some(csv.to_path_buf()),
            faces_dir: Some(faces.to_path_buf()),
            ..Default::default()
        }
    }

    #[test]
    fn spreadsheet_rows_become_records() {
        let dir = tempfile::tempdir().unwrap();
        let faces = dir.path().join("faces");
        touch_png(&faces.join("ada.png"));
        touch_png(&faces.join("sub/bob.png"));
        let csv = dir.path().join("kids.csv");
        fs::write(
            &csv,
            "Student Name;Student Last Name;Class;@photo;Cinsiyet\n\
             Ada;Lovelace;3-B;ada.png;K\n\
             ;;3-B;;E\n\
             ;;2-A;sub\\bob.png;E\n",
        )
        .unwrap();

        let records = collect_records(&spreadsheet_settings(&csv, &faces), &JobLog::discard()).unwrap();
        assert_eq!(records.len(), 2);

        let ada = &records[0];
        assert_eq!(ada.name, "Ada Lovelace");
        assert_eq!(ada.group, "3-B");
        assert_eq!(ada.source_row, Some(2));
        assert!(ada.face_image_path.ends_with("faces/ada.png"));
        assert_eq!(ada.fields.get("cinsiyet"), Some("K"));
        assert_eq!(ada.fields.get("name"), Some("Ada Lovelace"));

        let bob = &records[1];
        assert_eq!(bob.name, "bob");
        assert_eq!(bob.source_row, Some(4));
        assert_eq!(bob.fields.get("@photo"), Some("sub\\bob.png"));
    }

    #[test]
    fn workbook_rows_become_records() {
        let dir = tempfile::tempdir().unwrap();
        touch_png(&dir.path().join("faces/ada.png"));
        let path = dir.path().join("kids.xlsx");
        let mut book = rust_xlsxwriter::Workbook::new();
        let ws = book.add_worksheet();
        for (col, header) in ["Student Name", "Class", "@photo"].iter().enumerate() {
            ws.write_string(0, col as u16, *header).unwrap();
        }
        ws.write_string(1, 0, "Ada").unwrap();
        ws.write_number(1, 1, 3).unwrap();
        ws.write_string(1, 2, "faces/ada.png").unwrap();
        book.save(&path).unwrap();

        let settings = BookSettings {
            spreadsheet_path: Some(path),
            ..Default::default()
        };
        let records = collect_records(&settings, &JobLog::discard()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Ada");
        assert_eq!(records[0].group, "3");
        assert!(records[0].face_image_path.ends_with("faces/ada.png"));
    }

    #[test]
    fn missing_photo_file_is_skipped_and_logged() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("kids.csv");
        fs::write(&csv, "photo,name\nghost.png,Casper\n").unwrap();
        let log_path = dir.path().join("job.log");
        let log = JobLog::create(&log_path, "j").unwrap();

        let settings = BookSettings {
            spreadsheet_path: Some(csv),
            ..Default::default()
        };
        let records = collect_records(&settings, &log).unwrap();
        assert!(records.is_empty());

        let text = fs::read_to_string(&log_path).unwrap();
        assert!(text.contains("[SKIP] Record skipped: row 2: photo not found"));
    }

    #[test]
    fn missing_source_yields_no_records() {
        let settings = BookSettings {
            spreadsheet_path: Some("/definitely/not/here.csv".into()),
            ..Default::default()
        };
        let records = collect_records(&settings, &JobLog::discard()).unwrap();
        assert!(records.is_empty());

        let settings = BookSettings {
            data_source: DataSource::Folders,
            ..Default::default()
        };
        assert!(collect_records(&settings, &JobLog::discard()).unwrap().is_empty());
    }

    #[test]
    fn folder_mode_sorts_by_group_then_name() {
        let dir = tempfile::tempdir().unwrap();
        touch_png(&dir.path().join("B/zed.png"));
        touch_png(&dir.path().join("A/yan.jpg"));
        touch_png(&dir.path().join("A/amy.png"));
        fs::write(dir.path().join("A/notes.txt"), "x").unwrap();

        let settings = BookSettings {
            data_source: DataSource::Folders,
            faces_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let records = collect_records(&settings, &JobLog::discard()).unwrap();
        let keys: Vec<(&str, &str)> = records
            .iter()
            .map(|r| (r.group.as_str(), r.name.as_str()))
            .collect();
        assert_eq!(keys, vec![("A", "amy"), ("A", "yan"), ("B", "zed")]);
        assert_eq!(records[0].fields.get("@photo"), Some("A/amy.png"));
        assert_eq!(records[0].source_row, None);
    }

    #[test]
    fn unusable_names_fall_back_to_photo_then_row() {
        let dir = tempfile::tempdir().unwrap();
        let faces = dir.path().join("faces");
        touch_png(&faces.join("ada.png"));
        touch_png(&faces.join("bob.png"));
        let csv = dir.path().join("kids.csv");
        fs::write(
            &csv,
            "Student Name;Student Last Name;@photo\n\
             //;|;ada.png\n\
             *;:;bob.png\n",
        )
        .unwrap();

        let records = collect_records(&spreadsheet_settings(&csv, &faces), &JobLog::discard()).unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["ada", "bob"]);

        assert_eq!(
            first_usable_name([" / ".to_string(), "*".to_string(), "row7".to_string()]),
            "row7"
        );
        assert_eq!(first_usable_name(["Ada".to_string(), "row2".to_string()]), "Ada");
    }

    #[test]
    fn photo_paths_accept_both_separators() {
        let base = Path::new("/faces");
        assert_eq!(resolve_photo_path("a\\b.png", Some(base)), PathBuf::from("/faces/a/b.png"));
        assert_eq!(resolve_photo_path("/abs/c.png", Some(base)), PathBuf::from("/abs/c.png"));
    }
}

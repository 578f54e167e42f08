//! Write-back of artifact paths into the source spreadsheet.
//!
//! A book with N pages owns a contiguous block of N columns labeled
//! `<prefix>1 .. <prefix>N`. The block is found again by label on every
//! later run so its position never drifts. Write-back is best effort: if
//! the file cannot be read or its format cannot be rewritten, the writer
//! becomes a no-op.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bookgen_core::naming::page_column_label;

use crate::blocking::run_blocking;
use crate::error::PipelineError;
use crate::ingest::FIRST_DATA_ROW;
use crate::joblog::{JobLog, LogTag};
use crate::table::{is_writable, Table};

/// Separator used in the optional out column.
const OUT_COLUMN_SEPARATOR: &str = "; ";

struct SheetState {
    path: PathBuf,
    /// Shared with an in-flight save; edits copy on write.
    table: Arc<Table>,
    page_start: usize,
    page_count: usize,
    out_col: Option<usize>,
}

/// Writer bound to one spreadsheet for the duration of a job.
pub struct SheetWriter {
    state: Option<SheetState>,
    log: JobLog,
}

/// Header text as compared for label matching: trimmed, without the
/// leading apostrophe some spreadsheet tools add to force text.
fn normalized_header(header: &str) -> String {
    header.trim().trim_start_matches('\'').trim().to_lowercase()
}

impl SheetWriter {
    /// A writer that ignores every call.
    pub fn disabled(log: &JobLog) -> Self {
        Self {
            state: None,
            log: log.clone(),
        }
    }

    /// Open `path` and bind the page block and optional out column.
    pub fn open(
        path: &Path,
        page_count: usize,
        label_prefix: &str,
        out_column: Option<&str>,
        log: &JobLog,
    ) -> Self {
        if !is_writable(path) {
            log.warn(format!(
                "{}: this workbook format is read-only; write-back disabled",
                path.display()
            ));
            return Self::disabled(log);
        }
        let mut table = match Table::read(path) {
            Ok(table) => table,
            Err(e) => {
                let e = PipelineError::WriteBackFailure(format!("{}: {e}", path.display()));
                log.warn(format!("{e}; write-back disabled"));
                return Self::disabled(log);
            }
        };

        let out_col = out_column.map(|name| bind_out_column(&mut table, name));
        let page_start = bind_page_block(&mut table, label_prefix, page_count);
        log.line(
            LogTag::Sheet,
            format!(
                "{}: page columns {}..{}{}",
                path.display(),
                page_start + 1,
                page_start + page_count,
                out_col.map(|c| format!(", out column {}", c + 1)).unwrap_or_default()
            ),
        );

        Self {
            state: Some(SheetState {
                path: path.to_path_buf(),
                table: Arc::new(table),
                page_start,
                page_count,
                out_col,
            }),
            log: log.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    /// Zero-based first column of the page block.
    pub fn page_start(&self) -> Option<usize> {
        self.state.as_ref().map(|s| s.page_start)
    }

    /// Write one record's per-page paths into its row. `paths` is
    /// positional; it is padded with empty strings or truncated to the
    /// block width. Rows past the end of the table are appended.
    pub fn write_record_pages(&mut self, row_number: usize, paths: &[String]) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if row_number < FIRST_DATA_ROW {
            self.log.warn(format!("row {row_number} is not a data row; not written"));
            return;
        }

        let pos = row_number - FIRST_DATA_ROW;
        let table = Arc::make_mut(&mut state.table);
        if table.rows.len() <= pos {
            table.rows.resize(pos + 1, Vec::new());
        }

        let mut width = state.page_start + state.page_count;
        if let Some(out) = state.out_col {
            width = width.max(out + 1);
        }
        let row = &mut table.rows[pos];
        if row.len() < width {
            row.resize(width, String::new());
        }

        for k in 0..state.page_count {
            row[state.page_start + k] = paths.get(k).cloned().unwrap_or_default();
        }
        if let Some(out) = state.out_col {
            let joined = paths
                .iter()
                .filter(|p| !p.is_empty())
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(OUT_COLUMN_SEPARATOR);
            row[out] = joined;
        }
    }

    /// Persist the whole table. Safe to call any number of times.
    pub fn save(&self) -> Result<(), PipelineError> {
        let Some(state) = self.state.as_ref() else {
            return Ok(());
        };
        write_table(&state.table, &state.path)
    }

    /// [`save`](Self::save) on the blocking pool.
    pub async fn save_async(&self) -> Result<(), PipelineError> {
        let Some(state) = self.state.as_ref() else {
            return Ok(());
        };
        let table = Arc::clone(&state.table);
        let path = state.path.clone();
        run_blocking(move || write_table(&table, &path)).await
    }
}

fn write_table(table: &Table, path: &Path) -> Result<(), PipelineError> {
    table
        .write(path)
        .map_err(|e| PipelineError::WriteBackFailure(format!("{}: {e}", path.display())))
}

/// Find the out column by case-insensitive header, or create it in the
/// first empty column.
fn bind_out_column(table: &mut Table, name: &str) -> usize {
    let wanted = normalized_header(name);
    if let Some(col) = table
        .headers
        .iter()
        .position(|h| normalized_header(h) == wanted)
    {
        return col;
    }
    let col = (0..=table.headers.len())
        .find(|&c| table.column_is_empty(c))
        .unwrap_or(table.headers.len());
    table.set_header(col, name.trim());
    col
}

/// Locate the existing `prefix1..prefixN` run, or claim the first run of
/// N empty columns and label it.
fn bind_page_block(table: &mut Table, prefix: &str, count: usize) -> usize {
    if count == 0 {
        return table.headers.len();
    }

    let labels: Vec<String> = (1..=count)
        .map(|n| normalized_header(&page_column_label(prefix, n)))
        .collect();
    let width = table.headers.len();
    if width >= count {
        for start in 0..=(width - count) {
            let matches = table.headers[start..start + count]
                .iter()
                .zip(&labels)
                .all(|(h, label)| normalized_header(h) == *label);
            if matches {
                return start;
            }
        }
    }

    // Columns at or past the current width are empty by definition, so
    // this always terminates at `width` at the latest.
    let start = (0..=width)
        .find(|&start| (start..start + count).all(|c| table.column_is_empty(c)))
        .unwrap_or(width);
    for k in 0..count {
        table.set_header(start + k, &page_column_label(prefix, k + 1));
    }
    start
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sheet(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("kids.csv");
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn allocates_block_after_used_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = sheet(dir.path(), "name,photo\nAda,a.png\nBob,b.png\n");
        let log = JobLog::discard();

        let mut w = SheetWriter::open(&path, 2, "@page", None, &log);
        assert_eq!(w.page_start(), Some(2));
        w.write_record_pages(3, &["/o/b1.png".into(), "/o/b2.png".into()]);
        w.save().unwrap();

        let t = Table::read(&path).unwrap();
        assert_eq!(t.headers, vec!["name", "photo", "@page1", "@page2"]);
        assert_eq!(t.cell(0, 2), "");
        assert_eq!(t.cell(1, 2), "/o/b1.png");
        assert_eq!(t.cell(1, 3), "/o/b2.png");
        assert_eq!(t.cell(1, 0), "Bob");
    }

    #[test]
    fn reopening_binds_same_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = sheet(dir.path(), "name,,photo,,,notes\nAda,,a.png,,,x\n");
        let log = JobLog::discard();

        let w = SheetWriter::open(&path, 2, "@page", None, &log);
        let first = w.page_start();
        w.save().unwrap();

        // Column 1 is a single gap; the first run of two empty columns is 3..5.
        assert_eq!(first, Some(3));

        let again = SheetWriter::open(&path, 2, "@page", None, &log);
        assert_eq!(again.page_start(), first);
        again.save().unwrap();
        let third = SheetWriter::open(&path, 2, "@page", None, &log);
        assert_eq!(third.page_start(), first);

        let t = Table::read(&path).unwrap();
        assert_eq!(t.headers, vec!["name", "", "photo", "@page1", "@page2", "notes"]);
    }

    #[test]
    fn existing_labels_are_matched_with_apostrophe() {
        let dir = tempfile::tempdir().unwrap();
        let path = sheet(dir.path(), "'@page1,'@page2,name\n,,Ada\n");
        let w = SheetWriter::open(&path, 2, "@page", None, &JobLog::discard());
        assert_eq!(w.page_start(), Some(0));
    }

    #[test]
    fn short_lists_are_padded_and_missing_rows_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = sheet(dir.path(), "name\nAda\n");
        let mut w = SheetWriter::open(&path, 3, "@page", None, &JobLog::discard());

        w.write_record_pages(5, &["p1".into()]);
        w.save().unwrap();

        let t = Table::read(&path).unwrap();
        assert_eq!(t.rows.len(), 4);
        assert_eq!(t.cell(3, 1), "p1");
        assert_eq!(t.cell(3, 2), "");
        assert_eq!(t.cell(0, 0), "Ada");
    }

    #[test]
    fn out_column_is_found_or_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = sheet(dir.path(), "name,OUT\nAda,\n");
        let mut w = SheetWriter::open(&path, 2, "@page", Some("out"), &JobLog::discard());
        w.write_record_pages(2, &["a".into(), String::new()]);
        w.save().unwrap();
        let t = Table::read(&path).unwrap();
        assert_eq!(t.cell(0, 1), "a");
        assert_eq!(t.headers[2..], ["@page1", "@page2"]);

        let path = sheet(dir.path(), "name\nAda\n");
        let w = SheetWriter::open(&path, 1, "@page", Some("Results"), &JobLog::discard());
        assert_eq!(w.page_start(), Some(2));
        w.save().unwrap();
        let t = Table::read(&path).unwrap();
        assert_eq!(t.headers, vec!["name", "Results", "@page1"]);
    }

    #[test]
    fn unreadable_file_disables_writer() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("j.log");
        let log = JobLog::create(&log_path, "j").unwrap();

        let mut w = SheetWriter::open(&dir.path().join("missing.csv"), 2, "@page", None, &log);
        assert!(!w.is_active());
        w.write_record_pages(2, &["x".into()]);
        assert!(w.save().is_ok());
        assert!(!dir.path().join("missing.csv").exists());

        let text = fs::read_to_string(&log_path).unwrap();
        assert!(text.contains("[WARN] Write-back failed"));
    }

    #[test]
    fn blank_header_with_notes_is_not_claimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = sheet(dir.path(), "name,,photo\nAda,call mum,a.png\n");
        let w = SheetWriter::open(&path, 1, "@page", None, &JobLog::discard());
        assert_eq!(w.page_start(), Some(3));
    }

    #[tokio::test]
    async fn async_save_matches_sync_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = sheet(dir.path(), "name\nAda\nBob\n");
        let mut w = SheetWriter::open(&path, 1, "@page", None, &JobLog::discard());

        w.write_record_pages(2, &["/o/a.png".into()]);
        w.save_async().await.unwrap();
        w.write_record_pages(3, &["/o/b.png".into()]);
        w.save_async().await.unwrap();

        let t = Table::read(&path).unwrap();
        assert_eq!(t.cell(0, 1), "/o/a.png");
        assert_eq!(t.cell(1, 1), "/o/b.png");
    }

    fn workbook(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let mut book = rust_xlsxwriter::Workbook::new();
        let ws = book.add_worksheet();
        for (col, header) in [(0, "name"), (2, "photo"), (5, "notes")] {
            ws.write_string(0, col, header).unwrap();
        }
        ws.write_string(1, 0, "Ada").unwrap();
        ws.write_string(1, 2, "a.png").unwrap();
        ws.write_string(1, 5, "x").unwrap();
        ws.write_string(2, 0, "Bob").unwrap();
        ws.write_string(2, 2, "b.png").unwrap();
        book.save(&path).unwrap();
        path
    }

    #[test]
    fn xlsx_block_is_rebound_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = workbook(dir.path(), "kids.xlsx");
        let log = JobLog::discard();

        let mut w = SheetWriter::open(&path, 2, "@page", None, &log);
        assert!(w.is_active());
        assert_eq!(w.page_start(), Some(3));
        w.write_record_pages(3, &["/o/b1.png".into(), "/o/b2.png".into()]);
        w.save().unwrap();

        let again = SheetWriter::open(&path, 2, "@page", None, &log);
        assert_eq!(again.page_start(), Some(3));

        let t = Table::read(&path).unwrap();
        assert_eq!(t.headers, vec!["name", "", "photo", "@page1", "@page2", "notes"]);
        assert_eq!(t.cell(0, 5), "x");
        assert_eq!(t.cell(1, 3), "/o/b1.png");
        assert_eq!(t.cell(1, 4), "/o/b2.png");
        assert_eq!(t.cell(1, 0), "Bob");
    }

    #[test]
    fn macro_workbook_disables_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = workbook(dir.path(), "kids.xlsm");
        let before = fs::read(&path).unwrap();
        let log_path = dir.path().join("j.log");
        let log = JobLog::create(&log_path, "j").unwrap();

        let mut w = SheetWriter::open(&path, 1, "@page", None, &log);
        assert!(!w.is_active());
        w.write_record_pages(2, &["x".into()]);
        w.save().unwrap();

        assert_eq!(fs::read(&path).unwrap(), before);
        assert!(fs::read_to_string(&log_path).unwrap().contains("read-only"));
    }
}

//! Spreadsheet tables: delimited text or a workbook's first sheet.
//!
//! The backend follows the file extension. Text files are decoded as
//! UTF-8 (with or without BOM), then Windows-1254, then Windows-1252, and
//! the delimiter is sniffed from the header line; they are written back
//! as UTF-8 with BOM in the detected delimiter. Workbooks are read with
//! `calamine` and rewritten with `rust_xlsxwriter`, keeping every sheet's
//! cell values but not its styling. All writes go to a sibling temp file
//! which is then renamed over the original.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Range, Reader};
use encoding_rs::{WINDOWS_1252, WINDOWS_1254};
use rust_xlsxwriter::{Workbook, Worksheet};

use crate::error::PipelineError;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Extensions read through the workbook backend.
const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// The only workbook extension that can be written back.
const WRITABLE_WORKBOOK_EXTENSION: &str = "xlsx";

/// Largest column count a worksheet accepts.
const MAX_WORKBOOK_COLUMNS: usize = 16_384;

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

/// Whether `path` names a workbook rather than delimited text.
pub fn is_workbook(path: &Path) -> bool {
    WORKBOOK_EXTENSIONS.contains(&extension(path).as_str())
}

/// Whether a table read from `path` can be written back to it.
/// Macro-enabled and legacy workbooks are read-only.
pub fn is_writable(path: &Path) -> bool {
    !is_workbook(path) || extension(path) == WRITABLE_WORKBOOK_EXTENSION
}

/// Decode raw file bytes. Returns the text and the encoding that worked.
pub fn decode_text(bytes: &[u8]) -> (String, &'static str) {
    if let Some(rest) = bytes.strip_prefix(UTF8_BOM) {
        if let Ok(text) = std::str::from_utf8(rest) {
            return (text.to_string(), "utf-8-bom");
        }
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        return (text.to_string(), "utf-8");
    }
    let (text, had_errors) = WINDOWS_1254.decode_without_bom_handling(bytes);
    if !had_errors {
        return (text.into_owned(), "windows-1254");
    }
    let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
    (text.into_owned(), "windows-1252")
}

/// `;` when the header line has more semicolons than commas, else `,`.
pub fn sniff_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or("");
    let semicolons = header.matches(';').count();
    let commas = header.matches(',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

/// Where a table came from and how it is written back.
#[derive(Debug, Clone, PartialEq)]
pub enum TableFormat {
    /// Delimited text with this field separator.
    Delimited(u8),
    /// The first sheet of a workbook. The remaining sheets ride along as
    /// cell text so a rewrite does not drop them.
    Workbook {
        sheet: String,
        others: Vec<(String, Vec<Vec<String>>)>,
    },
}

/// A header row plus data rows. Rows may be ragged.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub format: TableFormat,
    /// Rows that could not be parsed, as (1-based line, reason). They are
    /// kept as empty rows so later row numbers stay aligned.
    pub malformed: Vec<(usize, String)>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
            format: TableFormat::Delimited(b','),
            malformed: Vec::new(),
        }
    }

    pub fn read(path: &Path) -> Result<Self, PipelineError> {
        if is_workbook(path) {
            return Self::read_workbook(path);
        }
        let bytes = fs::read(path)?;
        let (text, encoding) = decode_text(&bytes);
        tracing::debug!(path = %path.display(), encoding, "Decoded table");
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let delimiter = sniff_delimiter(text);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut table = Self {
            headers: Vec::new(),
            rows: Vec::new(),
            format: TableFormat::Delimited(delimiter),
            malformed: Vec::new(),
        };
        for (i, result) in reader.records().enumerate() {
            let cells = match result {
                Ok(record) => record.iter().map(str::to_string).collect(),
                Err(e) => {
                    table.malformed.push((i + 1, e.to_string()));
                    Vec::new()
                }
            };
            if i == 0 {
                table.headers = cells;
            } else {
                table.rows.push(cells);
            }
        }
        table
    }

    /// Read the first sheet of a workbook; later sheets are kept for the
    /// rewrite.
    fn read_workbook(path: &Path) -> Result<Self, PipelineError> {
        let mut workbook = open_workbook_auto(path)?;
        let mut sheets = Vec::new();
        for name in workbook.sheet_names() {
            let range = workbook.worksheet_range(&name)?;
            sheets.push((name, range_grid(&range)));
        }
        tracing::debug!(path = %path.display(), sheets = sheets.len(), "Read workbook");

        let mut sheets = sheets.into_iter();
        let (sheet, mut grid) = sheets.next().unwrap_or_else(|| ("Sheet1".to_string(), Vec::new()));
        let headers = if grid.is_empty() { Vec::new() } else { grid.remove(0) };
        Ok(Self {
            headers,
            rows: grid,
            format: TableFormat::Workbook {
                sheet,
                others: sheets.collect(),
            },
            malformed: Vec::new(),
        })
    }

    /// Cell text, or `""` when the row or column does not exist.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Whether column `col` has a blank header and no data in any row.
    ///
    /// A blank header alone is not enough: unlabeled columns often hold
    /// hand-entered notes, and a page block claimed over them would
    /// overwrite those cells on the next write-back.
    pub fn column_is_empty(&self, col: usize) -> bool {
        let header_blank = self.headers.get(col).map_or(true, |h| h.trim().is_empty());
        header_blank && self.rows.iter().all(|r| r.get(col).map_or(true, |c| c.trim().is_empty()))
    }

    pub fn set_header(&mut self, col: usize, label: &str) {
        if self.headers.len() <= col {
            self.headers.resize(col + 1, String::new());
        }
        self.headers[col] = label.to_string();
    }

    /// Atomically replace `path` with this table.
    pub fn write(&self, path: &Path) -> Result<(), PipelineError> {
        match &self.format {
            TableFormat::Delimited(delimiter) => self.write_delimited(*delimiter, path),
            TableFormat::Workbook { sheet, others } => {
                if !is_writable(path) {
                    return Err(PipelineError::WriteBackFailure(format!(
                        "{}: only .{WRITABLE_WORKBOOK_EXTENSION} workbooks can be rewritten",
                        path.display()
                    )));
                }
                self.write_workbook(sheet, others, path)
            }
        }
    }

    fn write_delimited(&self, delimiter: u8, path: &Path) -> Result<(), PipelineError> {
        let tmp = temp_path(path);
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(UTF8_BOM)?;
            let mut writer = csv::WriterBuilder::new()
                .delimiter(delimiter)
                .flexible(true)
                .from_writer(file);
            writer.write_record(&self.headers)?;
            for row in &self.rows {
                if row.is_empty() {
                    // A lone empty field keeps the row from collapsing
                    // into a skipped blank line.
                    writer.write_record([""])?;
                } else {
                    writer.write_record(row)?;
                }
            }
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn write_workbook(
        &self,
        sheet: &str,
        others: &[(String, Vec<Vec<String>>)],
        path: &Path,
    ) -> Result<(), PipelineError> {
        let mut workbook = Workbook::new();
        {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(sheet)?;
            write_cells(worksheet, 0, &self.headers)?;
            for (i, row) in self.rows.iter().enumerate() {
                write_cells(worksheet, i + 1, row)?;
            }
        }
        for (name, grid) in others {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(name.as_str())?;
            for (i, row) in grid.iter().enumerate() {
                write_cells(worksheet, i, row)?;
            }
        }

        let tmp = temp_path(path);
        workbook.save(&tmp)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// A sheet's used range as text rows anchored at A1, trailing blanks
/// trimmed.
fn range_grid(range: &Range<Data>) -> Vec<Vec<String>> {
    let Some((first_row, first_col)) = range.start() else {
        return Vec::new();
    };
    let mut grid = vec![Vec::new(); first_row as usize];
    for row in range.rows() {
        let mut cells = vec![String::new(); first_col as usize];
        cells.extend(row.iter().map(cell_text));
        while cells.last().is_some_and(String::is_empty) {
            cells.pop();
        }
        grid.push(cells);
    }
    grid
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        other => other.to_string(),
    }
}

/// Text that reads as a plain number goes back out as a number. Leading
/// zeros and explicit signs stay text so codes like `007` survive.
fn numeric_cell(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let leading_zero = bytes.len() > 1 && bytes[0] == b'0' && bytes[1] != b'.';
    if leading_zero || text.starts_with('+') || text.trim() != text {
        return None;
    }
    text.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn write_cells(worksheet: &mut Worksheet, row: usize, cells: &[String]) -> Result<(), PipelineError> {
    if cells.len() > MAX_WORKBOOK_COLUMNS {
        return Err(PipelineError::WriteBackFailure(format!(
            "row {} has {} columns; a worksheet holds at most {MAX_WORKBOOK_COLUMNS}",
            row + 1,
            cells.len()
        )));
    }
    let row = u32::try_from(row)
        .map_err(|_| PipelineError::WriteBackFailure(format!("row {row} is past the worksheet limit")))?;
    for (col, text) in cells.iter().enumerate() {
        if text.is_empty() {
            continue;
        }
        // Bounded by MAX_WORKBOOK_COLUMNS above.
        let col = col as u16;
        match numeric_cell(text) {
            Some(number) => worksheet.write_number(row, col, number)?,
            None => worksheet.write_string(row, col, text.as_str())?,
        };
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_prefers_utf8_and_strips_bom() {
        let (text, enc) = decode_text("\u{feff}ad;soyad".as_bytes());
        assert_eq!(text, "ad;soyad");
        assert_eq!(enc, "utf-8-bom");

        let (text, enc) = decode_text("Öğrenci".as_bytes());
        assert_eq!(text, "Öğrenci");
        assert_eq!(enc, "utf-8");
    }

    #[test]
    fn decode_falls_back_to_turkish_codepage() {
        // "Sınıf" in Windows-1254: ı = 0xFD
        let bytes = [b'S', 0xFD, b'n', 0xFD, b'f'];
        let (text, enc) = decode_text(&bytes);
        assert_eq!(text, "Sınıf");
        assert_eq!(enc, "windows-1254");
    }

    #[test]
    fn delimiter_is_sniffed_from_header() {
        assert_eq!(sniff_delimiter("a;b;c\n1,2;3;4"), b';');
        assert_eq!(sniff_delimiter("a,b\n"), b',');
        assert_eq!(sniff_delimiter(""), b',');
    }

    #[test]
    fn parse_keeps_ragged_rows() {
        let t = Table::parse("name;class\nAda;3-B;extra\nBob\n");
        assert_eq!(t.headers, vec!["name", "class"]);
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.cell(0, 2), "extra");
        assert_eq!(t.cell(1, 1), "");
        assert_eq!(t.format, TableFormat::Delimited(b';'));
        assert!(t.malformed.is_empty());
    }

    #[test]
    fn write_then_read_preserves_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kids.csv");

        let mut t = Table::parse("name;photo\nAda;a.png\n");
        t.set_header(3, "@page1");
        t.write(&path).unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert!(raw.starts_with(UTF8_BOM));

        let back = Table::read(&path).unwrap();
        assert_eq!(back.headers, vec!["name", "photo", "", "@page1"]);
        assert_eq!(back.cell(0, 1), "a.png");
        assert_eq!(back.format, TableFormat::Delimited(b';'));
        assert!(!dir.path().join("kids.csv.tmp").exists());
    }

    #[test]
    fn empty_column_detection() {
        let t = Table::parse("a,,c\n1,,3\n4,x,6\n");
        assert!(!t.column_is_empty(1));
        assert!(t.column_is_empty(5));
        let t = Table::parse("a,,c\n1,,3\n");
        assert!(t.column_is_empty(1));
    }

    #[test]
    fn blank_header_over_data_is_not_empty() {
        let t = Table::parse("name,\nAda,left early\n");
        assert!(!t.column_is_empty(1));
        assert!(t.column_is_empty(2));
    }

    #[test]
    fn backend_follows_extension() {
        assert!(is_workbook(Path::new("kids.XLSX")));
        assert!(is_workbook(Path::new("kids.xlsm")));
        assert!(!is_workbook(Path::new("kids.csv")));
        assert!(is_writable(Path::new("kids.xlsx")));
        assert!(is_writable(Path::new("kids.csv")));
        assert!(!is_writable(Path::new("kids.xlsm")));
        assert!(!is_writable(Path::new("kids.xls")));
    }

    fn write_fixture_workbook(path: &Path) {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("Kids").unwrap();
        sheet.write_string(0, 0, "name").unwrap();
        sheet.write_string(0, 2, "code").unwrap();
        sheet.write_string(1, 0, "Ada").unwrap();
        sheet.write_number(1, 2, 7).unwrap();
        sheet.write_string(2, 0, "Bob").unwrap();
        sheet.write_string(2, 2, "007").unwrap();
        let notes = workbook.add_worksheet();
        notes.set_name("Notes").unwrap();
        notes.write_string(1, 1, "keep me").unwrap();
        workbook.save(path).unwrap();
    }

    #[test]
    fn workbook_reads_first_sheet_as_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kids.xlsx");
        write_fixture_workbook(&path);

        let t = Table::read(&path).unwrap();
        assert_eq!(t.headers, vec!["name", "", "code"]);
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.cell(0, 2), "7");
        assert_eq!(t.cell(1, 2), "007");
        assert_matches::assert_matches!(
            &t.format,
            TableFormat::Workbook { sheet, others } if sheet == "Kids" && others.len() == 1
        );
    }

    #[test]
    fn workbook_rewrite_keeps_values_and_other_sheets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kids.xlsx");
        write_fixture_workbook(&path);

        let mut t = Table::read(&path).unwrap();
        t.set_header(1, "@page1");
        t.rows[0][1] = "/out/Ada/page1.png".into();
        t.write(&path).unwrap();
        assert!(!dir.path().join("kids.xlsx.tmp").exists());

        let back = Table::read(&path).unwrap();
        assert_eq!(back.headers, vec!["name", "@page1", "code"]);
        assert_eq!(back.cell(0, 1), "/out/Ada/page1.png");
        assert_eq!(back.cell(0, 2), "7");
        assert_eq!(back.cell(1, 2), "007");
        let TableFormat::Workbook { others, .. } = &back.format else {
            panic!("expected a workbook");
        };
        assert_eq!(others[0].0, "Notes");
        assert_eq!(others[0].1[1], vec!["", "keep me"]);
    }

    #[test]
    fn read_only_workbook_refuses_write() {
        let dir = tempfile::tempdir().unwrap();
        let t = Table {
            format: TableFormat::Workbook {
                sheet: "Sheet1".into(),
                others: Vec::new(),
            },
            ..Table::new(vec!["name".into()])
        };
        let err = t.write(&dir.path().join("kids.xlsm")).unwrap_err();
        assert_matches::assert_matches!(err, PipelineError::WriteBackFailure(_));
    }

    #[test]
    fn numeric_text_detection() {
        assert_eq!(numeric_cell("7"), Some(7.0));
        assert_eq!(numeric_cell("0.5"), Some(0.5));
        assert_eq!(numeric_cell("007"), None);
        assert_eq!(numeric_cell("+1"), None);
        assert_eq!(numeric_cell("NaN"), None);
        assert_eq!(numeric_cell("3-B"), None);
    }
}

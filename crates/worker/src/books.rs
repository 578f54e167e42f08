//! Book definitions stored as JSON files, one per book.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use bookgen_core::book::Book;
use regex::Regex;

use crate::error::WorkerError;

static BOOK_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,127}$").expect("book id pattern is valid")
});

/// Reads `<dir>/<book_id>.json`.
#[derive(Debug, Clone)]
pub struct BookStore {
    dir: PathBuf,
}

impl BookStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `book_id`. Ids that could escape the directory are
    /// rejected.
    pub fn path_for(&self, book_id: &str) -> Result<PathBuf, WorkerError> {
        if !BOOK_ID_RE.is_match(book_id) || book_id.contains("..") {
            return Err(WorkerError::InvalidBookId(book_id.to_string()));
        }
        Ok(self.dir.join(format!("{book_id}.json")))
    }

    /// Load and validate one book. The id in the URL wins over the one in
    /// the file.
    pub async fn load(&self, book_id: &str) -> Result<Book, WorkerError> {
        let path = self.path_for(book_id)?;
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(WorkerError::BookNotFound(book_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let mut book = parse_book(book_id, &text)?;
        book.id = book_id.to_string();
        book.validate()?;
        Ok(book)
    }

    /// Load a book from an arbitrary file, as the command line does.
    pub async fn load_file(path: &Path) -> Result<Book, WorkerError> {
        let label = path.display().to_string();
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(WorkerError::BookNotFound(label));
            }
            Err(e) => return Err(e.into()),
        };
        let book = parse_book(&label, &text)?;
        book.validate()?;
        Ok(book)
    }
}

fn parse_book(id: &str, text: &str) -> Result<Book, WorkerError> {
    serde_json::from_str(text).map_err(|source| WorkerError::BookParse {
        id: id.to_string(),
        source,
    })
}

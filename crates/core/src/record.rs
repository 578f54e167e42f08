//! One subject to render: a face image plus the free-form fields that came
//! with it.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::keys::{fold_key, key_variants};

/// Ordered field map with normalized-key lookup.
///
/// Every inserted field is indexed under all of its [`key_variants`]. When
/// two columns produce the same variant the first one registered keeps it;
/// a column's exact spelling always resolves to that column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a field. Keys are trimmed; blank keys are ignored.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        let key = key.trim();
        if key.is_empty() {
            return;
        }
        let value = value.into();

        if let Some(&idx) = self.index.get(key) {
            if self.entries[idx].0 == key {
                self.entries[idx].1 = value;
                return;
            }
        }

        let idx = self.entries.len();
        self.entries.push((key.to_string(), value));
        self.index.insert(key.to_string(), idx);
        for variant in key_variants(key) {
            self.index.entry(variant).or_insert(idx);
        }
    }

    /// Insert only when no existing field answers to `key`.
    pub fn insert_default(&mut self, key: &str, value: impl Into<String>) {
        if self.get(key).is_none() {
            self.insert(key, value);
        }
    }

    /// Look a field up literally, then lowercased, then through its
    /// variants, then by folded comparison.
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        if let Some(&idx) = self.index.get(key) {
            return Some(&self.entries[idx].1);
        }
        if let Some(&idx) = self.index.get(&key.to_lowercase()) {
            return Some(&self.entries[idx].1);
        }
        for variant in key_variants(key) {
            if let Some(&idx) = self.index.get(&variant) {
                return Some(&self.entries[idx].1);
            }
        }
        let folded = fold_key(key);
        self.entries
            .iter()
            .find(|(k, _)| fold_key(k) == folded)
            .map(|(_, v)| v.as_str())
    }

    /// The first non-blank value among `keys`, trimmed.
    pub fn first_non_empty(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|k| self.get(k))
            .map(str::trim)
            .find(|v| !v.is_empty())
    }

    /// Fields in insertion order, under their original spelling.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (k, v) in iter {
            map.insert(k.as_ref(), v);
        }
        map
    }
}

/// A subject to render.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub face_image_path: PathBuf,
    /// Display name; also the per-record output directory name.
    pub name: String,
    /// Grouping label (class / section). May be empty.
    pub group: String,
    pub fields: FieldMap,
    /// 1-based spreadsheet row (row 1 is the header). `None` for
    /// folder-sourced records.
    pub source_row: Option<usize>,
}

//! `{placeholder}` substitution for prompt templates.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::keys::{fold_key, key_variants, lower_tr};
use crate::record::Record;

/// Token substituted for gender values that match a feminine marker.
pub const GENDER_TOKEN_FEMININE: &str = "girl";

/// Token substituted for every other non-empty gender value.
pub const GENDER_TOKEN_DEFAULT: &str = "boy";

/// Recognized after Turkish-aware lowercasing and trimming.
const FEMININE_MARKERS: &[&str] = &[
    "kız", "kiz", "k", "kadın", "kadin", "female", "f", "woman", "girl",
];

/// Field names treated as the gender column, compared by [`fold_key`].
const GENDER_FIELD_NAMES: &[&str] = &["cinsiyet", "gender", "sex"];

/// `{key}` where key is letters (Latin incl. extended), digits, space,
/// `_`, `@` or `-`.
static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z0-9_ @\-\x{00C0}-\x{024F}\x{1E00}-\x{1EFF}]+)\}")
        .expect("placeholder regex is valid")
});

/// Map a raw gender value onto one of the two canonical tokens.
/// Returns `None` for a blank value.
pub fn canonical_gender(raw: &str) -> Option<&'static str> {
    let value = lower_tr(raw.trim());
    if value.is_empty() {
        return None;
    }
    if FEMININE_MARKERS.contains(&value.as_str()) {
        Some(GENDER_TOKEN_FEMININE)
    } else {
        Some(GENDER_TOKEN_DEFAULT)
    }
}

fn is_gender_key(key: &str) -> bool {
    GENDER_FIELD_NAMES.contains(&fold_key(key).as_str())
}

/// Variable map used to render one record's templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    vars: HashMap<String, String>,
    folded: HashMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-ins, then every record field under all of its variants, then
    /// gender canonicalization.
    pub fn for_record(record: &Record) -> Self {
        let mut vars = Self::new();

        let photo = record.face_image_path.to_string_lossy().into_owned();
        vars.set("name", &record.name);
        vars.set("class", &record.group);
        vars.set("group", &record.group);
        vars.set("photo", &photo);
        vars.set("@photo", record.fields.get("@photo").unwrap_or(photo.as_str()));

        for (key, value) in record.fields.iter() {
            vars.set(key, value);
        }

        let gender_keys: Vec<&str> = record
            .fields
            .iter()
            .map(|(k, _)| k)
            .filter(|k| is_gender_key(k))
            .collect();
        let token = gender_keys
            .iter()
            .filter_map(|k| record.fields.get(k))
            .find_map(canonical_gender);

        let mut names: Vec<String> = gender_keys.iter().map(|k| k.to_string()).collect();
        for name in GENDER_FIELD_NAMES {
            names.push(name.to_string());
            names.push(name.to_uppercase());
            let mut chars = name.chars();
            if let Some(first) = chars.next() {
                names.push(first.to_uppercase().chain(chars).collect());
            }
        }

        match token {
            Some(token) => {
                for name in &names {
                    vars.force(name, token);
                }
            }
            None => {
                for name in &names {
                    vars.remove(name);
                }
            }
        }

        vars
    }

    /// Register `value` under every variant of `key`. Existing variant
    /// entries from earlier keys are overwritten; the exact spelling is
    /// always overwritten.
    pub fn set(&mut self, key: &str, value: &str) {
        for variant in key_variants(key) {
            self.vars.insert(variant, value.to_string());
        }
        self.folded
            .entry(fold_key(key))
            .or_insert_with(|| value.to_string());
    }

    fn force(&mut self, key: &str, value: &str) {
        for variant in key_variants(key) {
            self.vars.insert(variant, value.to_string());
        }
        self.folded.insert(fold_key(key), value.to_string());
    }

    fn remove(&mut self, key: &str) {
        for variant in key_variants(key) {
            self.vars.remove(&variant);
        }
        self.folded.remove(&fold_key(key));
    }

    /// Literal, then lowercase, then variants, then folded comparison.
    pub fn lookup(&self, key: &str) -> Option<&str> {
        let key = key.trim();
        if let Some(v) = self.vars.get(key) {
            return Some(v);
        }
        if let Some(v) = self.vars.get(&key.to_lowercase()) {
            return Some(v);
        }
        for variant in key_variants(key) {
            if let Some(v) = self.vars.get(&variant) {
                return Some(v);
            }
        }
        self.folded.get(&fold_key(key)).map(String::as_str)
    }

    /// Substitute every resolvable placeholder. Unknown placeholders are
    /// left exactly as written.
    pub fn render(&self, template: &str) -> String {
        PLACEHOLDER_RE
            .replace_all(template, |caps: &Captures<'_>| match self.lookup(&caps[1]) {
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

/// Render `template` against a single record.
pub fn resolve(template: &str, record: &Record) -> String {
    TemplateVars::for_record(record).render(template)
}

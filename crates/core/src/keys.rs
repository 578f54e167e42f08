//! Column-name normalization shared by record ingestion and template
//! resolution.
//!
//! A header such as `"Öğrenci Adı"` is reachable under every common
//! spelling an author might type: lowercased, snake_cased, with spaces
//! removed, with the Turkish dotted/dotless `I` folded, and with
//! diacritics stripped. [`key_variants`] produces that set for insertion;
//! [`fold_key`] is the single most aggressive form, used as the last-resort
//! comparison key.

use std::collections::HashSet;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Lowercase with the Turkish `İ`/`ı` pair folded onto plain `i`.
pub fn lower_tr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            'İ' | 'ı' => out.push('i'),
            _ => out.extend(c.to_lowercase()),
        }
    }
    out
}

/// Map `ı -> i` and `İ -> I`, preserving case otherwise.
fn turkish_fold(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'ı' => 'i',
            'İ' => 'I',
            other => other,
        })
        .collect()
}

/// Strip combining marks after NFKD decomposition (`"Şube" -> "Sube"`).
/// Characters without a decomposition, like `ı`, pass through.
pub fn deaccent(s: &str) -> String {
    s.nfkd().filter(|c| !is_combining_mark(*c)).collect()
}

/// The six surface forms of one spelling: as-is, lowercase, snake, snake
/// lowercase, no-space, no-space lowercase.
fn surface_forms(s: &str) -> [String; 6] {
    let words: Vec<&str> = s.split_whitespace().collect();
    let snake = words.join("_");
    let nospace = words.concat();
    [
        s.to_string(),
        s.to_lowercase(),
        snake.to_lowercase(),
        snake,
        nospace.to_lowercase(),
        nospace,
    ]
}

/// Every lookup key a column named `key` is registered under.
///
/// The result is de-duplicated and ordered with the original spelling
/// first. An empty or whitespace-only key yields no variants.
pub fn key_variants(key: &str) -> Vec<String> {
    let key = key.trim();
    if key.is_empty() {
        return Vec::new();
    }

    let folded = turkish_fold(key);
    let spellings = [
        key.to_string(),
        folded.clone(),
        folded.to_lowercase(),
        deaccent(key),
        deaccent(&folded),
    ];

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for spelling in &spellings {
        for form in surface_forms(spelling) {
            if !form.is_empty() && seen.insert(form.clone()) {
                out.push(form);
            }
        }
    }
    out
}

/// Collapse a key to its most permissive comparison form: Turkish-aware
/// lowercase, diacritics removed, and whitespace, `-` and `_` dropped.
pub fn fold_key(key: &str) -> String {
    deaccent(&lower_tr(key.trim()))
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_cover_common_spellings() {
        let v = key_variants("Student Name");
        for expected in [
            "Student Name",
            "student name",
            "Student_Name",
            "student_name",
            "StudentName",
            "studentname",
        ] {
            assert!(v.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn variants_are_unique_and_original_first() {
        let v = key_variants("name");
        assert_eq!(v[0], "name");
        assert_eq!(v.len(), 1);
    }

    #[test]
    fn variants_fold_turkish_and_diacritics() {
        let v = key_variants("Adı");
        assert!(v.contains(&"Adi".to_string()));
        assert!(v.contains(&"adi".to_string()));

        let v = key_variants("Şube Adı");
        assert!(v.contains(&"sube_adi".to_string()));
        assert!(v.contains(&"subeadi".to_string()));
    }

    #[test]
    fn variants_of_blank_key_are_empty() {
        assert!(key_variants("   ").is_empty());
    }

    #[test]
    fn fold_key_ignores_separators_and_case() {
        assert_eq!(fold_key("Student-Last_Name"), "studentlastname");
        assert_eq!(fold_key("  SINIF "), "sinif");
        assert_eq!(fold_key("Sınıf"), "sinif");
        assert_eq!(fold_key("İsim"), "isim");
    }

    #[test]
    fn lower_tr_folds_dotted_capital() {
        assert_eq!(lower_tr("KIZ"), "kiz");
        assert_eq!(lower_tr("Kız"), "kiz");
        assert_eq!(lower_tr("İ"), "i");
    }
}

use crate::minhash::MinHashSignature;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;

pub type DocId = u64;

/// Fallback partition for labels that sanitize to nothing.
pub const UNCATEGORIZED: &str = "uncategorized";

/// Partition label, restricted to a charset that is safe as a directory name.
///
/// Categories are admin-editable labels rather than a closed set, so invalid
/// input is mapped onto [`UNCATEGORIZED`] instead of being rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(String);

impl Category {
    pub fn sanitize(raw: &str) -> Self {
        let safe: String = raw
            .trim()
            .chars()
            .map(|c| if is_category_char(c) { c } else { '_' })
            .collect();
        if safe.is_empty() || safe.chars().all(|c| c == '_') {
            Self::uncategorized()
        } else {
            Category(safe)
        }
    }

    pub fn uncategorized() -> Self {
        Category(UNCATEGORIZED.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_category_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(c, 'а'..='я' | 'А'..='Я' | 'ё' | 'Ё' | '_' | '-')
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Category {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Draft,
    Final,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Final => "final",
        }
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(DocumentStatus::Draft),
            "final" => Ok(DocumentStatus::Final),
            other => Err(format!("unknown status '{other}', expected draft or final")),
        }
    }
}

/// One submitted work as persisted in its category partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: DocId,
    pub title: String,
    pub author: Option<String>,
    /// Name of the file as uploaded by the user.
    pub filename: Option<String>,
    /// Path of the saved original, relative to the data directory.
    pub file_path: Option<String>,
    /// Normalized content; raw extracted text is never stored.
    pub content: String,
    pub word_count: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
    pub category: Category,
    pub status: DocumentStatus,
    pub user_id: Option<String>,
    pub institution: Option<String>,
    pub signature: MinHashSignature,
    pub shingle_count: usize,
    /// Set once a final report has been produced for this document.
    pub originality_percent: Option<f64>,
}

/// Everything the store needs to persist a new document. The id and the upload
/// timestamp are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub title: String,
    pub author: Option<String>,
    pub filename: Option<String>,
    pub stored_file: Option<StoredFile>,
    pub content: String,
    /// Raw label; sanitized by the store.
    pub category: String,
    pub status: DocumentStatus,
    pub user_id: Option<String>,
    pub institution: Option<String>,
    pub signature: MinHashSignature,
    pub shingle_count: usize,
}

/// A saved original upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    /// Generated file name inside the category's uploads directory.
    pub filename: String,
    /// Path relative to the data directory.
    pub relative_path: String,
}

/// The persisted slice of the corpus belonging to one category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub documents: Vec<StoredDocument>,
}

/// Id allocator plus the id -> category map used for id lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalIndex {
    pub next_id: DocId,
    pub id_to_category: BTreeMap<DocId, Category>,
}

impl Default for GlobalIndex {
    fn default() -> Self {
        Self { next_id: 1, id_to_category: BTreeMap::new() }
    }
}

impl GlobalIndex {
    /// Reserve the next id for `category`. Ids are never handed out twice.
    pub fn allocate(&mut self, category: &Category) -> DocId {
        let id = self.next_id;
        self.next_id += 1;
        self.id_to_category.insert(id, category.clone());
        id
    }

    pub fn category_of(&self, id: DocId) -> Option<&Category> {
        self.id_to_category.get(&id)
    }

    pub fn forget(&mut self, id: DocId) -> Option<Category> {
        self.id_to_category.remove(&id)
    }
}

/// Number of whitespace-delimited words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_latin_cyrillic_digits() {
        assert_eq!(Category::sanitize("diploma").as_str(), "diploma");
        assert_eq!(Category::sanitize("Курсовая-2024_v1").as_str(), "Курсовая-2024_v1");
        assert_eq!(Category::sanitize("Ёлка").as_str(), "Ёлка");
    }

    #[test]
    fn sanitize_replaces_disallowed_chars() {
        assert_eq!(Category::sanitize("lab work/../x").as_str(), "lab_work____x");
        assert_eq!(Category::sanitize("a.b").as_str(), "a_b");
    }

    #[test]
    fn sanitize_falls_back_to_uncategorized() {
        assert_eq!(Category::sanitize("").as_str(), UNCATEGORIZED);
        assert_eq!(Category::sanitize("   ").as_str(), UNCATEGORIZED);
        assert_eq!(Category::sanitize("../").as_str(), UNCATEGORIZED);
        assert_eq!(Category::sanitize("日本").as_str(), UNCATEGORIZED);
    }

    #[test]
    fn sanitize_is_idempotent() {
        for raw in ["x y", "Дипломная работа", "", "a/b\\c", "coursework"] {
            let once = Category::sanitize(raw);
            assert_eq!(Category::sanitize(once.as_str()), once);
        }
    }

    #[test]
    fn allocate_is_monotonic_and_forget_does_not_recycle() {
        let mut idx = GlobalIndex::default();
        let cat = Category::sanitize("lab");
        let a = idx.allocate(&cat);
        let b = idx.allocate(&cat);
        assert_eq!((a, b), (1, 2));
        assert_eq!(idx.forget(b), Some(cat.clone()));
        assert_eq!(idx.allocate(&cat), 3);
        assert!(idx.category_of(2).is_none());
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("Final".parse::<DocumentStatus>(), Ok(DocumentStatus::Final));
        assert_eq!(" draft ".parse::<DocumentStatus>(), Ok(DocumentStatus::Draft));
        assert!("archived".parse::<DocumentStatus>().is_err());
    }
}

//! Upload and check orchestration.
//!
//! Both paths run the same [`Fingerprinter`], so a checked text and a stored
//! document are always signed with identical shingle width, signature length
//! and hash family.

use crate::compare::{compare, Similarity};
use crate::config::{CheckConfig, Config};
use crate::fingerprint::Fingerprinter;
use crate::index::{Category, DocId, DocumentStatus, NewDocument, StoredDocument};
use crate::store::{CorpusStore, QueryFilter};
use crate::{Error, Result};
use serde::Serialize;
use std::time::Instant;

/// Category label that selects every partition.
pub const ALL_CATEGORIES: &str = "all";

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub title: String,
    pub author: Option<String>,
    pub category: Option<String>,
    pub status: DocumentStatus,
    pub user_id: Option<String>,
    pub institution: Option<String>,
    pub original_filename: String,
    pub file_bytes: Vec<u8>,
    /// Text extracted from the file by the caller.
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct CheckRequest {
    pub content: String,
    pub category: Option<String>,
    pub institution: Option<String>,
    pub top_k: Option<usize>,
    pub exclude_user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchEntry {
    pub id: DocId,
    pub title: String,
    pub author: Option<String>,
    pub user_id: Option<String>,
    pub category: Category,
    /// Rounded percentage.
    pub similarity: u8,
    /// Percentage with two decimals, for reports.
    pub similarity_exact: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub uniqueness_percent: u8,
    pub checked_count: usize,
    pub processing_time_ms: u64,
    pub matches: Vec<MatchEntry>,
}

/// Partitions a check reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchScope {
    All,
    Categories(Vec<Category>),
}

/// Resolve the partitions to search for a submitted category label.
///
/// An empty label or `all` searches everything. A label that belongs to an
/// overlap group searches the whole group; any other label searches only its
/// own partition.
pub fn search_scope(raw: Option<&str>, overlap_groups: &[Vec<String>]) -> SearchScope {
    let raw = raw.map(str::trim).unwrap_or("");
    if raw.is_empty() || raw.eq_ignore_ascii_case(ALL_CATEGORIES) {
        return SearchScope::All;
    }
    let category = Category::sanitize(raw);
    for group in overlap_groups {
        let members: Vec<Category> = group.iter().map(|c| Category::sanitize(c)).collect();
        if members.contains(&category) {
            let mut unique = Vec::with_capacity(members.len());
            for m in members {
                if !unique.contains(&m) {
                    unique.push(m);
                }
            }
            return SearchScope::Categories(unique);
        }
    }
    SearchScope::Categories(vec![category])
}

pub struct Engine<S> {
    store: S,
    fingerprinter: Fingerprinter,
    check: CheckConfig,
}

impl<S: CorpusStore> Engine<S> {
    pub fn new(store: S, config: &Config) -> Self {
        Self {
            store,
            fingerprinter: Fingerprinter::new(&config.fingerprint),
            check: config.check.clone(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn fingerprinter(&self) -> &Fingerprinter {
        &self.fingerprinter
    }

    /// Save the original, fingerprint the extracted text and add the document
    /// to its category partition. Only normalized content is stored.
    pub fn upload(&self, req: UploadRequest) -> Result<StoredDocument> {
        let title = req.title.trim();
        if title.is_empty() {
            return Err(Error::InputRejected("title is required".into()));
        }
        if req.content.trim().is_empty() {
            return Err(Error::InputRejected("content is required".into()));
        }
        if req.file_bytes.is_empty() {
            return Err(Error::InputRejected("file is required".into()));
        }

        let category = Category::sanitize(req.category.as_deref().unwrap_or(""));
        let saved = self.store.save_original(&category, &req.original_filename, &req.file_bytes)?;
        let fp = self.fingerprinter.fingerprint(&req.content);

        let new_doc = NewDocument {
            title: title.to_string(),
            author: non_empty(req.author),
            filename: Some(req.original_filename),
            stored_file: Some(saved.clone()),
            content: fp.normalized,
            category: category.as_str().to_string(),
            status: req.status,
            user_id: non_empty(req.user_id),
            institution: non_empty(req.institution),
            signature: fp.signature,
            shingle_count: fp.shingle_count,
        };
        match self.store.add_document(new_doc) {
            Ok(doc) => {
                tracing::info!(id = doc.id, category = %doc.category, status = doc.status.as_str(), shingles = doc.shingle_count, "document uploaded");
                Ok(doc)
            }
            Err(e) => {
                if let Err(cleanup) = self.store.remove_original(&saved.relative_path) {
                    tracing::warn!(path = %saved.relative_path, error = %cleanup, "failed to remove original after failed upload");
                }
                Err(e)
            }
        }
    }

    /// Score `req.content` against the searched partitions. Nothing is persisted.
    pub fn check(&self, req: &CheckRequest) -> Result<CheckOutcome> {
        let start = Instant::now();
        let chars = req.content.trim().chars().count();
        if chars < self.check.min_content_chars {
            return Err(Error::InputRejected(format!(
                "content must be at least {} characters",
                self.check.min_content_chars
            )));
        }
        let top_k = req
            .top_k
            .unwrap_or(self.check.default_top_k)
            .clamp(1, self.check.max_top_k.max(1));

        let fp = self.fingerprinter.fingerprint(&req.content);
        let scope = search_scope(req.category.as_deref(), &self.check.overlap_groups);
        let filter = QueryFilter {
            categories: match scope {
                SearchScope::All => None,
                SearchScope::Categories(list) => Some(list),
            },
            institution: non_empty(req.institution.clone()),
            exclude_user_id: non_empty(req.exclude_user_id.clone()),
            ..QueryFilter::default()
        };
        let candidates = self.store.query(&filter)?;

        if candidates.is_empty() {
            return Ok(CheckOutcome {
                uniqueness_percent: 100,
                checked_count: 0,
                processing_time_ms: elapsed_ms(start),
                matches: Vec::new(),
            });
        }

        let expected_len = self.fingerprinter.signature_len();
        let mut scored: Vec<(Similarity, StoredDocument)> = Vec::with_capacity(candidates.len());
        for doc in candidates {
            if doc.signature.len() != expected_len {
                tracing::warn!(id = doc.id, len = doc.signature.len(), expected_len, "stored signature has a different length; skipping");
                continue;
            }
            scored.push((compare(&fp.signature, &doc.signature), doc));
        }
        let checked_count = scored.len();
        // Stable sort: equal scores keep the store's most-recent-first order.
        scored.sort_by(|a, b| b.0.matches.cmp(&a.0.matches));

        let uniqueness_percent = 100 - scored.first().map(|(s, _)| s.percent()).unwrap_or(0);
        let matches: Vec<MatchEntry> = scored
            .into_iter()
            .take(top_k)
            .map(|(sim, doc)| MatchEntry {
                id: doc.id,
                title: doc.title,
                author: doc.author,
                user_id: doc.user_id,
                category: doc.category,
                similarity: sim.percent(),
                similarity_exact: sim.percent_2dp(),
            })
            .collect();

        let outcome = CheckOutcome {
            uniqueness_percent,
            checked_count,
            processing_time_ms: elapsed_ms(start),
            matches,
        };
        tracing::info!(
            uniqueness = outcome.uniqueness_percent,
            checked = outcome.checked_count,
            took_ms = outcome.processing_time_ms,
            "check complete"
        );
        Ok(outcome)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

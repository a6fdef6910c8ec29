//! Corpus storage abstraction.
//!
//! The [`CorpusStore`] trait is everything the engine needs from a corpus:
//! category-partitioned documents, a global id allocator, saved originals and
//! lazy draft expiry. [`FileStore`] persists to a data directory and
//! [`MemoryStore`] keeps everything in process memory.
//!
//! # Exclusive access
//!
//! Each partition and the global index are read-modify-write resources. Both
//! implementations serialize those sequences per handle; two handles (or two
//! processes) on one data directory are not coordinated and the later write to
//! a partition wins.
//!
//! All operations may block on I/O; async callers should use a blocking pool.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::index::{word_count, Category, DocId, DocumentStatus, NewDocument, StoredDocument, StoredFile};
use crate::Result;
use std::sync::Arc;
use time::OffsetDateTime;

/// Source of "now" for upload timestamps and draft expiry.
pub type Clock = Arc<dyn Fn() -> OffsetDateTime + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(OffsetDateTime::now_utc)
}

/// Which documents a [`CorpusStore::query`] returns.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    /// Partitions to read; `None` reads every partition.
    pub categories: Option<Vec<Category>>,
    pub institution: Option<String>,
    pub exclude_user_id: Option<String>,
    pub owner_id: Option<String>,
    pub status: Option<DocumentStatus>,
}

impl QueryFilter {
    pub fn categories(categories: Vec<Category>) -> Self {
        Self { categories: Some(categories), ..Self::default() }
    }

    pub fn matches(&self, doc: &StoredDocument) -> bool {
        if let Some(inst) = &self.institution {
            if doc.institution.as_deref() != Some(inst.as_str()) {
                return false;
            }
        }
        if let Some(excluded) = &self.exclude_user_id {
            if doc.user_id.as_deref() == Some(excluded.as_str()) {
                return false;
            }
        }
        if let Some(owner) = &self.owner_id {
            if doc.user_id.as_deref() != Some(owner.as_str()) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if doc.status != status {
                return false;
            }
        }
        true
    }
}

pub trait CorpusStore: Send + Sync {
    /// Persist an uploaded original under the category's uploads directory.
    fn save_original(&self, category: &Category, original_name: &str, bytes: &[u8]) -> Result<StoredFile>;

    fn read_original(&self, relative_path: &str) -> Result<Vec<u8>>;

    fn remove_original(&self, relative_path: &str) -> Result<()>;

    /// Sanitize the category, allocate an id and append the document to its
    /// partition. Not idempotent: retrying stores a second copy.
    fn add_document(&self, doc: NewDocument) -> Result<StoredDocument>;

    /// Look up a document through the id -> category map. Expired drafts are
    /// evicted from the partition first.
    fn get_by_id(&self, id: DocId) -> Result<Option<StoredDocument>>;

    /// Remove the document, its saved original and its index entry. Returns
    /// `false` for unknown ids.
    fn delete(&self, id: DocId) -> Result<bool>;

    /// Read the requested partitions (evicting expired drafts), apply the
    /// filter and return documents most recent first.
    fn query(&self, filter: &QueryFilter) -> Result<Vec<StoredDocument>>;

    /// Categories that currently have a partition.
    fn categories(&self) -> Result<Vec<Category>>;

    fn update_status(&self, id: DocId, status: DocumentStatus) -> Result<Option<StoredDocument>>;

    /// Record the originality shown on the final report, rounded to two decimals.
    fn record_originality(&self, id: DocId, percent: f64) -> Result<bool>;

    fn document_count(&self) -> Result<usize> {
        Ok(self.query(&QueryFilter::default())?.len())
    }
}

impl<S: CorpusStore + ?Sized> CorpusStore for Arc<S> {
    fn save_original(&self, category: &Category, original_name: &str, bytes: &[u8]) -> Result<StoredFile> {
        (**self).save_original(category, original_name, bytes)
    }
    fn read_original(&self, relative_path: &str) -> Result<Vec<u8>> {
        (**self).read_original(relative_path)
    }
    fn remove_original(&self, relative_path: &str) -> Result<()> {
        (**self).remove_original(relative_path)
    }
    fn add_document(&self, doc: NewDocument) -> Result<StoredDocument> {
        (**self).add_document(doc)
    }
    fn get_by_id(&self, id: DocId) -> Result<Option<StoredDocument>> {
        (**self).get_by_id(id)
    }
    fn delete(&self, id: DocId) -> Result<bool> {
        (**self).delete(id)
    }
    fn query(&self, filter: &QueryFilter) -> Result<Vec<StoredDocument>> {
        (**self).query(filter)
    }
    fn categories(&self) -> Result<Vec<Category>> {
        (**self).categories()
    }
    fn update_status(&self, id: DocId, status: DocumentStatus) -> Result<Option<StoredDocument>> {
        (**self).update_status(id, status)
    }
    fn record_originality(&self, id: DocId, percent: f64) -> Result<bool> {
        (**self).record_originality(id, percent)
    }
}

fn materialize(doc: NewDocument, id: DocId, category: Category, now: OffsetDateTime) -> StoredDocument {
    StoredDocument {
        id,
        title: doc.title,
        author: doc.author,
        filename: doc.filename,
        file_path: doc.stored_file.map(|f| f.relative_path),
        word_count: word_count(&doc.content),
        content: doc.content,
        uploaded_at: now,
        category,
        status: doc.status,
        user_id: doc.user_id,
        institution: doc.institution,
        signature: doc.signature,
        shingle_count: doc.shingle_count,
        originality_percent: None,
    }
}

fn round_2dp(percent: f64) -> f64 {
    (percent * 100.0).round() / 100.0
}

/// Apply the filter and order most recent first (ties: higher id first).
fn finish_query(mut docs: Vec<StoredDocument>, filter: &QueryFilter) -> Vec<StoredDocument> {
    docs.retain(|d| filter.matches(d));
    docs.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at).then(b.id.cmp(&a.id)));
    docs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minhash::MinHashSignature;

    fn doc(user: Option<&str>, inst: Option<&str>, status: DocumentStatus) -> StoredDocument {
        StoredDocument {
            id: 1,
            title: "t".into(),
            author: None,
            filename: None,
            file_path: None,
            content: String::new(),
            word_count: 0,
            uploaded_at: OffsetDateTime::UNIX_EPOCH,
            category: Category::uncategorized(),
            status,
            user_id: user.map(str::to_owned),
            institution: inst.map(str::to_owned),
            signature: MinHashSignature::empty(1),
            shingle_count: 0,
            originality_percent: None,
        }
    }

    #[test]
    fn filter_by_institution_and_owner() {
        let d = doc(Some("ivan"), Some("BSUIR"), DocumentStatus::Final);
        assert!(QueryFilter::default().matches(&d));
        let by_inst = QueryFilter { institution: Some("BSUIR".into()), ..Default::default() };
        assert!(by_inst.matches(&d));
        let other_inst = QueryFilter { institution: Some("BSU".into()), ..Default::default() };
        assert!(!other_inst.matches(&d));
        let excluded = QueryFilter { exclude_user_id: Some("ivan".into()), ..Default::default() };
        assert!(!excluded.matches(&d));
        let owner = QueryFilter { owner_id: Some("ivan".into()), status: Some(DocumentStatus::Final), ..Default::default() };
        assert!(owner.matches(&d));
        let drafts = QueryFilter { status: Some(DocumentStatus::Draft), ..Default::default() };
        assert!(!drafts.matches(&d));
    }

    #[test]
    fn institution_filter_skips_documents_without_one() {
        let d = doc(None, None, DocumentStatus::Draft);
        let by_inst = QueryFilter { institution: Some("BSUIR".into()), ..Default::default() };
        assert!(!by_inst.matches(&d));
        let excluded = QueryFilter { exclude_user_id: Some("ivan".into()), ..Default::default() };
        assert!(excluded.matches(&d));
    }

    #[test]
    fn originality_rounds_to_two_decimals() {
        assert_eq!(round_2dp(87.456), 87.46);
        assert_eq!(round_2dp(100.0), 100.0);
    }
}

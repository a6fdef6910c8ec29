//! In-memory corpus store.
//!
//! Same semantics as [`FileStore`](super::FileStore), including lazy draft
//! eviction, without touching the filesystem. Originals are kept as byte
//! buffers keyed by a synthetic relative path.

use super::{finish_query, materialize, round_2dp, system_clock, Clock, CorpusStore, QueryFilter};
use crate::expiry::evict;
use crate::index::{Category, DocId, DocumentStatus, GlobalIndex, NewDocument, StoredDocument, StoredFile};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

#[derive(Default)]
struct Inner {
    index: GlobalIndex,
    partitions: BTreeMap<Category, Vec<StoredDocument>>,
    files: HashMap<String, Vec<u8>>,
    file_seq: u64,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    draft_ttl: Duration,
    clock: Clock,
}

impl MemoryStore {
    pub fn new(draft_ttl: Duration) -> Self {
        Self { inner: Mutex::new(Inner::default()), draft_ttl, clock: system_clock() }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Number of saved originals, for tests.
    pub fn file_count(&self) -> usize {
        self.inner.lock().files.len()
    }

    fn evict_partition(&self, inner: &mut Inner, category: &Category) {
        let Some(docs) = inner.partitions.get_mut(category) else {
            return;
        };
        let (kept, evicted) = evict(std::mem::take(docs), (self.clock)(), self.draft_ttl);
        *docs = kept;
        for doc in evicted {
            if let Some(path) = &doc.file_path {
                inner.files.remove(path);
            }
            inner.index.forget(doc.id);
        }
    }

    fn live_document<'a>(&self, inner: &'a mut Inner, id: DocId) -> Option<&'a mut StoredDocument> {
        let category = inner.index.category_of(id)?.clone();
        self.evict_partition(inner, &category);
        inner
            .partitions
            .get_mut(&category)?
            .iter_mut()
            .find(|d| d.id == id)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(crate::expiry::DEFAULT_DRAFT_TTL)
    }
}

impl CorpusStore for MemoryStore {
    fn save_original(&self, category: &Category, original_name: &str, bytes: &[u8]) -> Result<StoredFile> {
        let mut inner = self.inner.lock();
        inner.file_seq += 1;
        let filename = format!("{}_{}", inner.file_seq, original_name.replace(['/', '\\'], "_"));
        let relative_path = format!("{}/uploads/{}", category.as_str(), filename);
        inner.files.insert(relative_path.clone(), bytes.to_vec());
        Ok(StoredFile { filename, relative_path })
    }

    fn read_original(&self, relative_path: &str) -> Result<Vec<u8>> {
        self.inner
            .lock()
            .files
            .get(relative_path)
            .cloned()
            .ok_or_else(|| Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, relative_path.to_string())))
    }

    fn remove_original(&self, relative_path: &str) -> Result<()> {
        self.inner.lock().files.remove(relative_path);
        Ok(())
    }

    fn add_document(&self, doc: NewDocument) -> Result<StoredDocument> {
        let category = Category::sanitize(&doc.category);
        let mut inner = self.inner.lock();
        self.evict_partition(&mut inner, &category);
        let id = inner.index.allocate(&category);
        let stored = materialize(doc, id, category.clone(), (self.clock)());
        inner.partitions.entry(category).or_default().push(stored.clone());
        Ok(stored)
    }

    fn get_by_id(&self, id: DocId) -> Result<Option<StoredDocument>> {
        let mut inner = self.inner.lock();
        Ok(self.live_document(&mut inner, id).map(|d| d.clone()))
    }

    fn delete(&self, id: DocId) -> Result<bool> {
        let mut inner = self.inner.lock();
        let Some(category) = inner.index.category_of(id).cloned() else {
            return Ok(false);
        };
        self.evict_partition(&mut inner, &category);
        let removed = inner.partitions.get_mut(&category).and_then(|docs| {
            let pos = docs.iter().position(|d| d.id == id)?;
            Some(docs.remove(pos))
        });
        if let Some(path) = removed.as_ref().and_then(|d| d.file_path.as_ref()) {
            inner.files.remove(path);
        }
        inner.index.forget(id);
        Ok(removed.is_some())
    }

    fn query(&self, filter: &QueryFilter) -> Result<Vec<StoredDocument>> {
        let mut inner = self.inner.lock();
        let categories: Vec<Category> = match &filter.categories {
            Some(list) => list.clone(),
            None => inner.partitions.keys().cloned().collect(),
        };
        let mut all = Vec::new();
        for category in &categories {
            self.evict_partition(&mut inner, category);
            if let Some(docs) = inner.partitions.get(category) {
                all.extend(docs.iter().cloned());
            }
        }
        Ok(finish_query(all, filter))
    }

    fn categories(&self) -> Result<Vec<Category>> {
        Ok(self.inner.lock().partitions.keys().cloned().collect())
    }

    fn update_status(&self, id: DocId, status: DocumentStatus) -> Result<Option<StoredDocument>> {
        let mut inner = self.inner.lock();
        Ok(self.live_document(&mut inner, id).map(|doc| {
            doc.status = status;
            doc.clone()
        }))
    }

    fn record_originality(&self, id: DocId, percent: f64) -> Result<bool> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(Error::InputRejected(format!("originality {percent} outside 0..=100")));
        }
        let mut inner = self.inner.lock();
        Ok(self
            .live_document(&mut inner, id)
            .map(|doc| doc.originality_percent = Some(round_2dp(percent)))
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minhash::MinHashSignature;
    use std::sync::Arc;
    use time::macros::datetime;
    use time::OffsetDateTime;

    fn new_doc(category: &str, status: DocumentStatus) -> NewDocument {
        NewDocument {
            title: "Title".into(),
            author: None,
            filename: None,
            stored_file: None,
            content: "some words here".into(),
            category: category.into(),
            status,
            user_id: None,
            institution: None,
            signature: MinHashSignature::empty(8),
            shingle_count: 0,
        }
    }

    #[test]
    fn ids_are_global_across_categories() {
        let store = MemoryStore::default();
        let a = store.add_document(new_doc("lab", DocumentStatus::Final)).unwrap();
        let b = store.add_document(new_doc("diploma", DocumentStatus::Final)).unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(a.word_count, 3);
        assert_eq!(store.get_by_id(2).unwrap().unwrap().category.as_str(), "diploma");
    }

    #[test]
    fn drafts_expire_on_read() {
        let now = Arc::new(Mutex::new(datetime!(2025-05-01 08:00 UTC)));
        let clock_now = now.clone();
        let store = MemoryStore::default().with_clock(Arc::new(move || *clock_now.lock()));

        let file = store.save_original(&Category::sanitize("lab"), "a.pdf", b"pdf").unwrap();
        let mut draft = new_doc("lab", DocumentStatus::Draft);
        draft.stored_file = Some(file);
        let draft = store.add_document(draft).unwrap();
        let fin = store.add_document(new_doc("lab", DocumentStatus::Final)).unwrap();
        assert_eq!(store.file_count(), 1);

        *now.lock() = datetime!(2025-05-02 08:00 UTC);
        let ids: Vec<_> = store.query(&QueryFilter::default()).unwrap().iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![fin.id]);
        assert!(store.get_by_id(draft.id).unwrap().is_none());
        assert_eq!(store.file_count(), 0);
    }

    #[test]
    fn query_is_most_recent_first() {
        let now = Arc::new(Mutex::new(OffsetDateTime::UNIX_EPOCH));
        let clock_now = now.clone();
        let store = MemoryStore::default().with_clock(Arc::new(move || *clock_now.lock()));
        for (i, cat) in ["lab", "diploma", "lab"].iter().enumerate() {
            *now.lock() = OffsetDateTime::UNIX_EPOCH + time::Duration::hours(i as i64);
            store.add_document(new_doc(cat, DocumentStatus::Final)).unwrap();
        }
        let ids: Vec<_> = store.query(&QueryFilter::default()).unwrap().iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }
}

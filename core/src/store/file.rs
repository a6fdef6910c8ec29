use super::{finish_query, materialize, round_2dp, system_clock, Clock, CorpusStore, QueryFilter};
use crate::expiry::evict;
use crate::index::{Category, DocId, DocumentStatus, GlobalIndex, NewDocument, Partition, StoredDocument, StoredFile};
use crate::persist::{self, StorePaths};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Corpus store backed by a data directory.
///
/// Lock order is always index before partition. Operations that only need the
/// index briefly (lookups, eviction bookkeeping) release it before taking a
/// partition lock.
pub struct FileStore {
    paths: StorePaths,
    draft_ttl: Duration,
    clock: Clock,
    index_lock: Mutex<()>,
    partition_locks: Mutex<HashMap<Category, Arc<Mutex<()>>>>,
}

impl FileStore {
    pub fn open<P: AsRef<Path>>(root: P, draft_ttl: Duration) -> Result<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            paths: StorePaths::new(root),
            draft_ttl,
            clock: system_clock(),
            index_lock: Mutex::new(()),
            partition_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    fn partition_lock(&self, category: &Category) -> Arc<Mutex<()>> {
        self.partition_locks
            .lock()
            .entry(category.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Load a partition with expired drafts removed. Evictions are persisted
    /// and their originals deleted; the evicted ids are returned so the caller
    /// can drop them from the index. Caller must hold the partition lock.
    fn load_live(&self, category: &Category) -> Result<(Partition, Vec<DocId>)> {
        let partition = persist::load_partition(&self.paths, category);
        let (kept, evicted) = evict(partition.documents, (self.clock)(), self.draft_ttl);
        let partition = Partition { documents: kept };
        if evicted.is_empty() {
            return Ok((partition, Vec::new()));
        }
        persist::save_partition(&self.paths, category, &partition)?;
        for doc in &evicted {
            tracing::debug!(id = doc.id, category = %category, "evicting expired draft");
            self.remove_file_quietly(doc);
        }
        Ok((partition, evicted.iter().map(|d| d.id).collect()))
    }

    fn remove_file_quietly(&self, doc: &StoredDocument) {
        if let Some(rel) = &doc.file_path {
            if let Err(e) = persist::remove_original(&self.paths, rel) {
                tracing::warn!(id = doc.id, path = %rel, error = %e, "failed to remove stored original");
            }
        }
    }

    fn forget_ids(&self, ids: &[DocId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let _guard = self.index_lock.lock();
        let mut index = persist::load_index(&self.paths)?;
        for id in ids {
            index.forget(*id);
        }
        persist::save_index(&self.paths, &index)
    }

    fn lookup_category(&self, id: DocId) -> Result<Option<Category>> {
        let _guard = self.index_lock.lock();
        let index = persist::load_index(&self.paths)?;
        Ok(index.category_of(id).cloned())
    }

    /// Apply `f` to document `id` in place and persist its partition.
    fn modify<T>(&self, id: DocId, f: impl FnOnce(&mut StoredDocument) -> T) -> Result<Option<T>> {
        let Some(category) = self.lookup_category(id)? else {
            return Ok(None);
        };
        let lock = self.partition_lock(&category);
        let (result, evicted) = {
            let _guard = lock.lock();
            let (mut partition, evicted) = self.load_live(&category)?;
            let result = match partition.documents.iter_mut().find(|d| d.id == id) {
                Some(doc) => {
                    let out = f(doc);
                    persist::save_partition(&self.paths, &category, &partition)?;
                    Some(out)
                }
                None => None,
            };
            (result, evicted)
        };
        self.forget_ids(&evicted)?;
        Ok(result)
    }

    fn rollback_add(&self, category: &Category, id: DocId) {
        let lock = self.partition_lock(category);
        let _guard = lock.lock();
        let mut partition = persist::load_partition(&self.paths, category);
        partition.documents.retain(|d| d.id != id);
        if let Err(e) = persist::save_partition(&self.paths, category, &partition) {
            tracing::error!(id, category = %category, error = %e, "rollback of partially added document failed");
        }
    }
}

impl CorpusStore for FileStore {
    fn save_original(&self, category: &Category, original_name: &str, bytes: &[u8]) -> Result<StoredFile> {
        persist::save_original(&self.paths, category, original_name, bytes, (self.clock)())
    }

    fn read_original(&self, relative_path: &str) -> Result<Vec<u8>> {
        persist::read_original(&self.paths, relative_path)
    }

    fn remove_original(&self, relative_path: &str) -> Result<()> {
        persist::remove_original(&self.paths, relative_path)
    }

    fn add_document(&self, doc: NewDocument) -> Result<StoredDocument> {
        let category = Category::sanitize(&doc.category);
        let _index_guard = self.index_lock.lock();
        let mut index: GlobalIndex = persist::load_index(&self.paths)?;
        let id = index.allocate(&category);

        let stored = {
            let lock = self.partition_lock(&category);
            let _guard = lock.lock();
            let (mut partition, evicted) = self.load_live(&category)?;
            for old in evicted {
                index.forget(old);
            }
            let stored = materialize(doc, id, category.clone(), (self.clock)());
            partition.documents.push(stored.clone());
            persist::save_partition(&self.paths, &category, &partition)?;
            stored
        };

        if let Err(e) = persist::save_index(&self.paths, &index) {
            self.rollback_add(&category, id);
            return Err(e);
        }
        tracing::info!(id, category = %category, title = %stored.title, "document added");
        Ok(stored)
    }

    fn get_by_id(&self, id: DocId) -> Result<Option<StoredDocument>> {
        let Some(category) = self.lookup_category(id)? else {
            return Ok(None);
        };
        let lock = self.partition_lock(&category);
        let (found, evicted) = {
            let _guard = lock.lock();
            let (partition, evicted) = self.load_live(&category)?;
            (partition.documents.into_iter().find(|d| d.id == id), evicted)
        };
        self.forget_ids(&evicted)?;
        Ok(found)
    }

    fn delete(&self, id: DocId) -> Result<bool> {
        let _index_guard = self.index_lock.lock();
        let mut index = persist::load_index(&self.paths)?;
        let Some(category) = index.category_of(id).cloned() else {
            return Ok(false);
        };

        let removed = {
            let lock = self.partition_lock(&category);
            let _guard = lock.lock();
            let (mut partition, evicted) = self.load_live(&category)?;
            for old in evicted {
                index.forget(old);
            }
            match partition.documents.iter().position(|d| d.id == id) {
                Some(pos) => {
                    let doc = partition.documents.remove(pos);
                    persist::save_partition(&self.paths, &category, &partition)?;
                    Some(doc)
                }
                None => None,
            }
        };

        // Partition is written first; a failure past this point leaves a
        // stray file or a dangling index entry, neither of which is reachable.
        if let Some(doc) = &removed {
            self.remove_file_quietly(doc);
        }
        index.forget(id);
        persist::save_index(&self.paths, &index)?;
        if removed.is_some() {
            tracing::info!(id, category = %category, "document deleted");
        }
        Ok(removed.is_some())
    }

    fn query(&self, filter: &QueryFilter) -> Result<Vec<StoredDocument>> {
        let categories = match &filter.categories {
            Some(list) => list.clone(),
            None => persist::list_categories(&self.paths)?,
        };
        let mut all = Vec::new();
        let mut evicted_ids = Vec::new();
        for category in categories {
            // Filters name arbitrary labels; only existing partitions get a lock.
            if !self.paths.partition(&category).is_file() {
                continue;
            }
            let lock = self.partition_lock(&category);
            let _guard = lock.lock();
            let (partition, evicted) = self.load_live(&category)?;
            all.extend(partition.documents);
            evicted_ids.extend(evicted);
        }
        self.forget_ids(&evicted_ids)?;
        Ok(finish_query(all, filter))
    }

    fn categories(&self) -> Result<Vec<Category>> {
        persist::list_categories(&self.paths)
    }

    fn update_status(&self, id: DocId, status: DocumentStatus) -> Result<Option<StoredDocument>> {
        self.modify(id, |doc| {
            doc.status = status;
            doc.clone()
        })
    }

    fn record_originality(&self, id: DocId, percent: f64) -> Result<bool> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(Error::InputRejected(format!("originality {percent} outside 0..=100")));
        }
        Ok(self
            .modify(id, |doc| doc.originality_percent = Some(round_2dp(percent)))?
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::minhash::MinHashSignature;
    use tempfile::tempdir;

    fn final_doc(category: &str) -> NewDocument {
        NewDocument {
            title: "Report".into(),
            author: None,
            filename: None,
            stored_file: None,
            content: "body".into(),
            category: category.into(),
            status: DocumentStatus::Final,
            user_id: None,
            institution: None,
            signature: MinHashSignature::from_values(vec![7, 8]),
            shingle_count: 1,
        }
    }

    #[test]
    fn querying_unknown_categories_takes_no_locks() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path(), Duration::from_secs(60)).unwrap();
        store.add_document(final_doc("lab")).unwrap();
        let before = store.partition_locks.lock().len();

        let labels: Vec<Category> = (0..50).map(|i| Category::sanitize(&format!("missing{i}"))).collect();
        assert!(store.query(&QueryFilter::categories(labels)).unwrap().is_empty());
        assert_eq!(store.partition_locks.lock().len(), before);

        let found = store.query(&QueryFilter::categories(vec![Category::sanitize("lab")])).unwrap();
        assert_eq!(found.len(), 1);
    }
}

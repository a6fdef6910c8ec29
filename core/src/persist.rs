//! On-disk layout of the corpus.
//!
//! ```text
//! {root}/_index.json                          GlobalIndex (JSON)
//! {root}/{category}/documents.bin             Partition (bincode)
//! {root}/{category}/uploads/{millis}_{name}   saved originals
//! ```
//!
//! Readers never fail on malformed data: a corrupt partition reads as empty
//! and a corrupt index is rebuilt from the partitions.

use crate::index::{Category, DocId, GlobalIndex, Partition, StoredFile};
use crate::{Error, Result};
use std::fs::{self, create_dir_all, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Component, Path, PathBuf};
use time::OffsetDateTime;

const INDEX_FILE: &str = "_index.json";
const PARTITION_FILE: &str = "documents.bin";
const UPLOADS_DIR: &str = "uploads";

pub struct StorePaths {
    pub root: PathBuf,
}

impl StorePaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn index(&self) -> PathBuf { self.root.join(INDEX_FILE) }
    pub fn category_dir(&self, category: &Category) -> PathBuf { self.root.join(category.as_str()) }
    pub fn partition(&self, category: &Category) -> PathBuf { self.category_dir(category).join(PARTITION_FILE) }
    pub fn uploads_dir(&self, category: &Category) -> PathBuf { self.category_dir(category).join(UPLOADS_DIR) }

    /// Resolve a stored relative path, refusing anything that escapes the root.
    pub fn resolve(&self, relative: &str) -> Option<PathBuf> {
        let rel = Path::new(relative);
        let safe = rel.components().all(|c| matches!(c, Component::Normal(_)));
        if relative.is_empty() || !safe {
            return None;
        }
        Some(self.root.join(rel))
    }
}

/// Write `bytes` to a sibling temp file and rename it over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent() {
        create_dir_all(dir)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match File::open(path) {
        Ok(mut f) => {
            let mut buf = Vec::new();
            f.read_to_end(&mut buf)?;
            Ok(Some(buf))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn save_partition(paths: &StorePaths, category: &Category, partition: &Partition) -> Result<()> {
    let bytes = bincode::serialize(partition)?;
    write_atomic(&paths.partition(category), &bytes)
}

/// Load a partition; a missing file is an empty partition and so is one that
/// fails to decode.
pub fn load_partition(paths: &StorePaths, category: &Category) -> Partition {
    let path = paths.partition(category);
    let bytes = match read_optional(&path) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return Partition::default(),
        Err(e) => {
            tracing::warn!(category = %category, error = %e, "unreadable partition; treating as empty");
            return Partition::default();
        }
    };
    match bincode::deserialize::<Partition>(&bytes) {
        Ok(partition) => partition,
        Err(e) => {
            tracing::warn!(category = %category, error = %e, "corrupt partition; treating as empty");
            Partition::default()
        }
    }
}

pub fn save_index(paths: &StorePaths, index: &GlobalIndex) -> Result<()> {
    let json = serde_json::to_string_pretty(index)?;
    write_atomic(&paths.index(), json.as_bytes())
}

/// Load the global index. A corrupt index is rebuilt from the partitions so
/// that the id allocator never moves backwards.
pub fn load_index(paths: &StorePaths) -> Result<GlobalIndex> {
    let bytes = match read_optional(&paths.index())? {
        Some(bytes) => bytes,
        None => return rebuild_index(paths),
    };
    match serde_json::from_slice::<GlobalIndex>(&bytes) {
        Ok(index) => Ok(index),
        Err(e) => {
            tracing::warn!(error = %e, "corrupt global index; rebuilding from partitions");
            let index = rebuild_index(paths)?;
            save_index(paths, &index)?;
            Ok(index)
        }
    }
}

/// Reconstruct the index by scanning every partition on disk.
pub fn rebuild_index(paths: &StorePaths) -> Result<GlobalIndex> {
    let mut index = GlobalIndex::default();
    let mut max_id: DocId = 0;
    for category in list_categories(paths)? {
        for doc in load_partition(paths, &category).documents {
            max_id = max_id.max(doc.id);
            index.id_to_category.insert(doc.id, category.clone());
        }
    }
    index.next_id = max_id + 1;
    Ok(index)
}

/// Categories that have a partition file on disk, sorted by name.
pub fn list_categories(paths: &StorePaths) -> Result<Vec<Category>> {
    let entries = match fs::read_dir(&paths.root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut categories = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        let category = Category::sanitize(&name);
        if category.as_str() != name {
            continue;
        }
        if entry.path().join(PARTITION_FILE).is_file() {
            categories.push(category);
        }
    }
    categories.sort();
    Ok(categories)
}

/// Save an uploaded original as `{millis}_{stem}{ext}` in the category's
/// uploads directory.
pub fn save_original(
    paths: &StorePaths,
    category: &Category,
    original_name: &str,
    bytes: &[u8],
    now: OffsetDateTime,
) -> Result<StoredFile> {
    let dir = paths.uploads_dir(category);
    create_dir_all(&dir)?;

    let (stem, ext) = split_name(original_name);
    let millis = now.unix_timestamp_nanos() / 1_000_000;
    let mut filename = format!("{millis}_{stem}{ext}");
    let mut n = 1;
    while dir.join(&filename).exists() {
        filename = format!("{millis}_{stem}-{n}{ext}");
        n += 1;
    }
    write_atomic(&dir.join(&filename), bytes)?;

    let relative_path = format!("{}/{}/{}", category.as_str(), UPLOADS_DIR, filename);
    Ok(StoredFile { filename, relative_path })
}

/// Remove a saved original. A file that is already gone is not an error.
pub fn remove_original(paths: &StorePaths, relative: &str) -> Result<()> {
    let Some(path) = paths.resolve(relative) else {
        return Err(Error::InputRejected(format!("invalid file path '{relative}'")));
    };
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub fn read_original(paths: &StorePaths, relative: &str) -> Result<Vec<u8>> {
    let Some(path) = paths.resolve(relative) else {
        return Err(Error::InputRejected(format!("invalid file path '{relative}'")));
    };
    Ok(fs::read(path)?)
}

/// Split a file name into a sanitized stem and a sanitized extension (with its dot).
fn split_name(original: &str) -> (String, String) {
    let base = Path::new(original)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    let (stem, ext) = match base.rfind('.') {
        Some(i) if i > 0 => (&base[..i], &base[i + 1..]),
        _ => (base, ""),
    };
    let clean = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, 'а'..='я' | 'А'..='Я' | 'ё' | 'Ё' | '_' | '-') { c } else { '_' })
            .collect()
    };
    let stem = match clean(stem) {
        s if s.is_empty() => "file".to_string(),
        s => s,
    };
    let ext: String = ext.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    let ext = if ext.is_empty() { String::new() } else { format!(".{}", ext.to_ascii_lowercase()) };
    (stem, ext)
}

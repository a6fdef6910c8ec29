//! Draft time-to-live policy.
//!
//! Eviction is lazy: stores call [`evict`] whenever a partition is read and
//! persist the kept half. Final documents never expire.

use crate::index::{DocumentStatus, StoredDocument};
use std::time::Duration;
use time::OffsetDateTime;

pub const DEFAULT_DRAFT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub fn is_expired(doc: &StoredDocument, now: OffsetDateTime, ttl: Duration) -> bool {
    doc.status == DocumentStatus::Draft && now - doc.uploaded_at >= ttl
}

/// Split `documents` into `(kept, evicted)`, preserving order in both.
pub fn evict(
    documents: Vec<StoredDocument>,
    now: OffsetDateTime,
    ttl: Duration,
) -> (Vec<StoredDocument>, Vec<StoredDocument>) {
    documents.into_iter().partition(|doc| !is_expired(doc, now, ttl))
}

//! Document store contract: keyed documents grouped into collections, each
//! carrying a store-assigned creation timestamp.
//!
//! Reads use keyset pagination over `(created_at, id)`. Every page of a
//! [`DocumentStore::query_created_before`] scan uses the same upper bound, so
//! documents written while a scan is in flight never enter it.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut after = None;
//! loop {
//!     let page = store
//!         .query_created_before("messages", cutoff, 1000, after.as_ref())
//!         .await?;
//!     process(&page.documents);
//!     match page.next {
//!         Some(cursor) => after = Some(cursor),
//!         None => break,
//!     }
//! }
//! ```

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use super::{
    MAX_BATCH_SIZE,
    error::{DbError, DbResult},
};

/// Address of a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DocumentRef {
    pub collection: String,
    pub id: String,
}

impl DocumentRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A document as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub reference: DocumentRef,
    /// Server-assigned creation time, millisecond precision.
    pub created_at: DateTime<Utc>,
    pub fields: Map<String, Value>,
}

impl StoredDocument {
    pub fn cursor(&self) -> PageCursor {
        PageCursor::new(self.created_at, self.reference.id.clone())
    }
}

/// Position in a `(created_at, id)` ordered scan.
///
/// Field order matters: the derived `Ord` compares `created_at` first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageCursor {
    pub created_at: DateTime<Utc>,
    pub id: String,
}

impl PageCursor {
    pub fn new(created_at: DateTime<Utc>, id: impl Into<String>) -> Self {
        Self {
            created_at,
            id: id.into(),
        }
    }
}

/// One page of a scan.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub documents: Vec<StoredDocument>,
    /// Cursor to resume from. `None` once the scan is exhausted.
    pub next: Option<PageCursor>,
}

impl Page {
    /// Build a page from documents fetched with `limit`; a short page ends the scan.
    pub fn from_documents(documents: Vec<StoredDocument>, limit: usize) -> Self {
        let next = if documents.len() >= limit {
            documents.last().map(StoredDocument::cursor)
        } else {
            None
        };
        Self { documents, next }
    }
}

/// A set of deletes committed atomically.
///
/// A batch never holds more than its limit, which itself never exceeds
/// [`MAX_BATCH_SIZE`].
#[derive(Debug, Clone)]
pub struct DeleteBatch {
    limit: usize,
    refs: Vec<DocumentRef>,
}

impl Default for DeleteBatch {
    fn default() -> Self {
        Self::with_limit(MAX_BATCH_SIZE)
    }
}

impl DeleteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a batch holding at most `limit` deletes (clamped to `1..=MAX_BATCH_SIZE`).
    pub fn with_limit(limit: usize) -> Self {
        let limit = limit.clamp(1, MAX_BATCH_SIZE);
        Self {
            limit,
            refs: Vec::with_capacity(limit),
        }
    }

    /// Queue a delete. Fails without modifying the batch when it is full.
    pub fn delete(&mut self, reference: DocumentRef) -> DbResult<()> {
        if self.is_full() {
            return Err(DbError::BatchFull {
                size: self.refs.len(),
                max: self.limit,
            });
        }
        self.refs.push(reference);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.refs.len() >= self.limit
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn refs(&self) -> &[DocumentRef] {
        &self.refs
    }

    pub fn into_refs(self) -> Vec<DocumentRef> {
        self.refs
    }
}

/// Storage for chat documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Scan `collection` for documents created strictly before `before`,
    /// ordered by `(created_at, id)` ascending, resuming after `start_after`.
    async fn query_created_before(
        &self,
        collection: &str,
        before: DateTime<Utc>,
        limit: usize,
        start_after: Option<&PageCursor>,
    ) -> DbResult<Page>;

    /// Apply every delete in the batch, or none of them.
    ///
    /// Deleting a document that no longer exists is not an error. Returns the
    /// number of documents actually removed.
    async fn commit(&self, batch: DeleteBatch) -> DbResult<u64>;

    /// Create a document with a fresh id and a server-assigned timestamp.
    ///
    /// Timestamps within a collection are strictly increasing.
    async fn create(&self, collection: &str, fields: Map<String, Value>)
    -> DbResult<StoredDocument>;

    /// Import a document that already carries its timestamp (backfills, fixtures).
    async fn insert(&self, document: StoredDocument) -> DbResult<()>;

    async fn get(&self, reference: &DocumentRef) -> DbResult<Option<StoredDocument>>;

    async fn count(&self, collection: &str) -> DbResult<u64>;

    /// Short backend label for logs.
    fn backend_name(&self) -> &'static str;
}

/// Validate scan arguments shared by every backend.
pub(crate) fn check_limit(limit: usize) -> DbResult<()> {
    if limit == 0 {
        return Err(DbError::Validation("page size must be at least 1".into()));
    }
    Ok(())
}

/// Truncate to millisecond precision, the resolution every backend stores.
pub(crate) fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

/// Exclusive millisecond bound equivalent to `created_at < before`.
///
/// Stored timestamps have millisecond resolution, so a bound with a
/// sub-millisecond remainder rounds up.
pub(crate) fn exclusive_millis_bound(before: DateTime<Utc>) -> i64 {
    let ms = before.timestamp_millis();
    if before.timestamp_subsec_nanos() % 1_000_000 == 0 {
        ms
    } else {
        ms.saturating_add(1)
    }
}

/// Next timestamp for a collection whose newest document was created at `last`.
pub(crate) fn next_timestamp(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    let now = truncate_to_millis(now);
    match last {
        Some(last) if last >= now => last + chrono::Duration::milliseconds(1),
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_batch_rejects_overflow() {
        let mut batch = DeleteBatch::with_limit(2);
        batch.delete(DocumentRef::new("messages", "a")).unwrap();
        batch.delete(DocumentRef::new("messages", "b")).unwrap();
        assert!(batch.is_full());

        let err = batch.delete(DocumentRef::new("messages", "c")).unwrap_err();
        assert!(matches!(err, DbError::BatchFull { size: 2, max: 2 }));
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_batch_limit_clamped() {
        assert_eq!(DeleteBatch::with_limit(10_000).limit(), MAX_BATCH_SIZE);
        assert_eq!(DeleteBatch::with_limit(0).limit(), 1);
        assert_eq!(DeleteBatch::new().limit(), MAX_BATCH_SIZE);
    }

    #[test]
    fn test_cursor_orders_by_time_then_id() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::milliseconds(1);
        assert!(PageCursor::new(t0, "z") < PageCursor::new(t1, "a"));
        assert!(PageCursor::new(t0, "a") < PageCursor::new(t0, "b"));
    }

    #[test]
    fn test_next_timestamp_is_monotonic() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(next_timestamp(None, now), now);
        assert_eq!(
            next_timestamp(Some(now), now),
            now + chrono::Duration::milliseconds(1)
        );
        let future = now + chrono::Duration::seconds(5);
        assert_eq!(
            next_timestamp(Some(future), now),
            future + chrono::Duration::milliseconds(1)
        );
        assert_eq!(next_timestamp(Some(now - chrono::Duration::seconds(1)), now), now);
    }

    #[test]
    fn test_exclusive_millis_bound_rounds_up() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let ms = t.timestamp_millis();
        assert_eq!(exclusive_millis_bound(t), ms);
        assert_eq!(
            exclusive_millis_bound(t + chrono::Duration::microseconds(500)),
            ms + 1
        );
        assert_eq!(
            exclusive_millis_bound(t + chrono::Duration::milliseconds(1)),
            ms + 1
        );
    }

    #[test]
    fn test_short_page_ends_scan() {
        let doc = StoredDocument {
            reference: DocumentRef::new("messages", "a"),
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            fields: Map::new(),
        };
        assert!(Page::from_documents(vec![doc.clone()], 2).next.is_none());
        assert_eq!(
            Page::from_documents(vec![doc.clone()], 1).next,
            Some(doc.cursor())
        );
    }
}

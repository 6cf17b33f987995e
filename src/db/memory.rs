use std::{
    collections::{BTreeMap, HashMap},
    ops::Bound,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{
    documents::{
        DeleteBatch, DocumentRef, DocumentStore, Page, PageCursor, StoredDocument, check_limit,
        next_timestamp, truncate_to_millis,
    },
    error::{DbError, DbResult},
};

#[derive(Default)]
struct Collection {
    /// Documents ordered the way scans read them.
    by_cursor: BTreeMap<PageCursor, Map<String, Value>>,
    /// id -> creation time, to locate a document in `by_cursor`.
    index: HashMap<String, DateTime<Utc>>,
    last_created: Option<DateTime<Utc>>,
}

impl Collection {
    fn insert(&mut self, id: String, created_at: DateTime<Utc>, fields: Map<String, Value>) {
        self.index.insert(id.clone(), created_at);
        self.by_cursor
            .insert(PageCursor::new(created_at, id), fields);
        if self.last_created.is_none_or(|last| created_at > last) {
            self.last_created = Some(created_at);
        }
    }

    fn remove(&mut self, id: &str) -> bool {
        match self.index.remove(id) {
            Some(created_at) => self
                .by_cursor
                .remove(&PageCursor::new(created_at, id))
                .is_some(),
            None => false,
        }
    }
}

/// In-process document store.
///
/// Every commit runs under one write lock, so a batch is applied atomically
/// with respect to concurrent readers.
#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn query_created_before(
        &self,
        collection: &str,
        before: DateTime<Utc>,
        limit: usize,
        start_after: Option<&PageCursor>,
    ) -> DbResult<Page> {
        check_limit(limit)?;

        let collections = self.collections.read();
        let Some(coll) = collections.get(collection) else {
            return Ok(Page::default());
        };

        // (before, "") sorts ahead of every real document created at `before`
        let upper = PageCursor::new(before, "");
        let lower = match start_after {
            Some(after) if *after >= upper => return Ok(Page::default()),
            Some(after) => Bound::Excluded(after.clone()),
            None => Bound::Unbounded,
        };

        let documents: Vec<StoredDocument> = coll
            .by_cursor
            .range((lower, Bound::Excluded(upper)))
            .take(limit)
            .map(|(cursor, fields)| StoredDocument {
                reference: DocumentRef::new(collection, cursor.id.clone()),
                created_at: cursor.created_at,
                fields: fields.clone(),
            })
            .collect();

        Ok(Page::from_documents(documents, limit))
    }

    async fn commit(&self, batch: DeleteBatch) -> DbResult<u64> {
        let mut collections = self.collections.write();
        let mut removed = 0;
        for reference in batch.refs() {
            if let Some(coll) = collections.get_mut(&reference.collection)
                && coll.remove(&reference.id)
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn create(
        &self,
        collection: &str,
        fields: Map<String, Value>,
    ) -> DbResult<StoredDocument> {
        let mut collections = self.collections.write();
        let coll = collections.entry(collection.to_string()).or_default();

        let id = Uuid::new_v4().to_string();
        let created_at = next_timestamp(coll.last_created, Utc::now());
        coll.insert(id.clone(), created_at, fields.clone());

        Ok(StoredDocument {
            reference: DocumentRef::new(collection, id),
            created_at,
            fields,
        })
    }

    async fn insert(&self, document: StoredDocument) -> DbResult<()> {
        let mut collections = self.collections.write();
        let coll = collections
            .entry(document.reference.collection.clone())
            .or_default();

        if coll.index.contains_key(&document.reference.id) {
            return Err(DbError::Conflict(format!(
                "document '{}' already exists",
                document.reference
            )));
        }

        coll.insert(
            document.reference.id,
            truncate_to_millis(document.created_at),
            document.fields,
        );
        Ok(())
    }

    async fn get(&self, reference: &DocumentRef) -> DbResult<Option<StoredDocument>> {
        let collections = self.collections.read();
        let Some(coll) = collections.get(&reference.collection) else {
            return Ok(None);
        };
        let Some(created_at) = coll.index.get(&reference.id).copied() else {
            return Ok(None);
        };

        Ok(coll
            .by_cursor
            .get(&PageCursor::new(created_at, reference.id.clone()))
            .map(|fields| StoredDocument {
                reference: reference.clone(),
                created_at,
                fields: fields.clone(),
            }))
    }

    async fn count(&self, collection: &str) -> DbResult<u64> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map_or(0, |coll| coll.index.len() as u64))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

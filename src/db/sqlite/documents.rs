use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::instrument;
use uuid::Uuid;

use super::common::{from_millis, parse_fields};
use crate::db::{
    documents::{
        DeleteBatch, DocumentRef, DocumentStore, Page, PageCursor, StoredDocument, check_limit,
        exclusive_millis_bound, next_timestamp,
    },
    error::{DbError, DbResult},
};

pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

impl SqliteDocumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn document_from_row(collection: &str, row: &SqliteRow) -> DbResult<StoredDocument> {
        let id: String = row.get("id");
        let created_at: i64 = row.get("created_at");
        let fields: String = row.get("fields");

        Ok(StoredDocument {
            reference: DocumentRef::new(collection, id),
            created_at: from_millis(created_at)?,
            fields: parse_fields(&fields)?,
        })
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    #[instrument(skip(self, start_after))]
    async fn query_created_before(
        &self,
        collection: &str,
        before: DateTime<Utc>,
        limit: usize,
        start_after: Option<&PageCursor>,
    ) -> DbResult<Page> {
        check_limit(limit)?;
        let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
        let before_ms = exclusive_millis_bound(before);

        let rows = match start_after {
            Some(after) => {
                let after_ms = after.created_at.timestamp_millis();
                sqlx::query(
                    r#"
                    SELECT id, created_at, fields
                    FROM documents
                    WHERE collection = ?
                      AND created_at < ?
                      AND (created_at > ? OR (created_at = ? AND id > ?))
                    ORDER BY created_at ASC, id ASC
                    LIMIT ?
                    "#,
                )
                .bind(collection)
                .bind(before_ms)
                .bind(after_ms)
                .bind(after_ms)
                .bind(&after.id)
                .bind(limit_i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, created_at, fields
                    FROM documents
                    WHERE collection = ? AND created_at < ?
                    ORDER BY created_at ASC, id ASC
                    LIMIT ?
                    "#,
                )
                .bind(collection)
                .bind(before_ms)
                .bind(limit_i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let documents = rows
            .iter()
            .map(|row| Self::document_from_row(collection, row))
            .collect::<DbResult<Vec<_>>>()?;

        Ok(Page::from_documents(documents, limit))
    }

    #[instrument(skip(self, batch), fields(size = batch.len()))]
    async fn commit(&self, batch: DeleteBatch) -> DbResult<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for reference in batch.refs() {
            let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
                .bind(&reference.collection)
                .bind(&reference.id)
                .execute(&mut *tx)
                .await?;
            removed += result.rows_affected();
        }
        tx.commit().await?;

        Ok(removed)
    }

    async fn create(
        &self,
        collection: &str,
        fields: Map<String, Value>,
    ) -> DbResult<StoredDocument> {
        let id = Uuid::new_v4().to_string();
        let encoded = serde_json::to_string(&fields)?;

        let mut tx = self.pool.begin().await?;
        let last: Option<i64> =
            sqlx::query_scalar("SELECT MAX(created_at) FROM documents WHERE collection = ?")
                .bind(collection)
                .fetch_one(&mut *tx)
                .await?;
        let last = last.map(from_millis).transpose()?;
        let created_at = next_timestamp(last, Utc::now());

        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, created_at, fields)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(collection)
        .bind(&id)
        .bind(created_at.timestamp_millis())
        .bind(&encoded)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(StoredDocument {
            reference: DocumentRef::new(collection, id),
            created_at,
            fields,
        })
    }

    async fn insert(&self, document: StoredDocument) -> DbResult<()> {
        let encoded = serde_json::to_string(&document.fields)?;

        let result = sqlx::query(
            r#"
            INSERT INTO documents (collection, id, created_at, fields)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&document.reference.collection)
        .bind(&document.reference.id)
        .bind(document.created_at.timestamp_millis())
        .bind(&encoded)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                DbError::Conflict(format!("document '{}' already exists", document.reference)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, reference: &DocumentRef) -> DbResult<Option<StoredDocument>> {
        let row = sqlx::query(
            "SELECT id, created_at, fields FROM documents WHERE collection = ? AND id = ?",
        )
        .bind(&reference.collection)
        .bind(&reference.id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| Self::document_from_row(&reference.collection, &row))
            .transpose()
    }

    async fn count(&self, collection: &str) -> DbResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

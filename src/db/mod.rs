//! Document store backends for chat messages.

mod documents;
mod error;
mod memory;
#[cfg(feature = "database-sqlite")]
pub mod sqlite;

#[cfg(test)]
pub mod tests;

use std::sync::Arc;

pub use documents::*;
pub use error::{DbError, DbResult};
pub use memory::MemoryDocumentStore;

use crate::config::DatabaseConfig;

/// Most deletes a single atomic batch may carry.
pub const MAX_BATCH_SIZE: usize = 500;

/// Build the document store described by `config`.
///
/// For SQLite this opens the pool and, unless disabled, runs migrations.
pub async fn create_document_store(config: &DatabaseConfig) -> DbResult<Arc<dyn DocumentStore>> {
    match config {
        DatabaseConfig::Memory => {
            tracing::info!("Using in-memory document store");
            Ok(Arc::new(MemoryDocumentStore::new()))
        }
        #[cfg(feature = "database-sqlite")]
        DatabaseConfig::Sqlite(cfg) => {
            use std::str::FromStr;

            use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

            let in_memory = cfg.path == ":memory:";
            let options = if in_memory {
                SqliteConnectOptions::from_str("sqlite::memory:")?
            } else {
                SqliteConnectOptions::new()
                    .filename(&cfg.path)
                    .create_if_missing(cfg.create_if_missing)
                    .journal_mode(if cfg.wal_mode {
                        SqliteJournalMode::Wal
                    } else {
                        SqliteJournalMode::Delete
                    })
            }
            .busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms));

            // Each connection to `:memory:` is its own database
            let max_connections = if in_memory { 1 } else { cfg.max_connections };

            let pool = SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect_with(options)
                .await?;

            if cfg.run_migrations {
                tracing::info!("Running SQLite migrations");
                sqlx::migrate!("./migrations_sqlx/sqlite").run(&pool).await?;
                tracing::info!("SQLite migrations completed successfully");
            }

            tracing::info!(path = %cfg.path, "Using SQLite document store");
            Ok(Arc::new(sqlite::SqliteDocumentStore::new(pool)))
        }
    }
}

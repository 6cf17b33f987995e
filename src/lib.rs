//! Retention sweeper for a photo-sharing group chat.
//!
//! Messages live in a document store; photo attachments live in a blob store.
//! The sweeper runs on a daily schedule and purges every message older than
//! the retention window together with its attachment:
//!
//! 1. Query all messages created before the cutoff (keyset-paginated read)
//! 2. Delete the matched documents in atomic batches
//! 3. Delete the attachment blobs of committed documents, best-effort
//!
//! See [`retention::RetentionSweeper`] for the core workflow and
//! [`retention::start_retention_worker`] for the scheduling host.

pub mod config;
pub mod db;
pub mod models;
pub mod observability;
pub mod retention;
pub mod services;

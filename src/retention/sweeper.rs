//! One retention pass over the message collection.
//!
//! A pass runs in three phases:
//!
//! 1. **Collect**: page through every message created before the cutoff. The
//!    cutoff is fixed for the whole pass and the scan finishes before anything
//!    is deleted, so deletes never disturb pagination.
//! 2. **Commit**: delete the collected documents in atomic batches of at most
//!    [`MAX_BATCH_SIZE`], one batch at a time. A
//!    failed batch leaves its documents in place and the next batch proceeds.
//! 3. **Blobs**: delete the photo of every message whose batch committed.
//!    Deletes run concurrently and each result is captured on its own; a
//!    failure is logged and reported but never stops the others.
//!
//! A photo whose delete fails after its document is gone is orphaned: the
//! next pass cannot find it again. Orphans are listed in [`SweepOutcome`].

use std::{sync::Arc, time::Instant};

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use serde::Serialize;
use thiserror::Error;

use crate::{
    config::RetentionConfig,
    db::{DbError, DeleteBatch, DocumentRef, DocumentStore, MAX_BATCH_SIZE, PageCursor},
    models::{MessageRecord, stored_attachment_is_inconsistent, stored_blob_path},
    observability::metrics,
    services::BlobStorage,
};

/// Summary of a single pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepOutcome {
    /// Messages created strictly before this instant were eligible.
    pub cutoff: DateTime<Utc>,
    /// Documents collected for deletion.
    pub matched: u64,
    /// Documents actually removed by committed batches.
    pub documents_deleted: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
    /// Collected documents that carry a photo.
    pub blobs_matched: u64,
    pub blob_deletes_attempted: u64,
    pub blob_deletes_failed: u64,
    /// Documents that could not be decoded as messages. Still deleted, and
    /// their photo too when `imageUrl` and `storagePath` are both set.
    pub malformed: u64,
    /// Photos whose documents are gone but whose delete failed.
    pub orphaned_blobs: Vec<BlobDeleteFailure>,
    /// The per-run delete cap stopped collection early.
    pub truncated: bool,
    pub dry_run: bool,
    /// Retention is disabled; nothing was queried.
    pub skipped: bool,
    pub duration_ms: u64,
}

impl SweepOutcome {
    fn new(cutoff: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            cutoff,
            matched: 0,
            documents_deleted: 0,
            batches_committed: 0,
            batches_failed: 0,
            blobs_matched: 0,
            blob_deletes_attempted: 0,
            blob_deletes_failed: 0,
            malformed: 0,
            orphaned_blobs: Vec::new(),
            truncated: false,
            dry_run,
            skipped: false,
            duration_ms: 0,
        }
    }

    /// Successful blob deletes.
    pub fn blob_deletes_succeeded(&self) -> u64 {
        self.blob_deletes_attempted - self.blob_deletes_failed
    }

    /// Metric/log label for a pass that reached the end.
    fn status(&self) -> &'static str {
        if self.skipped {
            "skipped"
        } else if self.dry_run {
            "dry_run"
        } else if self.batches_failed > 0 {
            "failed"
        } else {
            "success"
        }
    }
}

/// A batch whose commit failed. Its documents were left in place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    /// Zero-based position of the batch within the pass.
    pub index: usize,
    pub size: usize,
    pub error: String,
}

/// A photo delete that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobDeleteFailure {
    pub path: String,
    pub error: String,
}

/// A pass that failed.
#[derive(Debug, Error)]
pub enum SweepError {
    /// The scan failed. Nothing was deleted.
    #[error("Failed to query expired messages: {0}")]
    Query(#[source] DbError),

    /// At least one batch failed to commit. Other batches and their photos
    /// were still processed; `outcome` describes everything that happened.
    #[error(
        "{} delete batch(es) failed ({} documents deleted)",
        .failures.len(),
        .outcome.documents_deleted
    )]
    BatchCommit {
        failures: Vec<BatchFailure>,
        outcome: Box<SweepOutcome>,
    },
}

impl SweepError {
    /// The partial outcome, when the pass got far enough to have one.
    pub fn outcome(&self) -> Option<&SweepOutcome> {
        match self {
            SweepError::Query(_) => None,
            SweepError::BatchCommit { outcome, .. } => Some(outcome),
        }
    }
}

/// A document selected for deletion.
struct Target {
    reference: DocumentRef,
    blob_path: Option<String>,
}

/// Deletes expired messages and their photos.
///
/// Store handles are injected; the sweeper holds no other state between
/// passes and takes no locks.
pub struct RetentionSweeper {
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStorage>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStorage>,
        config: RetentionConfig,
    ) -> Self {
        Self {
            documents,
            blobs,
            config,
        }
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// Run a pass with the cutoff measured from the current time.
    pub async fn run(&self) -> Result<SweepOutcome, SweepError> {
        self.run_at(Utc::now()).await
    }

    /// Run a pass with the cutoff measured from `now`.
    #[tracing::instrument(
        skip(self),
        fields(collection = %self.config.collection, dry_run = self.config.safety.dry_run)
    )]
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<SweepOutcome, SweepError> {
        let started = Instant::now();
        let cutoff = now - self.config.window();
        let mut outcome = SweepOutcome::new(cutoff, self.config.safety.dry_run);

        if !self.config.enabled || !self.config.has_retention() {
            tracing::info!("Message retention disabled, skipping sweep");
            outcome.skipped = true;
            return Ok(self.finish(outcome, started));
        }

        tracing::info!(
            cutoff = %cutoff,
            retention_days = self.config.periods.messages_days,
            "Starting retention sweep"
        );

        let targets = match self.collect(cutoff, &mut outcome).await {
            Ok(targets) => targets,
            Err(e) => {
                tracing::error!(error = %e, cutoff = %cutoff, "Retention query failed, nothing deleted");
                metrics::record_sweep("failed", started.elapsed().as_secs_f64());
                return Err(SweepError::Query(e));
            }
        };

        if outcome.dry_run {
            for target in &targets {
                tracing::debug!(
                    document = %target.reference,
                    blob_path = target.blob_path.as_deref().unwrap_or(""),
                    "DRY RUN: Would delete message"
                );
            }
            tracing::info!(
                matched = outcome.matched,
                blobs = outcome.blobs_matched,
                cutoff = %cutoff,
                "DRY RUN: Would delete {} messages and {} photos",
                outcome.matched,
                outcome.blobs_matched
            );
            return Ok(self.finish(outcome, started));
        }

        let (blob_paths, failures) = self.commit_batches(targets, &mut outcome).await;
        self.delete_blobs(blob_paths, &mut outcome).await;

        let outcome = self.finish(outcome, started);
        if failures.is_empty() {
            Ok(outcome)
        } else {
            Err(SweepError::BatchCommit {
                failures,
                outcome: Box::new(outcome),
            })
        }
    }

    /// Page through everything created before `cutoff`.
    async fn collect(
        &self,
        cutoff: DateTime<Utc>,
        outcome: &mut SweepOutcome,
    ) -> Result<Vec<Target>, DbError> {
        let max_deletes = self.config.max_deletes();
        let mut targets = Vec::new();
        let mut after: Option<PageCursor> = None;

        'pages: loop {
            let page = self
                .documents
                .query_created_before(
                    &self.config.collection,
                    cutoff,
                    self.config.safety.page_size.max(1),
                    after.as_ref(),
                )
                .await?;

            for document in page.documents {
                if outcome.matched >= max_deletes {
                    outcome.truncated = true;
                    break 'pages;
                }

                let blob_path = stored_blob_path(&document.fields).map(str::to_string);
                if stored_attachment_is_inconsistent(&document.fields) {
                    tracing::warn!(
                        document = %document.reference,
                        "Message has only one of imageUrl/storagePath; deleting without photo"
                    );
                }
                if let Err(e) = MessageRecord::from_document(&document) {
                    tracing::warn!(
                        document = %document.reference,
                        error = %e,
                        has_photo = blob_path.is_some(),
                        "Malformed message document; deleting it anyway"
                    );
                    outcome.malformed += 1;
                }

                outcome.matched += 1;
                if blob_path.is_some() {
                    outcome.blobs_matched += 1;
                }
                targets.push(Target {
                    reference: document.reference,
                    blob_path,
                });
            }

            match page.next {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        if outcome.truncated {
            tracing::info!(
                max_deletes = max_deletes,
                "Per-run delete cap reached; remaining messages left for the next run"
            );
        }

        Ok(targets)
    }

    /// Commit targets in sequential batches. Returns the photos of committed
    /// batches and the batches that failed.
    async fn commit_batches(
        &self,
        targets: Vec<Target>,
        outcome: &mut SweepOutcome,
    ) -> (Vec<String>, Vec<BatchFailure>) {
        let batch_size = self.config.safety.batch_size.clamp(1, MAX_BATCH_SIZE);
        let mut blob_paths = Vec::new();
        let mut failures = Vec::new();

        for (index, chunk) in targets.chunks(batch_size).enumerate() {
            let mut batch = DeleteBatch::with_limit(batch_size);
            let queued = chunk
                .iter()
                .try_for_each(|target| batch.delete(target.reference.clone()));

            let result = match queued {
                Ok(()) => self.documents.commit(batch).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(removed) => {
                    outcome.batches_committed += 1;
                    outcome.documents_deleted += removed;
                    blob_paths.extend(chunk.iter().filter_map(|t| t.blob_path.clone()));
                    tracing::debug!(batch = index, size = chunk.len(), removed, "Committed delete batch");
                }
                Err(e) => {
                    outcome.batches_failed += 1;
                    tracing::error!(
                        batch = index,
                        size = chunk.len(),
                        error = %e,
                        "Delete batch failed; its messages and photos are kept"
                    );
                    failures.push(BatchFailure {
                        index,
                        size: chunk.len(),
                        error: e.to_string(),
                    });
                }
            }
        }

        (blob_paths, failures)
    }

    /// Delete photos concurrently and wait for every attempt to settle.
    async fn delete_blobs(&self, paths: Vec<String>, outcome: &mut SweepOutcome) {
        if paths.is_empty() {
            return;
        }

        let blobs = &self.blobs;
        let results: Vec<(String, Result<(), String>)> = stream::iter(paths)
            .map(move |path| async move {
                let result = blobs.delete(&path).await.map_err(|e| e.to_string());
                (path, result)
            })
            .buffer_unordered(self.config.blob_delete_concurrency.max(1))
            .collect()
            .await;

        for (path, result) in results {
            outcome.blob_deletes_attempted += 1;
            if let Err(error) = result {
                tracing::error!(path = %path, error = %error, "Failed to delete photo; blob orphaned");
                outcome.blob_deletes_failed += 1;
                outcome.orphaned_blobs.push(BlobDeleteFailure { path, error });
            }
        }
        outcome.orphaned_blobs.sort_by(|a, b| a.path.cmp(&b.path));
    }

    /// Stamp the duration, log the summary and record metrics.
    fn finish(&self, mut outcome: SweepOutcome, started: Instant) -> SweepOutcome {
        let elapsed = started.elapsed();
        outcome.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let status = outcome.status();

        metrics::record_sweep(status, elapsed.as_secs_f64());
        if outcome.skipped || outcome.dry_run {
            return outcome;
        }

        metrics::record_retention_deletion("messages", outcome.documents_deleted);
        metrics::record_blob_deletes("deleted", outcome.blob_deletes_succeeded());
        metrics::record_blob_deletes("failed", outcome.blob_deletes_failed);
        metrics::record_orphaned_blobs(outcome.blob_deletes_failed);

        if outcome.batches_failed > 0 {
            tracing::error!(
                matched = outcome.matched,
                deleted = outcome.documents_deleted,
                batches_committed = outcome.batches_committed,
                batches_failed = outcome.batches_failed,
                blob_failures = outcome.blob_deletes_failed,
                duration_ms = outcome.duration_ms,
                "Retention sweep finished with failed batches"
            );
        } else if outcome.matched > 0 {
            tracing::info!(
                matched = outcome.matched,
                deleted = outcome.documents_deleted,
                batches = outcome.batches_committed,
                blobs_deleted = outcome.blob_deletes_succeeded(),
                blob_failures = outcome.blob_deletes_failed,
                malformed = outcome.malformed,
                truncated = outcome.truncated,
                duration_ms = outcome.duration_ms,
                "Retention sweep complete"
            );
        } else {
            tracing::debug!("Retention sweep complete, no messages to delete");
        }

        outcome
    }
}

//! Daemon host for the retention sweeper.
//!
//! Fires the sweeper on the cron schedule until cancelled. The next fire time
//! is computed after each pass finishes, so passes never overlap. Shutdown is
//! observed while waiting, never in the middle of a pass.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::{RetentionSweeper, SweepError, SweepSchedule};

/// Starts the retention worker loop.
///
/// Returns once `shutdown` is cancelled, or straight away when retention is
/// disabled by configuration.
pub async fn start_retention_worker(
    sweeper: Arc<RetentionSweeper>,
    schedule: SweepSchedule,
    run_on_startup: bool,
    shutdown: CancellationToken,
) {
    let config = sweeper.config();
    if !config.enabled {
        tracing::info!("Retention worker disabled by configuration");
        return;
    }

    if !config.has_retention() {
        tracing::info!("Retention worker enabled but messages_days is 0");
        return;
    }

    let dry_run_msg = if config.safety.dry_run {
        " (DRY RUN)"
    } else {
        ""
    };

    tracing::info!(
        cron = schedule.expression(),
        utc_offset = %schedule.offset(),
        messages_days = config.periods.messages_days,
        collection = %config.collection,
        dry_run = config.safety.dry_run,
        "Starting retention worker{}",
        dry_run_msg
    );

    if run_on_startup {
        run_pass(&sweeper).await;
    }

    loop {
        let (next, wait) = match schedule.until_next(Utc::now()) {
            Ok(next) => next,
            Err(e) => {
                tracing::error!(error = %e, "Schedule has no upcoming run; stopping retention worker");
                return;
            }
        };

        tracing::info!(next_run = %next, "Next retention sweep scheduled");

        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Retention worker shutting down");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        run_pass(&sweeper).await;
    }
}

/// Run one pass, logging instead of propagating failures.
async fn run_pass(sweeper: &RetentionSweeper) {
    match sweeper.run().await {
        Ok(outcome) => {
            tracing::debug!(
                matched = outcome.matched,
                deleted = outcome.documents_deleted,
                "Scheduled retention sweep finished"
            );
        }
        Err(SweepError::Query(e)) => {
            tracing::error!(error = %e, "Scheduled retention sweep failed before deleting anything");
        }
        Err(e @ SweepError::BatchCommit { .. }) => {
            tracing::error!(error = %e, "Scheduled retention sweep partially failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::FixedOffset;

    use super::*;
    use crate::{
        config::RetentionConfig,
        db::{DocumentStore, MemoryDocumentStore, tests::harness::{document_at, text_fields}},
        services::MemoryBlobStorage,
    };

    fn yearly_schedule() -> SweepSchedule {
        // Far enough away that only startup runs happen during a test
        SweepSchedule::new("0 3 1 1 *", FixedOffset::east_opt(9 * 3600).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_worker_stops_on_cancel() {
        let sweeper = Arc::new(RetentionSweeper::new(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryBlobStorage::new()),
            RetentionConfig::default(),
        ));
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(start_retention_worker(
            sweeper,
            yearly_schedule(),
            false,
            shutdown.clone(),
        ));
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_worker_runs_on_startup() {
        let documents = Arc::new(MemoryDocumentStore::new());
        documents
            .insert(document_at(
                "messages",
                "old",
                Utc::now() - chrono::Duration::days(45),
                text_fields("u1", "old news"),
            ))
            .await
            .unwrap();

        let sweeper = Arc::new(RetentionSweeper::new(
            documents.clone(),
            Arc::new(MemoryBlobStorage::new()),
            RetentionConfig::default(),
        ));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(start_retention_worker(
            sweeper,
            yearly_schedule(),
            true,
            shutdown.clone(),
        ));

        let mut remaining = 1;
        for _ in 0..100 {
            remaining = documents.count("messages").await.unwrap();
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_disabled_worker_returns_immediately() {
        let config = RetentionConfig {
            enabled: false,
            ..Default::default()
        };
        let sweeper = Arc::new(RetentionSweeper::new(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryBlobStorage::new()),
            config,
        ));

        // Never cancelled; must return on its own
        tokio::time::timeout(
            Duration::from_secs(5),
            start_retention_worker(sweeper, yearly_schedule(), true, CancellationToken::new()),
        )
        .await
        .expect("disabled worker should not loop");
    }
}

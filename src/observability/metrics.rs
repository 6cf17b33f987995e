//! Prometheus metrics for the sweeper.
//!
//! Provides metrics for:
//! - Sweep runs and their duration
//! - Documents and blobs deleted
//! - Blob deletions that failed and left orphans behind
//!
//! Every recording function is a no-op without the `prometheus` feature.

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;

/// Initialize the metrics system and start the `/metrics` listener.
///
/// Must be called from within a tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let address: std::net::SocketAddr = config
        .address
        .parse()
        .map_err(|e| MetricsError::Setup(format!("invalid metrics address: {e}")))?;

    PrometheusBuilder::new()
        .with_http_listener(address)
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &config.duration_buckets_secs,
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?
        .install()?;

    tracing::info!(%address, "Prometheus metrics listener started");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled {
        tracing::warn!(
            "Metrics are enabled in config but the 'prometheus' feature is not compiled. \
            Rebuild with: cargo build --features prometheus"
        );
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record a finished sweep.
///
/// # Arguments
/// * `status` - "success", "failed", "dry_run" or "skipped"
/// * `duration_secs` - Wall time of the run
pub fn record_sweep(status: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("retention_sweeps_total", "status" => status.to_string()).increment(1);
        histogram!("retention_sweep_duration_seconds").record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (status, duration_secs);
    }
}

/// Record data retention deletion.
///
/// # Arguments
/// * `resource` - What was deleted ("messages", "blobs")
/// * `count` - The number of items deleted
pub fn record_retention_deletion(resource: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "retention_deletions_total",
            "resource" => resource.to_string()
        )
        .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (resource, count);
    }
}

/// Record blob delete attempts by result ("deleted" or "failed").
pub fn record_blob_deletes(result: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "retention_blob_deletes_total",
            "result" => result.to_string()
        )
        .increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (result, count);
    }
}

/// Record blobs left behind after their documents were deleted.
pub fn record_orphaned_blobs(count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("retention_orphaned_blobs_total").increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = count;
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_metrics_is_noop() {
        let config = MetricsConfig::default();
        assert!(!config.enabled);
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_recording_without_recorder() {
        // With no recorder installed these must not panic
        record_sweep("success", 0.5);
        record_retention_deletion("messages", 3);
        record_blob_deletes("deleted", 2);
        record_blob_deletes("failed", 1);
        record_orphaned_blobs(1);
    }
}

//! Message retention configuration.
//!
//! Configures the sweeper that purges old chat messages and their photo
//! attachments.
//!
//! # Example
//!
//! ```toml
//! [retention]
//! enabled = true
//! collection = "messages"
//! blob_delete_concurrency = 16
//!
//! [retention.periods]
//! messages_days = 30
//!
//! [retention.safety]
//! dry_run = false
//! max_deletes_per_run = 0
//! batch_size = 500
//! page_size = 1000
//! ```

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::db::MAX_BATCH_SIZE;

/// Message retention configuration.
///
/// When enabled, the sweeper deletes every message older than
/// `periods.messages_days` along with its attachment blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Whether the sweeper runs at all.
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Document collection holding chat messages.
    /// Default: "messages"
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Maximum number of blob deletions in flight at once.
    /// Default: 16
    #[serde(default = "default_blob_delete_concurrency")]
    pub blob_delete_concurrency: usize,

    /// Retention periods.
    #[serde(default)]
    pub periods: RetentionPeriods,

    /// Safety settings to prevent accidental data loss.
    #[serde(default)]
    pub safety: RetentionSafety,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            collection: default_collection(),
            blob_delete_concurrency: default_blob_delete_concurrency(),
            periods: RetentionPeriods::default(),
            safety: RetentionSafety::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_collection() -> String {
    "messages".to_string()
}

fn default_blob_delete_concurrency() -> usize {
    16
}

/// Retention periods.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionPeriods {
    /// Days to keep chat messages (and their photos).
    /// Set to 0 to keep messages forever.
    /// Default: 30 days
    #[serde(default = "default_messages_days")]
    pub messages_days: u32,
}

impl Default for RetentionPeriods {
    fn default() -> Self {
        Self {
            messages_days: default_messages_days(),
        }
    }
}

fn default_messages_days() -> u32 {
    30
}

/// Safety settings for sweep operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionSafety {
    /// If true, log what would be deleted without deleting anything.
    /// Default: false
    #[serde(default)]
    pub dry_run: bool,

    /// Maximum number of messages to delete per run.
    /// Anything beyond the cap is picked up by the next run.
    /// Set to 0 for unlimited.
    /// Default: 0
    #[serde(default)]
    pub max_deletes_per_run: u64,

    /// Documents per atomic delete batch.
    /// Can only lower the document store's hard limit of 500.
    /// Default: 500
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Documents fetched per query page.
    /// Default: 1000
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for RetentionSafety {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_deletes_per_run: 0,
            batch_size: default_batch_size(),
            page_size: default_page_size(),
        }
    }
}

fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}

fn default_page_size() -> usize {
    1000
}

impl RetentionConfig {
    /// Check if message retention is configured (non-zero period).
    pub fn has_retention(&self) -> bool {
        self.periods.messages_days > 0
    }

    /// The retention window as a chrono duration.
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.periods.messages_days))
    }

    /// Per-run delete cap, with 0 mapped to unlimited.
    pub fn max_deletes(&self) -> u64 {
        if self.safety.max_deletes_per_run == 0 {
            u64::MAX
        } else {
            self.safety.max_deletes_per_run
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collection.trim().is_empty() {
            return Err(ConfigError::Validation(
                "retention.collection cannot be empty".into(),
            ));
        }
        if self.safety.batch_size == 0 || self.safety.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::Validation(format!(
                "retention.safety.batch_size must be between 1 and {MAX_BATCH_SIZE}, got {}",
                self.safety.batch_size
            )));
        }
        if self.safety.page_size == 0 {
            return Err(ConfigError::Validation(
                "retention.safety.page_size must be at least 1".into(),
            ));
        }
        if self.blob_delete_concurrency == 0 {
            return Err(ConfigError::Validation(
                "retention.blob_delete_concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RetentionConfig::default();
        assert!(config.enabled);
        assert_eq!(config.collection, "messages");
        assert_eq!(config.periods.messages_days, 30);
        assert!(!config.safety.dry_run);
        assert_eq!(config.safety.max_deletes_per_run, 0);
        assert_eq!(config.safety.batch_size, 500);
        assert_eq!(config.safety.page_size, 1000);
        assert_eq!(config.blob_delete_concurrency, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            enabled = true
            collection = "chat_messages"
            blob_delete_concurrency = 4

            [periods]
            messages_days = 7

            [safety]
            dry_run = true
            max_deletes_per_run = 2000
            batch_size = 100
            page_size = 250
        "#;
        let config: RetentionConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.collection, "chat_messages");
        assert_eq!(config.blob_delete_concurrency, 4);
        assert_eq!(config.periods.messages_days, 7);
        assert!(config.safety.dry_run);
        assert_eq!(config.max_deletes(), 2000);
        assert_eq!(config.safety.batch_size, 100);
        assert_eq!(config.safety.page_size, 250);
        assert_eq!(config.window(), chrono::Duration::days(7));
    }

    #[test]
    fn test_zero_period_disables_retention() {
        let config: RetentionConfig = toml::from_str("[periods]\nmessages_days = 0").unwrap();
        assert!(!config.has_retention());
    }

    #[test]
    fn test_unlimited_deletes() {
        let config = RetentionConfig::default();
        assert_eq!(config.max_deletes(), u64::MAX);
    }

    #[test]
    fn test_batch_size_above_store_limit_rejected() {
        let mut config = RetentionConfig::default();
        config.safety.batch_size = MAX_BATCH_SIZE + 1;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        config.safety.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<RetentionConfig, _> = toml::from_str("interval_hours = 24");
        assert!(result.is_err());
    }
}

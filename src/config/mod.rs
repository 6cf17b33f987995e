//! Configuration module for the retention sweeper.
//!
//! The sweeper is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [retention.periods]
//! messages_days = 30
//!
//! [schedule]
//! cron = "0 3 * * *"
//! utc_offset = "+09:00"
//!
//! [database]
//! type = "sqlite"
//! path = "/var/lib/chat/messages.db"
//!
//! [storage.blobs]
//! backend = "s3"
//!
//! [storage.blobs.s3]
//! bucket = "chat-photos"
//! region = "ap-northeast-2"
//! secret_access_key = "${S3_SECRET_KEY}"
//! ```

mod database;
mod observability;
mod retention;
mod schedule;
mod storage;

use std::{path::Path, sync::LazyLock};

pub use database::*;
pub use observability::*;
use regex::Regex;
pub use retention::*;
pub use schedule::*;
use serde::{Deserialize, Serialize};
pub use storage::*;

/// Root configuration for the sweeper.
///
/// Every section is optional; an empty file yields a 30-day sweep at 03:00
/// KST against in-memory stores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweeperConfig {
    /// Message retention policy.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// When the daemon fires the sweep.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Document store holding chat messages.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Blob storage holding photo attachments.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Observability configuration (logging, metrics).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl SweeperConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing variables cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: SweeperConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.is_memory() && !self.retention.safety.dry_run {
            tracing::warn!(
                "Document store is in-memory; the sweeper will only see messages \
                 written by this process"
            );
        }

        self.retention.validate()?;
        self.schedule.validate()?;
        self.database.validate()?;
        self.storage.blobs.validate()?;
        self.observability.validate()?;

        Ok(())
    }
}

/// Configuration written by `chat-sweeper init`.
pub const DEFAULT_CONFIG_TOML: &str = r#"# Chat retention sweeper configuration

[retention]
enabled = true
collection = "messages"

[retention.periods]
# Messages (and their photos) older than this are deleted
messages_days = 30

[retention.safety]
dry_run = false
# 0 = unlimited
max_deletes_per_run = 0
batch_size = 500

# Every day at 03:00 Korea Standard Time
[schedule]
cron = "0 3 * * *"
utc_offset = "+09:00"

[database]
type = "sqlite"
path = "chat.db"

[storage.blobs]
backend = "filesystem"

[storage.blobs.filesystem]
path = "blobs"

[observability.logging]
level = "info"
format = "compact"
"#;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

static ENV_VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

/// Expand environment variables in the format `${VAR_NAME}`.
/// Skips variables that appear after a `#` on the same line.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');
        let mut last_end = 0;

        for cap in ENV_VAR_PATTERN.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };

            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            result.push_str(&value);

            last_end = whole.end();
        }

        result.push_str(&line[last_end..]);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config() {
        let config = SweeperConfig::from_str("").unwrap();
        assert!(config.retention.enabled);
        assert_eq!(config.retention.periods.messages_days, 30);
        assert_eq!(config.schedule.cron, "0 3 * * *");
        assert!(config.database.is_memory());
        assert_eq!(config.storage.blobs.backend, BlobStorageBackend::Memory);
    }

    #[cfg(feature = "database-sqlite")]
    #[test]
    fn test_default_config_toml_parses() {
        let config = SweeperConfig::from_str(DEFAULT_CONFIG_TOML).unwrap();
        assert_eq!(config.retention.safety.batch_size, 500);
        assert_eq!(config.storage.blobs.backend, BlobStorageBackend::Filesystem);
        assert!(matches!(config.database, DatabaseConfig::Sqlite(_)));
    }

    #[test]
    fn test_validation_runs_on_sections() {
        let result = SweeperConfig::from_str(
            r#"
            [retention.safety]
            batch_size = 501
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));

        let result = SweeperConfig::from_str(
            r#"
            [storage.blobs]
            backend = "filesystem"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_unknown_section_rejected() {
        let result = SweeperConfig::from_str("[server]\nport = 8080");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_env_var_expansion() {
        temp_env::with_var("SWEEPER_TEST_BUCKET", Some("photos-prod"), || {
            let config = SweeperConfig::from_str(
                r#"
                [storage.blobs]
                backend = "s3"

                [storage.blobs.s3]
                bucket = "${SWEEPER_TEST_BUCKET}"
                region = "ap-northeast-2"
                "#,
            )
            .unwrap();
            assert_eq!(config.storage.blobs.s3.unwrap().bucket, "photos-prod");
        });
    }

    #[test]
    fn test_env_var_in_comment_not_expanded() {
        temp_env::with_var_unset("SWEEPER_TEST_MISSING", || {
            let expanded = expand_env_vars("cron = \"0 3 * * *\" # ${SWEEPER_TEST_MISSING}")
                .unwrap();
            assert!(expanded.contains("${SWEEPER_TEST_MISSING}"));
        });
    }

    #[test]
    fn test_missing_env_var() {
        temp_env::with_var_unset("SWEEPER_TEST_MISSING", || {
            let result = expand_env_vars("path = \"${SWEEPER_TEST_MISSING}\"");
            assert!(matches!(result, Err(ConfigError::EnvVarNotFound(name)) if name == "SWEEPER_TEST_MISSING"));
        });
    }

    #[test]
    fn test_env_var_multiple_on_line() {
        temp_env::with_vars(
            [("SWEEPER_A", Some("one")), ("SWEEPER_B", Some("two"))],
            || {
                let expanded = expand_env_vars("x = \"${SWEEPER_A}-${SWEEPER_B}\"\n").unwrap();
                assert_eq!(expanded, "x = \"one-two\"\n");
            },
        );
    }
}

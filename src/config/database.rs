use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Document store configuration.
///
/// The document store holds chat messages. The sweeper only reads and
/// deletes; messages are written by the chat-send path.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum DatabaseConfig {
    /// In-process store. Contents are lost on exit; local runs and tests only.
    #[default]
    Memory,

    /// SQLite database. Good for single-node deployments.
    #[cfg(feature = "database-sqlite")]
    Sqlite(SqliteConfig),
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        matches!(self, DatabaseConfig::Memory)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            DatabaseConfig::Memory => Ok(()),
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(c) => c.validate(),
        }
    }
}

/// SQLite configuration.
#[cfg(feature = "database-sqlite")]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteConfig {
    /// Path to the SQLite database file.
    /// Use `:memory:` for an in-memory database (testing only).
    pub path: String,

    /// Create the database file if it doesn't exist.
    #[serde(default = "default_true")]
    pub create_if_missing: bool,

    /// Run migrations on startup.
    #[serde(default = "default_true")]
    pub run_migrations: bool,

    /// Enable WAL mode for better concurrency with the chat-send writer.
    #[serde(default = "default_true")]
    pub wal_mode: bool,

    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_sqlite_max_connections")]
    pub max_connections: u32,
}

#[cfg(feature = "database-sqlite")]
impl SqliteConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.path.is_empty() {
            return Err(ConfigError::Validation(
                "SQLite path cannot be empty".into(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Validation(
                "SQLite max_connections must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(feature = "database-sqlite")]
fn default_true() -> bool {
    true
}

#[cfg(feature = "database-sqlite")]
fn default_busy_timeout() -> u64 {
    5000 // 5 seconds
}

#[cfg(feature = "database-sqlite")]
fn default_sqlite_max_connections() -> u32 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_memory() {
        let config = DatabaseConfig::default();
        assert!(config.is_memory());
        assert!(config.validate().is_ok());
    }

    #[cfg(feature = "database-sqlite")]
    #[test]
    fn test_parse_sqlite() {
        let config: DatabaseConfig = toml::from_str(
            r#"
            type = "sqlite"
            path = "/var/lib/chat/messages.db"
            max_connections = 2
            "#,
        )
        .unwrap();

        match config {
            DatabaseConfig::Sqlite(c) => {
                assert_eq!(c.path, "/var/lib/chat/messages.db");
                assert!(c.create_if_missing);
                assert!(c.run_migrations);
                assert_eq!(c.busy_timeout_ms, 5000);
                assert_eq!(c.max_connections, 2);
            }
            other => panic!("expected sqlite config, got {other:?}"),
        }
    }

    #[cfg(feature = "database-sqlite")]
    #[test]
    fn test_empty_sqlite_path_rejected() {
        let config: DatabaseConfig = toml::from_str("type = \"sqlite\"\npath = \"\"").unwrap();
        assert!(config.validate().is_err());
    }
}

//! Blob storage configuration for photo attachments.
//!
//! Supports multiple storage backends for attachment bytes:
//! - **Memory**: In-process map (default; local runs and tests)
//! - **Filesystem**: Files under a local directory
//! - **S3**: S3-compatible object storage (AWS S3, GCS interop, MinIO, R2)
//!
//! # Example Configuration
//!
//! ```toml
//! [storage.blobs]
//! backend = "s3"
//!
//! [storage.blobs.s3]
//! bucket = "chat-photos"
//! region = "ap-northeast-2"
//! # Credentials via env vars AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY
//! # or IAM role
//!
//! [storage.blobs.filesystem]
//! path = "/var/lib/chat/blobs"
//! ```

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Storage configuration for binary data.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Attachment blob storage configuration.
    #[serde(default)]
    pub blobs: BlobStorageConfig,
}

/// Blob storage backend configuration.
///
/// Message documents hold the blob path (`storagePath`); this config decides
/// where those paths resolve.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct BlobStorageConfig {
    /// Storage backend to use.
    #[serde(default)]
    pub backend: BlobStorageBackend,

    /// S3 configuration (required when backend = "s3").
    #[serde(default)]
    pub s3: Option<S3StorageConfig>,

    /// Filesystem configuration (required when backend = "filesystem").
    #[serde(default)]
    pub filesystem: Option<FilesystemStorageConfig>,
}

impl BlobStorageConfig {
    /// Validate the storage configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.backend {
            BlobStorageBackend::Memory => Ok(()),
            BlobStorageBackend::S3 => match &self.s3 {
                Some(s3) => s3.validate(),
                None => Err(ConfigError::Validation(
                    "S3 storage backend requires [storage.blobs.s3] configuration".into(),
                )),
            },
            BlobStorageBackend::Filesystem => match &self.filesystem {
                Some(fs) => fs.validate(),
                None => Err(ConfigError::Validation(
                    "Filesystem storage backend requires [storage.blobs.filesystem] configuration"
                        .into(),
                )),
            },
        }
    }
}

/// Storage backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlobStorageBackend {
    /// Keep blobs in process memory.
    #[default]
    Memory,

    /// Store blobs on the local filesystem, one file per blob path.
    Filesystem,

    /// Store blobs in S3-compatible object storage.
    S3,
}

/// S3-compatible object storage configuration.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct S3StorageConfig {
    /// Bucket name.
    pub bucket: String,

    /// Region (e.g., "ap-northeast-2").
    #[serde(default)]
    pub region: Option<String>,

    /// Custom endpoint URL for S3-compatible services.
    /// Examples:
    /// - MinIO: "http://localhost:9000"
    /// - GCS interop: "https://storage.googleapis.com"
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Access key ID. Falls back to the environment or instance role.
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// Secret access key. Falls back to the environment or instance role.
    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Use path-style URLs instead of virtual-hosted style (MinIO).
    #[serde(default)]
    pub force_path_style: bool,

    /// Prefix prepended to every blob path.
    /// Example: "chat/" maps `images/a.jpg` to `chat/images/a.jpg`.
    #[serde(default)]
    pub key_prefix: Option<String>,
}

impl std::fmt::Debug for S3StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3StorageConfig")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field(
                "access_key_id",
                &self.access_key_id.as_ref().map(|_| "****"),
            )
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "****"),
            )
            .field("force_path_style", &self.force_path_style)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl S3StorageConfig {
    /// Validate S3 configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.is_empty() {
            return Err(ConfigError::Validation(
                "S3 bucket name cannot be empty".into(),
            ));
        }
        if self.region.is_none() && self.endpoint.is_none() {
            return Err(ConfigError::Validation(
                "S3 requires either 'region' or 'endpoint' to be specified".into(),
            ));
        }
        Ok(())
    }

    /// Object key for a blob path.
    pub fn object_key(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        match &self.key_prefix {
            Some(prefix) => {
                let prefix = prefix.trim_end_matches('/');
                format!("{}/{}", prefix, path)
            }
            None => path.to_string(),
        }
    }
}

/// Local filesystem storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilesystemStorageConfig {
    /// Root directory. Blob `images/a.jpg` lives at `{path}/images/a.jpg`.
    pub path: String,

    /// Create the root directory if it doesn't exist.
    /// Default: true
    #[serde(default = "default_true")]
    pub create_dir: bool,

    /// Directory permissions (Unix mode) for created directories.
    /// Default: 0o700
    #[serde(default = "default_dir_mode")]
    pub dir_mode: u32,
}

impl FilesystemStorageConfig {
    /// Validate filesystem configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.is_empty() {
            return Err(ConfigError::Validation(
                "Filesystem storage path cannot be empty".into(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_dir_mode() -> u32 {
    0o700
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_storage_config() {
        let config: StorageConfig = toml::from_str("").unwrap();
        assert_eq!(config.blobs.backend, BlobStorageBackend::Memory);
        assert!(config.blobs.s3.is_none());
        assert!(config.blobs.filesystem.is_none());
        assert!(config.blobs.validate().is_ok());
    }

    #[test]
    fn test_s3_backend() {
        let config: BlobStorageConfig = toml::from_str(
            r#"
            backend = "s3"

            [s3]
            bucket = "chat-photos"
            region = "ap-northeast-2"
            key_prefix = "prod/"
            "#,
        )
        .unwrap();

        assert_eq!(config.backend, BlobStorageBackend::S3);
        assert!(config.validate().is_ok());
        let s3 = config.s3.unwrap();
        assert_eq!(s3.object_key("images/a.jpg"), "prod/images/a.jpg");
    }

    #[test]
    fn test_s3_backend_missing_section() {
        let config: BlobStorageConfig = toml::from_str(r#"backend = "s3""#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_s3_requires_region_or_endpoint() {
        let config = S3StorageConfig {
            bucket: "chat-photos".to_string(),
            region: None,
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
            key_prefix: None,
        };
        assert!(config.validate().is_err());
        assert_eq!(config.object_key("/images/a.jpg"), "images/a.jpg");
    }

    #[test]
    fn test_s3_debug_redacts_credentials() {
        let config = S3StorageConfig {
            bucket: "chat-photos".to_string(),
            region: Some("us-east-1".to_string()),
            endpoint: None,
            access_key_id: Some("AKIAEXAMPLE".to_string()),
            secret_access_key: Some("super-secret".to_string()),
            force_path_style: false,
            key_prefix: None,
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("AKIAEXAMPLE"));
        assert!(!debug.contains("super-secret"));
    }

    #[test]
    fn test_filesystem_backend() {
        let config: BlobStorageConfig = toml::from_str(
            r#"
            backend = "filesystem"

            [filesystem]
            path = "/var/lib/chat/blobs"
            "#,
        )
        .unwrap();

        assert_eq!(config.backend, BlobStorageBackend::Filesystem);
        let fs = config.filesystem.as_ref().unwrap();
        assert!(fs.create_dir);
        assert_eq!(fs.dir_mode, 0o700);
        assert!(config.validate().is_ok());
    }
}

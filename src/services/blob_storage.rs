//! Pluggable blob storage backends for photo attachments.
//!
//! Message documents reference their photo by blob path (`storagePath`,
//! e.g. `images/{uid}_{millis}.jpg`). This module resolves those paths
//! against one of:
//!
//! - **Memory**: In-process map (default; local runs and tests)
//! - **Filesystem**: Files under a rooted local directory
//! - **S3**: S3-compatible object storage
//!
//! The choice of backend is configured via `[storage.blobs]` in the config.

use std::{
    collections::HashMap,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
#[cfg(feature = "s3-storage")]
use tracing::error;
use tracing::{debug, info, instrument};

#[cfg(feature = "s3-storage")]
use crate::config::S3StorageConfig;
use crate::config::{BlobStorageBackend, BlobStorageConfig, FilesystemStorageConfig};

/// Errors that can occur during blob storage operations.
#[derive(Debug, Error)]
pub enum BlobStorageError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid blob path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type BlobStorageResult<T> = Result<T, BlobStorageError>;

/// Trait for pluggable blob storage backends.
///
/// Every call is independent: a failed delete leaves other blobs and other
/// in-flight calls untouched.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Store blob content at `path`, replacing any existing blob.
    async fn store(&self, path: &str, content: &[u8]) -> BlobStorageResult<()>;

    /// Retrieve blob content.
    async fn retrieve(&self, path: &str) -> BlobStorageResult<Vec<u8>>;

    /// Delete the blob at `path`. A blob that is already gone is not an error.
    async fn delete(&self, path: &str) -> BlobStorageResult<()>;

    /// Check if a blob exists.
    async fn exists(&self, path: &str) -> BlobStorageResult<bool>;

    /// Get the backend type name (for logging/debugging).
    fn backend_name(&self) -> &'static str;
}

/// Reject paths that could escape the storage root.
///
/// Blob paths are relative, `/`-separated and free of `.`/`..` segments.
pub fn validate_blob_path(path: &str) -> BlobStorageResult<()> {
    let invalid = |reason| {
        Err(BlobStorageError::InvalidPath {
            path: path.to_string(),
            reason,
        })
    };

    if path.trim().is_empty() {
        return invalid("path is empty");
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return invalid("path must be relative");
    }
    if path.contains('\0') {
        return invalid("path contains a NUL byte");
    }
    if path.contains('\\') {
        return invalid("path must use '/' separators");
    }
    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) => {}
            Component::CurDir | Component::ParentDir => {
                return invalid("path must not contain '.' or '..' segments");
            }
            Component::RootDir | Component::Prefix(_) => return invalid("path must be relative"),
        }
    }
    Ok(())
}

/// In-memory blob storage backend.
#[derive(Default)]
pub struct MemoryBlobStorage {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

#[async_trait]
impl BlobStorage for MemoryBlobStorage {
    async fn store(&self, path: &str, content: &[u8]) -> BlobStorageResult<()> {
        validate_blob_path(path)?;
        self.blobs.write().insert(path.to_string(), content.to_vec());
        Ok(())
    }

    async fn retrieve(&self, path: &str) -> BlobStorageResult<Vec<u8>> {
        self.blobs
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| BlobStorageError::NotFound(path.to_string()))
    }

    async fn delete(&self, path: &str) -> BlobStorageResult<()> {
        validate_blob_path(path)?;
        if self.blobs.write().remove(path).is_none() {
            debug!(path, "Blob already absent");
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> BlobStorageResult<bool> {
        Ok(self.blobs.read().contains_key(path))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Filesystem blob storage backend.
///
/// Blob `images/a.jpg` is stored at `{root}/images/a.jpg`.
pub struct FilesystemBlobStorage {
    config: FilesystemStorageConfig,
}

impl FilesystemBlobStorage {
    pub fn new(config: FilesystemStorageConfig) -> BlobStorageResult<Self> {
        let storage = Self { config };

        if storage.config.create_dir {
            let path = Path::new(&storage.config.path);
            if !path.exists() {
                info!(path = %storage.config.path, "Creating blob storage directory");
                std::fs::create_dir_all(path)?;

                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(
                        path,
                        std::fs::Permissions::from_mode(storage.config.dir_mode),
                    )?;
                }
            }
        }

        Ok(storage)
    }

    fn blob_path(&self, path: &str) -> BlobStorageResult<PathBuf> {
        validate_blob_path(path)?;
        Ok(Path::new(&self.config.path).join(path))
    }
}

#[async_trait]
impl BlobStorage for FilesystemBlobStorage {
    #[instrument(skip(self, content), fields(size = content.len()))]
    async fn store(&self, path: &str, content: &[u8]) -> BlobStorageResult<()> {
        let full = self.blob_path(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write to a temp file first, then rename for atomicity
        let temp_path = full.with_extension("tmp");
        tokio::fs::write(&temp_path, content).await?;
        tokio::fs::rename(&temp_path, &full).await?;

        debug!(path = %full.display(), "Blob stored");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn retrieve(&self, path: &str) -> BlobStorageResult<Vec<u8>> {
        let full = self.blob_path(path)?;
        match tokio::fs::read(&full).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobStorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(BlobStorageError::Io(e)),
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, path: &str) -> BlobStorageResult<()> {
        let full = self.blob_path(path)?;

        match tokio::fs::remove_file(&full).await {
            Ok(()) => {
                debug!(path = %full.display(), "Blob deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %full.display(), "Blob already absent");
                Ok(())
            }
            Err(e) => Err(BlobStorageError::Io(e)),
        }
    }

    #[instrument(skip(self))]
    async fn exists(&self, path: &str) -> BlobStorageResult<bool> {
        let full = self.blob_path(path)?;
        Ok(tokio::fs::try_exists(&full).await?)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}

/// S3-compatible object storage backend.
///
/// Requires the `s3-storage` feature.
#[cfg(feature = "s3-storage")]
pub struct S3BlobStorage {
    config: S3StorageConfig,
    client: aws_sdk_s3::Client,
}

#[cfg(feature = "s3-storage")]
impl S3BlobStorage {
    pub async fn new(config: S3StorageConfig) -> BlobStorageResult<Self> {
        info!(bucket = %config.bucket, "Initializing S3 blob storage");

        let mut sdk_config_builder = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(region) = &config.region {
            sdk_config_builder = sdk_config_builder.region(aws_config::Region::new(region.clone()));
        }

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = aws_credential_types::Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "chat-sweeper-config",
            );
            sdk_config_builder = sdk_config_builder.credentials_provider(credentials);
        }

        let sdk_config = sdk_config_builder.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = aws_sdk_s3::Client::from_conf(s3_config_builder.build());

        Ok(Self { config, client })
    }

    fn object_key(&self, path: &str) -> BlobStorageResult<String> {
        validate_blob_path(path)?;
        Ok(self.config.object_key(path))
    }
}

#[cfg(feature = "s3-storage")]
fn is_not_found(message: &str) -> bool {
    message.contains("NoSuchKey") || message.contains("NotFound")
}

#[cfg(feature = "s3-storage")]
#[async_trait]
impl BlobStorage for S3BlobStorage {
    #[instrument(skip(self, content), fields(size = content.len(), bucket = %self.config.bucket))]
    async fn store(&self, path: &str, content: &[u8]) -> BlobStorageResult<()> {
        let key = self.object_key(path)?;

        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .body(aws_sdk_s3::primitives::ByteStream::from(content.to_vec()))
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, key, "Failed to upload to S3");
                BlobStorageError::S3(e.to_string())
            })?;

        debug!(key, "Blob stored in S3");
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.config.bucket))]
    async fn retrieve(&self, path: &str) -> BlobStorageResult<Vec<u8>> {
        let key = self.object_key(path)?;

        let result = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let message = e.to_string();
                if is_not_found(&message) {
                    BlobStorageError::NotFound(path.to_string())
                } else {
                    BlobStorageError::S3(message)
                }
            })?;

        let content = result
            .body
            .collect()
            .await
            .map_err(|e| BlobStorageError::S3(format!("Failed to read S3 response body: {}", e)))?
            .to_vec();

        Ok(content)
    }

    #[instrument(skip(self), fields(bucket = %self.config.bucket))]
    async fn delete(&self, path: &str) -> BlobStorageResult<()> {
        let key = self.object_key(path)?;

        match self
            .client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => {
                debug!(key, "Blob deleted from S3");
                Ok(())
            }
            Err(e) if is_not_found(&e.to_string()) => {
                debug!(key, "Blob already absent from S3");
                Ok(())
            }
            Err(e) => Err(BlobStorageError::S3(e.to_string())),
        }
    }

    #[instrument(skip(self), fields(bucket = %self.config.bucket))]
    async fn exists(&self, path: &str) -> BlobStorageResult<bool> {
        let key = self.object_key(path)?;

        match self
            .client
            .head_object()
            .bucket(&self.config.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e.to_string()) => Ok(false),
            Err(e) => Err(BlobStorageError::S3(e.to_string())),
        }
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

/// Create a blob storage backend from configuration.
pub async fn create_blob_storage(
    config: &BlobStorageConfig,
) -> BlobStorageResult<Arc<dyn BlobStorage>> {
    match config.backend {
        BlobStorageBackend::Memory => {
            info!("Using in-memory blob storage backend");
            Ok(Arc::new(MemoryBlobStorage::new()))
        }
        BlobStorageBackend::Filesystem => {
            let fs_config = config.filesystem.clone().ok_or_else(|| {
                BlobStorageError::Config(
                    "Filesystem backend requires [storage.blobs.filesystem] config".to_string(),
                )
            })?;
            info!(path = %fs_config.path, "Using filesystem blob storage backend");
            Ok(Arc::new(FilesystemBlobStorage::new(fs_config)?))
        }
        #[cfg(feature = "s3-storage")]
        BlobStorageBackend::S3 => {
            let s3_config = config.s3.clone().ok_or_else(|| {
                BlobStorageError::Config(
                    "S3 backend requires [storage.blobs.s3] config".to_string(),
                )
            })?;
            info!(bucket = %s3_config.bucket, "Using S3 blob storage backend");
            Ok(Arc::new(S3BlobStorage::new(s3_config).await?))
        }
        #[cfg(not(feature = "s3-storage"))]
        BlobStorageBackend::S3 => Err(BlobStorageError::Config(
            "S3 blob storage backend requires the 's3-storage' feature. \
                Rebuild with: cargo build --features s3-storage"
                .to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;

    fn fs_config(dir: &TempDir) -> FilesystemStorageConfig {
        FilesystemStorageConfig {
            path: dir.path().join("blobs").to_string_lossy().to_string(),
            create_dir: true,
            dir_mode: 0o700,
        }
    }

    #[rstest]
    #[case("images/u1_1700000000000.jpg")]
    #[case("a.jpg")]
    #[case("images/nested/deep/b.png")]
    fn test_valid_blob_paths(#[case] path: &str) {
        assert!(validate_blob_path(path).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("/etc/passwd")]
    #[case("../secrets.txt")]
    #[case("images/../../etc/passwd")]
    #[case("./images/a.jpg")]
    #[case("images\\a.jpg")]
    fn test_invalid_blob_paths(#[case] path: &str) {
        assert!(matches!(
            validate_blob_path(path),
            Err(BlobStorageError::InvalidPath { .. })
        ));
    }

    #[tokio::test]
    async fn test_memory_storage_delete_is_idempotent() {
        let storage = MemoryBlobStorage::new();
        storage.store("images/a.jpg", b"jpeg").await.unwrap();
        assert_eq!(storage.len(), 1);

        storage.delete("images/a.jpg").await.unwrap();
        assert!(storage.is_empty());
        storage.delete("images/a.jpg").await.unwrap();
    }

    #[tokio::test]
    async fn test_filesystem_storage_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FilesystemBlobStorage::new(fs_config(&temp_dir)).unwrap();

        storage.store("images/u1_1.jpg", b"jpeg bytes").await.unwrap();
        assert!(
            temp_dir
                .path()
                .join("blobs/images/u1_1.jpg")
                .exists()
        );
        assert_eq!(
            storage.retrieve("images/u1_1.jpg").await.unwrap(),
            b"jpeg bytes"
        );
        assert!(storage.exists("images/u1_1.jpg").await.unwrap());

        storage.delete("images/u1_1.jpg").await.unwrap();
        assert!(!storage.exists("images/u1_1.jpg").await.unwrap());

        // Deleting again should be idempotent
        storage.delete("images/u1_1.jpg").await.unwrap();
    }

    #[tokio::test]
    async fn test_filesystem_storage_retrieve_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FilesystemBlobStorage::new(fs_config(&temp_dir)).unwrap();

        let result = storage.retrieve("images/missing.jpg").await;
        assert!(matches!(result, Err(BlobStorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_filesystem_storage_rejects_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let outside = temp_dir.path().join("outside.txt");
        std::fs::write(&outside, b"keep me").unwrap();

        let storage = FilesystemBlobStorage::new(fs_config(&temp_dir)).unwrap();
        let result = storage.delete("../outside.txt").await;

        assert!(matches!(result, Err(BlobStorageError::InvalidPath { .. })));
        assert!(outside.exists());
    }

    #[tokio::test]
    async fn test_create_blob_storage_from_config() {
        let temp_dir = TempDir::new().unwrap();

        let memory = create_blob_storage(&BlobStorageConfig::default())
            .await
            .unwrap();
        assert_eq!(memory.backend_name(), "memory");

        let fs = create_blob_storage(&BlobStorageConfig {
            backend: BlobStorageBackend::Filesystem,
            s3: None,
            filesystem: Some(fs_config(&temp_dir)),
        })
        .await
        .unwrap();
        assert_eq!(fs.backend_name(), "filesystem");

        let missing = create_blob_storage(&BlobStorageConfig {
            backend: BlobStorageBackend::Filesystem,
            s3: None,
            filesystem: None,
        })
        .await;
        assert!(matches!(missing, Err(BlobStorageError::Config(_))));
    }

    #[test]
    fn test_backends_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MemoryBlobStorage>();
        assert_send_sync::<FilesystemBlobStorage>();
        #[cfg(feature = "s3-storage")]
        assert_send_sync::<S3BlobStorage>();
    }
}

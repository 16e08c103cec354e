//! Object storage for property photos and agent avatars.
//!
//! Handlers only see the [`ObjectStore`] trait. The shipped implementation is
//! [`LocalBucket`], a directory under `UPLOAD_DIR` served by the static file
//! route at `/uploads/<bucket>/`.

use async_trait::async_trait;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{SiteConfig, SITE};
use crate::error::ApiError;

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

pub const PROPERTIES_BUCKET: &str = "properties";
pub const AVATARS_BUCKET: &str = "avatars";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object path: {0}")]
    InvalidPath(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Storage(err.to_string())
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` at `path` and returns its public URL.
    async fn upload(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, StorageError>;

    async fn remove(&self, paths: &[String]) -> Result<(), StorageError>;

    fn public_url(&self, path: &str) -> String;

    /// Inverse of [`public_url`](Self::public_url); `None` for foreign URLs.
    fn path_from_url(&self, url: &str) -> Option<String>;
}

/// Filesystem bucket rooted at `<upload_dir>/<name>`.
#[derive(Debug, Clone)]
pub struct LocalBucket {
    name: String,
    root: PathBuf,
    base_url: String,
}

impl LocalBucket {
    pub fn new(name: &str, config: &SiteConfig) -> Self {
        Self {
            name: name.to_string(),
            root: config.upload_dir.join(name),
            base_url: format!("{}/uploads/{}", config.public_base_url(), name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        let clean = !path.is_empty()
            && !path.contains('\\')
            && !path.contains('\0')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));

        if clean {
            Ok(self.root.join(relative))
        } else {
            Err(StorageError::InvalidPath(path.to_string()))
        }
    }
}

#[async_trait]
impl ObjectStore for LocalBucket {
    async fn upload(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<String, StorageError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;

        tracing::info!(
            bucket = %self.name,
            path = %path,
            content_type = %content_type,
            size = bytes.len(),
            "object stored"
        );
        Ok(self.public_url(path))
    }

    async fn remove(&self, paths: &[String]) -> Result<(), StorageError> {
        let mut first_error = None;

        for path in paths {
            let result = match self.resolve(path) {
                Ok(target) => match tokio::fs::remove_file(&target).await {
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    other => other.map_err(StorageError::from),
                },
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                tracing::warn!(
                    bucket = %self.name,
                    path = %path,
                    error = %e,
                    "object removal failed"
                );
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn path_from_url(&self, url: &str) -> Option<String> {
        let relative_prefix = format!("/uploads/{}/", self.name);
        url.strip_prefix(&format!("{}/", self.base_url))
            .or_else(|| url.strip_prefix(relative_prefix.as_str()))
            .filter(|p| !p.is_empty())
            .map(str::to_string)
    }
}

lazy_static::lazy_static! {
    pub static ref PROPERTY_IMAGES: LocalBucket = LocalBucket::new(PROPERTIES_BUCKET, &SITE);
    pub static ref AVATARS: LocalBucket = LocalBucket::new(AVATARS_BUCKET, &SITE);
}

/// Keeps ASCII letters, digits, `.`, `-` and `_` of the last path segment.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned.to_string()
    }
}

/// `<agent_id>/<uuid>-<sanitized name>`
pub fn property_image_path(agent_id: Uuid, file_name: &str) -> String {
    format!(
        "{}/{}-{}",
        agent_id,
        Uuid::new_v4(),
        sanitize_file_name(file_name)
    )
}

/// `<uuid>.<ext>`
pub fn avatar_path(extension: &str) -> String {
    format!("{}.{}", Uuid::new_v4(), extension)
}

/// Content type by magic bytes; only JPEG, PNG, GIF and WebP are accepted.
pub fn detect_image_type(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [0x89, 0x50, 0x4E, 0x47, ..] => Some("image/png"),
        [0x47, 0x49, 0x46, 0x38, ..] => Some("image/gif"),
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Some("image/webp"),
        _ => None,
    }
}

pub fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

/// Deletes a row that owns stored images.
///
/// Issues one batched storage removal for the images that belong to `bucket`
/// (never more than one path per URL), ignores its outcome beyond a warning,
/// then runs `delete_row` exactly once.
pub async fn remove_with_images<F, Fut, T>(
    bucket: &dyn ObjectStore,
    image_urls: &[String],
    delete_row: F,
) -> Result<T, ApiError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let paths: Vec<String> = image_urls
        .iter()
        .filter_map(|url| bucket.path_from_url(url))
        .collect();

    if !paths.is_empty() {
        if let Err(e) = bucket.remove(&paths).await {
            tracing::warn!(count = paths.len(), error = %e, "failed to remove stored images");
        }
    }

    delete_row().await
}

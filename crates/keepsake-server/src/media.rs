//! Media ingestion and hosting.
//!
//! [`MediaStore`] plays the role of the external media host: it takes a staged
//! local file, stores the bytes under a generated name, and hands back a
//! durable URL. The same store serves those URLs via `GET /media/:name`, so a
//! URL returned from an upload always resolves against this server.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Debug)]
pub struct MediaStore {
    base_path: PathBuf,
    base_url: String,
    max_size: usize,
}

impl MediaStore {
    pub async fn new(
        base_path: PathBuf,
        base_url: &str,
        max_size: usize,
    ) -> Result<Self, ApiError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ApiError::Internal(format!(
                "Failed to create media directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Media store initialized");

        Ok(Self {
            base_path,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_size,
        })
    }

    /// Ingest a staged file and return its durable URL.
    ///
    /// The staged file at `src` is left in place; the caller owns its
    /// cleanup. Nothing is written if the file is empty or over the size cap.
    pub async fn ingest(&self, src: &Path, original_name: &str) -> Result<String, ApiError> {
        let data = fs::read(src).await.map_err(|e| {
            ApiError::Internal(format!(
                "Failed to read staged upload '{}': {}",
                src.display(),
                e
            ))
        })?;

        if data.is_empty() {
            return Err(ApiError::Validation("Empty upload".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ApiError::UploadTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let stored_name = format!("{}.{}", Uuid::new_v4(), sanitize_extension(original_name));
        let path = self.safe_media_path(&stored_name)?;

        fs::write(&path, &data).await.map_err(|e| {
            ApiError::Internal(format!("Failed to write media {}: {}", stored_name, e))
        })?;

        debug!(name = %stored_name, size = data.len(), "Stored media file");
        Ok(format!("{}/media/{}", self.base_url, stored_name))
    }

    /// Resolve a stored name back to its bytes and a content type.
    pub async fn open(&self, name: &str) -> Result<(Vec<u8>, &'static str), ApiError> {
        let path = self.safe_media_path(name)?;

        if !path.exists() {
            return Err(ApiError::NotFound(format!("Media not found: {}", name)));
        }

        let data = fs::read(&path)
            .await
            .map_err(|e| ApiError::Internal(format!("Failed to read media {}: {}", name, e)))?;

        debug!(name = %name, size = data.len(), "Retrieved media file");
        Ok((data, content_type_for(name)))
    }

    /// Build a path under the media directory, rejecting traversal attempts.
    fn safe_media_path(&self, name: &str) -> Result<PathBuf, ApiError> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(ApiError::Validation("Path traversal detected".to_string()));
        }
        Ok(self.base_path.join(name))
    }
}

/// Normalize the extension of an uploaded file name: lowercase alphanumeric,
/// at most 8 chars, `bin` when absent or unusable.
fn sanitize_extension(original_name: &str) -> String {
    let ext: String = original_name
        .rsplit('.')
        .next()
        .unwrap_or("")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect::<String>()
        .to_ascii_lowercase();

    if ext.is_empty() || !original_name.contains('.') {
        "bin".to_string()
    } else {
        ext
    }
}

fn content_type_for(name: &str) -> &'static str {
    match name.rsplit('.').next().unwrap_or("") {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

use std::path::{Component, Path, PathBuf};

use tandem_shared::api::UploadResponse;
use tandem_shared::validation::validate_upload_mime;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ServerError;

/// Verify that a resolved path stays within the expected base directory.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ServerError> {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target.strip_prefix(base).unwrap_or(target).components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::ParentDir => {
                return Err(ServerError::BadRequest("Invalid file name".to_string()));
            }
            _ => {}
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(ServerError::BadRequest("Invalid file name".to_string()));
    }
    Ok(resolved)
}

/// Stored names are `<uuid>.<ext>`; anything else is refused before it
/// touches the filesystem.
fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

/// Uploaded images and videos, kept as flat files under one directory.
#[derive(Debug, Clone)]
pub struct MediaStore {
    base_path: PathBuf,
    public_url: String,
    max_size: usize,
}

impl MediaStore {
    pub async fn new(
        base_path: PathBuf,
        public_url: impl Into<String>,
        max_size: usize,
    ) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::Storage(format!(
                "Failed to create upload directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Media store initialized");

        Ok(Self {
            base_path,
            public_url: public_url.into().trim_end_matches('/').to_string(),
            max_size,
        })
    }

    /// Persist one upload and describe where it can be fetched.
    pub async fn store(
        &self,
        original_name: Option<&str>,
        mimetype: &str,
        data: &[u8],
    ) -> Result<UploadResponse, ServerError> {
        if data.is_empty() {
            return Err(ServerError::BadRequest("Empty file".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::PayloadTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }
        validate_upload_mime(mimetype)?;

        let ext = extension_for(mimetype);
        let filename = format!("{}.{}", Uuid::new_v4(), ext);
        let path = self.safe_path(&filename)?;

        fs::write(&path, data).await.map_err(|e| {
            ServerError::Storage(format!("Failed to write upload {}: {}", filename, e))
        })?;

        debug!(
            file = %filename,
            original = original_name.unwrap_or_default(),
            size = data.len(),
            mime = %mimetype,
            "Stored upload"
        );

        Ok(UploadResponse {
            url: format!("{}/uploads/{}", self.public_url, filename),
            filename,
            size: data.len() as u64,
            mimetype: mimetype.to_string(),
        })
    }

    /// Read a stored file back along with the content type to serve it as.
    pub async fn open(&self, name: &str) -> Result<(Vec<u8>, &'static str), ServerError> {
        if !is_safe_name(name) {
            return Err(ServerError::NotFound("File"));
        }
        let path = self.safe_path(name)?;
        if !path.exists() {
            return Err(ServerError::NotFound("File"));
        }

        let data = fs::read(&path)
            .await
            .map_err(|e| ServerError::Storage(format!("Failed to read upload {}: {}", name, e)))?;

        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        Ok((data, mime_for_extension(ext)))
    }

    fn safe_path(&self, name: &str) -> Result<PathBuf, ServerError> {
        ensure_within(&self.base_path, &self.base_path.join(name))
    }
}

/// Extension for a stored upload, derived from the validated MIME type only.
/// The client's file name never reaches the filesystem.
fn extension_for(mimetype: &str) -> String {
    let subtype = mimetype
        .split(';')
        .next()
        .and_then(|m| m.trim().split('/').nth(1))
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match subtype.as_str() {
        "jpeg" | "pjpeg" => "jpg".to_string(),
        "quicktime" => "mov".to_string(),
        "svg+xml" => "svg".to_string(),
        sub if !sub.is_empty() && sub.len() <= 8 && sub.chars().all(|c| c.is_ascii_alphanumeric()) => {
            sub.to_string()
        }
        _ => "bin".to_string(),
    }
}

/// Types that can carry script and must not render inline from the API
/// origin.
pub fn is_active_content(mime: &str) -> bool {
    mime == "image/svg+xml"
}

fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "ogg" | "ogv" => "video/ogg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (MediaStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = MediaStore::new(dir.path().to_path_buf(), "http://localhost:5000/", 1024)
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_store_and_open() {
        let (store, _dir) = test_store().await;
        let uploaded = store
            .store(Some("Cat.PNG"), "image/png", b"png-bytes")
            .await
            .unwrap();

        assert!(uploaded.filename.ends_with(".png"));
        assert_eq!(
            uploaded.url,
            format!("http://localhost:5000/uploads/{}", uploaded.filename)
        );
        assert_eq!(uploaded.size, 9);
        assert_eq!(uploaded.mimetype, "image/png");

        let (data, mime) = store.open(&uploaded.filename).await.unwrap();
        assert_eq!(data, b"png-bytes");
        assert_eq!(mime, "image/png");
    }

    #[tokio::test]
    async fn test_extension_from_mime() {
        let (store, _dir) = test_store().await;
        let uploaded = store.store(None, "video/mp4", b"mp4").await.unwrap();
        assert!(uploaded.filename.ends_with(".mp4"));
    }

    #[tokio::test]
    async fn test_extension_ignores_client_name() {
        let (store, _dir) = test_store().await;
        let uploaded = store
            .store(Some("x.html"), "image/png", b"png")
            .await
            .unwrap();
        assert!(uploaded.filename.ends_with(".png"));

        let svg = store
            .store(Some("logo"), "image/svg+xml", b"<svg/>")
            .await
            .unwrap();
        assert!(svg.filename.ends_with(".svg"));
        let (_, mime) = store.open(&svg.filename).await.unwrap();
        assert!(is_active_content(mime));
        assert!(!is_active_content("image/png"));
    }

    #[tokio::test]
    async fn test_rejects_oversized_and_wrong_type() {
        let (store, _dir) = test_store().await;
        assert!(matches!(
            store.store(None, "image/png", &[0u8; 2048]).await,
            Err(ServerError::PayloadTooLarge { size: 2048, max: 1024 })
        ));
        assert!(matches!(
            store.store(Some("a.html"), "text/html", b"<p>").await,
            Err(ServerError::UnsupportedMediaType(_))
        ));
        assert!(store.store(None, "image/png", b"").await.is_err());
    }

    #[tokio::test]
    async fn test_traversal_and_missing() {
        let (store, _dir) = test_store().await;
        assert!(matches!(
            store.open("../etc/passwd").await,
            Err(ServerError::NotFound(_))
        ));
        assert!(matches!(
            store.open("missing.png").await,
            Err(ServerError::NotFound(_))
        ));
    }
}

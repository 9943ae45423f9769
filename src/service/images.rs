//! Persistence for model-generated images.
//!
//! `inlineData` response parts are written under a configured directory with
//! uuid filenames; the router serves the directory at `/images/`.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

#[derive(Clone)]
pub struct ImageStorage {
    dir: PathBuf,
}

impl ImageStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn extension_for(mime_type: &str) -> &'static str {
        match mime_type {
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }

    /// Decode and store one base64 payload; returns the public URL path.
    /// Failures are logged and swallowed; a missing image should never kill
    /// the response that carried it.
    pub async fn save_base64(&self, mime_type: &str, data: &str) -> Option<String> {
        let bytes = match STANDARD.decode(data) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("generated image payload is not valid base64: {e}");
                return None;
            }
        };

        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            warn!("image dir creation failed: {e}");
            return None;
        }

        let filename = format!("{}.{}", Uuid::new_v4(), Self::extension_for(mime_type));
        let path = self.dir.join(&filename);
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => Some(format!("/images/{filename}")),
            Err(e) => {
                warn!("image write failed for {}: {e}", path.display());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn saves_and_names_by_mime() {
        let dir = std::env::temp_dir().join(format!("castor-img-{}", Uuid::new_v4()));
        let storage = ImageStorage::new(&dir);

        let url = storage.save_base64("image/png", "aGVsbG8=").await.unwrap();
        assert!(url.starts_with("/images/"));
        assert!(url.ends_with(".png"));

        let name = url.strip_prefix("/images/").unwrap();
        let stored = tokio::fs::read(dir.join(name)).await.unwrap();
        assert_eq!(stored, b"hello");

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn invalid_base64_is_swallowed() {
        let dir = std::env::temp_dir().join(format!("castor-img-{}", Uuid::new_v4()));
        let storage = ImageStorage::new(&dir);
        assert!(storage.save_base64("image/png", "!!!").await.is_none());
    }
}

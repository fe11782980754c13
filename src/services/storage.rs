// src/services/storage.rs
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::{debug, info};
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::errors::AtelierError;

/// Blob store contract consumed by the generators and the upload flow.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Stores `bytes` under `key` and returns the public URL.
    async fn upload(&self, bytes: Bytes, key: &str, content_type: &str)
    -> Result<String, AtelierError>;

    async fn delete(&self, key: &str) -> Result<bool, AtelierError>;

    async fn exists(&self, key: &str) -> Result<bool, AtelierError>;
}

pub fn preview_image_key(configuration_id: Uuid, job_id: Uuid) -> String {
    format!("ai-previews/{}/{}/preview.png", configuration_id, job_id)
}

pub fn preview_frame_key(configuration_id: Uuid, job_id: Uuid, index: u32) -> String {
    format!(
        "ai-previews/{}/{}/frames/frame_{:02}.png",
        configuration_id, job_id, index
    )
}

pub fn upgrade_image_key(at: DateTime<Utc>, random_id: &str, extension: &str) -> String {
    format!("upgrade-images/{}/{}{}", at.format("%Y/%m/%d"), random_id, extension)
}

pub fn upgrade_preview_key(analysis_id: Uuid, job_id: Uuid) -> String {
    format!("upgrade-previews/{}/{}/enhanced.png", analysis_id, job_id)
}

/// Keys are relative, slash-separated paths without traversal segments.
fn validate_key(key: &str) -> Result<(), AtelierError> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        return Err(AtelierError::Storage(format!("invalid object key '{}'", key)));
    }
    for component in Path::new(key).components() {
        if !matches!(component, Component::Normal(_)) {
            return Err(AtelierError::Storage(format!("invalid object key '{}'", key)));
        }
    }
    Ok(())
}

fn public_url(base_url: &str, key: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), key)
}

/// Filesystem-backed storage. Files are served back by the `/media` route.
#[derive(Debug, Clone)]
pub struct LocalObjectStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalObjectStorage {
    pub async fn new(root: PathBuf, public_base_url: String) -> Result<Self, AtelierError> {
        fs::create_dir_all(&root).await.map_err(|e| {
            AtelierError::Storage(format!(
                "Failed to create storage directory '{}': {}",
                root.display(),
                e
            ))
        })?;

        info!("Local object storage at {}", root.display());

        Ok(Self {
            root,
            public_base_url,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, AtelierError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn upload(
        &self,
        bytes: Bytes,
        key: &str,
        _content_type: &str,
    ) -> Result<String, AtelierError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AtelierError::Storage(format!("Failed to create {}: {}", key, e)))?;
        }

        fs::write(&path, &bytes)
            .await
            .map_err(|e| AtelierError::Storage(format!("Failed to write {}: {}", key, e)))?;

        debug!("Stored object {} ({} bytes)", key, bytes.len());
        Ok(public_url(&self.public_base_url, key))
    }

    async fn delete(&self, key: &str) -> Result<bool, AtelierError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AtelierError::Storage(format!(
                "Failed to delete {}: {}",
                key, e
            ))),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, AtelierError> {
        let path = self.path_for(key)?;
        fs::try_exists(&path)
            .await
            .map_err(|e| AtelierError::Storage(format!("Failed to stat {}: {}", key, e)))
    }
}

/// In-memory storage for tests.
pub struct MemoryObjectStorage {
    public_base_url: String,
    objects: Mutex<HashMap<String, (Bytes, String)>>,
}

impl MemoryObjectStorage {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            public_base_url: public_base_url.into(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<(Bytes, String)> {
        self.objects.lock().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn upload(
        &self,
        bytes: Bytes,
        key: &str,
        content_type: &str,
    ) -> Result<String, AtelierError> {
        validate_key(key)?;
        self.objects
            .lock()
            .await
            .insert(key.to_string(), (bytes, content_type.to_string()));
        Ok(public_url(&self.public_base_url, key))
    }

    async fn delete(&self, key: &str) -> Result<bool, AtelierError> {
        validate_key(key)?;
        Ok(self.objects.lock().await.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, AtelierError> {
        validate_key(key)?;
        Ok(self.objects.lock().await.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn key_layout() {
        let config = Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap();
        let job = Uuid::parse_str("22222222-2222-2222-2222-222222222222").unwrap();
        assert_eq!(
            preview_image_key(config, job),
            "ai-previews/11111111-1111-1111-1111-111111111111/22222222-2222-2222-2222-222222222222/preview.png"
        );
        assert!(preview_frame_key(config, job, 3).ends_with("/frames/frame_03.png"));
        assert!(preview_frame_key(config, job, 11).ends_with("/frames/frame_11.png"));

        let at = Utc.with_ymd_and_hms(2024, 3, 7, 12, 0, 0).unwrap();
        assert_eq!(
            upgrade_image_key(at, "abc123", ".jpg"),
            "upgrade-images/2024/03/07/abc123.jpg"
        );
    }

    #[test]
    fn traversal_keys_rejected() {
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("/abs/path").is_err());
        assert!(validate_key("a/../../b").is_err());
        assert!(validate_key("a\\b").is_err());
        assert!(validate_key("").is_err());
        assert!(validate_key("ai-previews/x/y/preview.png").is_ok());
    }

    #[tokio::test]
    async fn local_storage_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = LocalObjectStorage::new(
            dir.path().to_path_buf(),
            "http://localhost:8080/media/".to_string(),
        )
        .await
        .unwrap();

        let key = "ai-previews/c/j/preview.png";
        let url = storage
            .upload(Bytes::from_static(b"png-bytes"), key, "image/png")
            .await
            .unwrap();
        assert_eq!(url, "http://localhost:8080/media/ai-previews/c/j/preview.png");
        assert!(storage.exists(key).await.unwrap());
        assert_eq!(
            std::fs::read(dir.path().join(key)).unwrap(),
            b"png-bytes".to_vec()
        );

        assert!(storage.delete(key).await.unwrap());
        assert!(!storage.delete(key).await.unwrap());
        assert!(!storage.exists(key).await.unwrap());
    }

    #[tokio::test]
    async fn memory_storage_tracks_objects() {
        let storage = MemoryObjectStorage::new("http://cdn");
        let url = storage
            .upload(Bytes::from_static(b"x"), "a/b.png", "image/png")
            .await
            .unwrap();
        assert_eq!(url, "http://cdn/a/b.png");
        assert_eq!(storage.keys().await, vec!["a/b.png".to_string()]);
        assert!(storage.upload(Bytes::new(), "../x", "image/png").await.is_err());
    }
}

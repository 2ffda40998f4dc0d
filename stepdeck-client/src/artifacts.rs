//! Execution artifacts in object storage
//!
//! Pipelines write their outputs under `<output_directory>/<run>/`. The console
//! only lists and downloads them; contents are opaque bytes.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Invalid artifact root '{0}'")]
    InvalidRoot(String),

    #[error("Artifact '{0}' not found")]
    NotFound(String),

    #[error("Object store error: {0}")]
    Store(#[from] object_store::Error),
}

/// One stored artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Read access to the artifact bucket or directory
#[derive(Clone)]
pub struct ArtifactStore {
    store: Arc<dyn ObjectStore>,
    root: String,
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ArtifactStore<{}>", self.root)
    }
}

impl ArtifactStore {
    /// Opens `s3://bucket` (credentials from the AWS environment) or a local directory
    pub fn open(root: &str) -> Result<Self, ArtifactError> {
        let store: Arc<dyn ObjectStore> = if let Some(bucket) = root.strip_prefix("s3://") {
            let bucket = bucket.trim_end_matches('/');
            if bucket.is_empty() || bucket.contains('/') {
                return Err(ArtifactError::InvalidRoot(root.to_string()));
            }
            Arc::new(
                AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .build()?,
            )
        } else {
            let path = root.strip_prefix("file://").unwrap_or(root);
            if path.is_empty() {
                return Err(ArtifactError::InvalidRoot(root.to_string()));
            }
            Arc::new(LocalFileSystem::new_with_prefix(path)?)
        };

        Ok(Self::with_store(store, root))
    }

    pub fn with_store(store: Arc<dyn ObjectStore>, root: impl Into<String>) -> Self {
        Self {
            store,
            root: root.into(),
        }
    }

    /// Artifacts under `prefix`, newest first
    pub async fn list(&self, prefix: &str) -> Result<Vec<ArtifactEntry>, ArtifactError> {
        let prefix = Path::from(prefix.trim_matches('/'));
        let mut entries: Vec<ArtifactEntry> = self
            .store
            .list(Some(&prefix))
            .map_ok(|meta| ArtifactEntry {
                key: meta.location.to_string(),
                size: meta.size as u64,
                last_modified: meta.last_modified,
            })
            .try_collect()
            .await?;

        entries.sort_by(|a, b| {
            b.last_modified
                .cmp(&a.last_modified)
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(entries)
    }

    pub async fn get(&self, key: &str) -> Result<Bytes, ArtifactError> {
        let path = Path::from(key);
        match self.store.get(&path).await {
            Ok(result) => Ok(result.bytes().await?),
            Err(object_store::Error::NotFound { .. }) => Err(ArtifactError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lists_and_reads_local_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let run = dir.path().join("reviews/run_1");
        std::fs::create_dir_all(&run).unwrap();
        std::fs::write(run.join("summary.json"), br#"{"ok": true}"#).unwrap();
        std::fs::write(run.join("report.csv"), b"id,score\n42,0.9\n").unwrap();
        std::fs::create_dir_all(dir.path().join("reviews/run_2")).unwrap();
        std::fs::write(dir.path().join("reviews/run_2/other.json"), b"{}").unwrap();

        let store = ArtifactStore::open(dir.path().to_str().unwrap()).unwrap();

        let entries = store.list("reviews/run_1/").await.unwrap();
        let mut keys: Vec<_> = entries.iter().map(|e| e.key.as_str()).collect();
        keys.sort();
        assert_eq!(keys, vec!["reviews/run_1/report.csv", "reviews/run_1/summary.json"]);

        let bytes = store.get("reviews/run_1/summary.json").await.unwrap();
        assert_eq!(&bytes[..], br#"{"ok": true}"#);
    }

    #[tokio::test]
    async fn test_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path().to_str().unwrap()).unwrap();

        assert!(store.list("nothing/here").await.unwrap().is_empty());
        assert!(matches!(
            store.get("nothing/here.json").await,
            Err(ArtifactError::NotFound(_))
        ));
    }

    #[test]
    fn test_rejects_invalid_roots() {
        assert!(matches!(
            ArtifactStore::open("s3://"),
            Err(ArtifactError::InvalidRoot(_))
        ));
        assert!(matches!(
            ArtifactStore::open(""),
            Err(ArtifactError::InvalidRoot(_))
        ));
    }
}

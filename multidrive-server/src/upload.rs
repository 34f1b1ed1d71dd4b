//! Server half of the multipart protocol.
//!
//! Validates requests and forwards each one exactly once to the drive's
//! backend. Backend errors come back untouched for the API layer to map.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use tracing::info;

use multidrive_common::backend::ObjectBackend;
use multidrive_common::error::{StorageError, StorageResult};
use multidrive_common::types::{
    normalize_key, CompletedUpload, CreatedUpload, MultipartOptions, PartResult, UploadedPart,
};

pub struct UploadCoordinator {
    backend: Arc<dyn ObjectBackend>,
}

impl UploadCoordinator {
    pub fn new(backend: Arc<dyn ObjectBackend>) -> Self {
        Self { backend }
    }

    pub async fn begin(&self, key: &str, opts: &MultipartOptions) -> StorageResult<CreatedUpload> {
        require_key(key)?;
        let created = self.backend.create_multipart_upload(key, opts).await?;
        info!(key = %key, kind = %self.backend.kind(), size = ?opts.content_length, "Multipart upload started");
        Ok(created)
    }

    pub async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> StorageResult<UploadedPart> {
        require_key(key)?;
        require_upload_id(upload_id)?;
        if part_number < 1 {
            return Err(StorageError::InvalidInput("partNumber must be at least 1".into()));
        }
        self.backend
            .resume_multipart_upload(key, upload_id)
            .upload_part(part_number, body)
            .await
    }

    pub async fn complete(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[PartResult],
    ) -> StorageResult<CompletedUpload> {
        require_key(key)?;
        require_upload_id(upload_id)?;
        if parts.is_empty() {
            return Err(StorageError::InvalidInput("parts must not be empty".into()));
        }
        let mut seen = HashSet::new();
        for part in parts {
            if part.part_number < 1 {
                return Err(StorageError::InvalidInput("partNumber must be at least 1".into()));
            }
            if !seen.insert(part.part_number) {
                return Err(StorageError::InvalidInput(format!(
                    "part {} listed twice",
                    part.part_number
                )));
            }
        }
        let done = self
            .backend
            .resume_multipart_upload(key, upload_id)
            .complete(parts)
            .await?;
        info!(key = %key, parts = parts.len(), "Multipart upload complete");
        Ok(done)
    }
}

fn require_key(key: &str) -> StorageResult<()> {
    if normalize_key(key).is_empty() {
        return Err(StorageError::InvalidInput("object key must not be empty".into()));
    }
    Ok(())
}

fn require_upload_id(upload_id: &str) -> StorageResult<()> {
    if upload_id.trim().is_empty() {
        return Err(StorageError::InvalidInput("uploadId must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use multidrive_common::backend::BackendKind;
    use multidrive_common::types::{
        ListOptions, ListPage, ObjectBody, ObjectStat, PutOptions, PutResult,
    };

    use crate::backend::directory::DirectoryBucket;

    /// Directory bucket that counts multipart calls reaching it.
    struct Counting {
        inner: DirectoryBucket,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ObjectBackend for Counting {
        fn kind(&self) -> BackendKind {
            BackendKind::Native
        }
        async fn list(&self, opts: &ListOptions) -> StorageResult<ListPage> {
            self.inner.list(opts).await
        }
        async fn head(&self, key: &str) -> StorageResult<Option<ObjectStat>> {
            self.inner.head(key).await
        }
        async fn get(&self, key: &str) -> StorageResult<Option<ObjectBody>> {
            self.inner.get(key).await
        }
        async fn put(&self, key: &str, body: Bytes, opts: &PutOptions) -> StorageResult<PutResult> {
            self.inner.put(key, body, opts).await
        }
        async fn delete(&self, key: &str) -> StorageResult<()> {
            self.inner.delete(key).await
        }
        async fn copy_object(&self, src: &str, dst: &str) -> StorageResult<()> {
            self.inner.copy_object(src, dst).await
        }
        async fn create_multipart_upload(
            &self,
            key: &str,
            opts: &MultipartOptions,
        ) -> StorageResult<CreatedUpload> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.create_multipart_upload(key, opts).await
        }
        async fn upload_part(
            &self,
            key: &str,
            upload_id: &str,
            part_number: u32,
            body: Bytes,
        ) -> StorageResult<UploadedPart> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.upload_part(key, upload_id, part_number, body).await
        }
        async fn complete_multipart_upload(
            &self,
            key: &str,
            upload_id: &str,
            parts: &[PartResult],
        ) -> StorageResult<CompletedUpload> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.complete_multipart_upload(key, upload_id, parts).await
        }
    }

    fn coordinator(dir: &std::path::Path) -> (UploadCoordinator, Arc<Counting>) {
        let backend = Arc::new(Counting {
            inner: DirectoryBucket::new(dir),
            calls: AtomicUsize::new(0),
        });
        (UploadCoordinator::new(backend.clone()), backend)
    }

    #[tokio::test]
    async fn test_forwards_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let (coord, backend) = coordinator(dir.path());

        let created = coord.begin("a/b.bin", &MultipartOptions::default()).await.unwrap();
        let part = coord
            .upload_part("a/b.bin", &created.upload_id, 1, Bytes::from("data"))
            .await
            .unwrap();
        coord
            .complete(
                "a/b.bin",
                &created.upload_id,
                &[PartResult { part_number: 1, etag: part.etag }],
            )
            .await
            .unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert_eq!(backend.head("a/b.bin").await.unwrap().unwrap().size, 4);
    }

    #[tokio::test]
    async fn test_rejects_invalid_requests_before_backend() {
        let dir = tempfile::tempdir().unwrap();
        let (coord, backend) = coordinator(dir.path());

        assert!(coord.begin("/", &MultipartOptions::default()).await.is_err());
        assert!(coord.upload_part("k", "id", 0, Bytes::from("x")).await.is_err());
        assert!(coord.upload_part("k", " ", 1, Bytes::from("x")).await.is_err());
        assert!(coord.complete("k", "id", &[]).await.is_err());
        let dup = [
            PartResult { part_number: 1, etag: "a".into() },
            PartResult { part_number: 1, etag: "b".into() },
        ];
        let err = coord.complete("k", "id", &dup).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_backend_errors_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let (coord, _backend) = coordinator(dir.path());
        let err = coord
            .upload_part("k", "0000-unknown", 1, Bytes::from("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SessionInvalid(_)));
    }
}

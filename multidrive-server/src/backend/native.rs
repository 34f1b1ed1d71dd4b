use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use multidrive_common::backend::{BackendKind, ObjectBackend};
use multidrive_common::error::StorageResult;
use multidrive_common::types::{
    CompletedUpload, CreatedUpload, ListOptions, ListPage, MultipartOptions, ObjectBody,
    ObjectStat, PartResult, PutOptions, PutResult, UploadedPart,
};

/// Platform bindings available to this process, by binding name.
#[derive(Clone, Default)]
pub struct NativeBindings {
    bindings: HashMap<String, Arc<dyn ObjectBackend>>,
}

impl NativeBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, binding: Arc<dyn ObjectBackend>) {
        self.bindings.insert(name.into(), binding);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ObjectBackend>> {
        self.bindings.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Forwards every call to the named binding unchanged.
pub struct NativeObjectBackend {
    binding_name: String,
    inner: Arc<dyn ObjectBackend>,
}

impl NativeObjectBackend {
    pub fn new(binding_name: impl Into<String>, inner: Arc<dyn ObjectBackend>) -> Self {
        Self {
            binding_name: binding_name.into(),
            inner,
        }
    }
}

#[async_trait]
impl ObjectBackend for NativeObjectBackend {
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
        debug!(binding = %self.binding_name, key = %key, size = body.len(), "Native put");
        self.inner.put(key, body, opts).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        debug!(binding = %self.binding_name, key = %key, "Native delete");
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
        debug!(binding = %self.binding_name, key = %key, "Native multipart upload");
        self.inner.create_multipart_upload(key, opts).await
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> StorageResult<UploadedPart> {
        self.inner.upload_part(key, upload_id, part_number, body).await
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[PartResult],
    ) -> StorageResult<CompletedUpload> {
        self.inner.complete_multipart_upload(key, upload_id, parts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::directory::DirectoryBucket;

    #[tokio::test]
    async fn test_native_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let mut bindings = NativeBindings::new();
        bindings.insert("BUCKET", Arc::new(DirectoryBucket::new(dir.path())));
        assert!(bindings.contains("BUCKET"));
        assert_eq!(bindings.names(), vec!["BUCKET".to_string()]);

        let native = NativeObjectBackend::new("BUCKET", bindings.get("BUCKET").unwrap());
        assert_eq!(native.kind(), BackendKind::Native);
        native.put("k.txt", Bytes::from("v"), &PutOptions::default()).await.unwrap();
        assert!(native.head("k.txt").await.unwrap().is_some());
        assert!(native.head("other.txt").await.unwrap().is_none());
        assert!(dir.path().join("k.txt").exists());
    }
}

use bytes::Bytes;

use crate::error::StorageResult;
use crate::types::{
    CompletedUpload, CreatedUpload, ListOptions, ListPage, MultipartOptions, ObjectBody,
    ObjectStat, PartResult, PutOptions, PutResult, UploadedPart,
};

/// Which family of wire protocol a backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[serde(alias = "r2")]
    Native,
    #[serde(alias = "s3")]
    Rest,
    #[serde(alias = "onedrive")]
    Session,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BackendKind::Native => "native",
            BackendKind::Rest => "rest",
            BackendKind::Session => "session",
        };
        f.write_str(s)
    }
}

/// Trait implemented by all object storage backends.
///
/// Every backend answers the same contract regardless of wire protocol.
/// `head` and `get` return `Ok(None)` for a missing key and an error for
/// everything else; `delete` of a missing key succeeds. Filtering of
/// reserved keys is left to callers.
#[async_trait::async_trait]
pub trait ObjectBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// List objects and delimited prefixes under `opts.prefix`.
    async fn list(&self, opts: &ListOptions) -> StorageResult<ListPage>;

    async fn head(&self, key: &str) -> StorageResult<Option<ObjectStat>>;

    async fn get(&self, key: &str) -> StorageResult<Option<ObjectBody>>;

    async fn put(&self, key: &str, body: Bytes, opts: &PutOptions) -> StorageResult<PutResult>;

    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Copy `src` to `dst` inside the same backend.
    async fn copy_object(&self, src: &str, dst: &str) -> StorageResult<()>;

    async fn create_multipart_upload(
        &self,
        key: &str,
        opts: &MultipartOptions,
    ) -> StorageResult<CreatedUpload>;

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> StorageResult<UploadedPart>;

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[PartResult],
    ) -> StorageResult<CompletedUpload>;
}

impl<'b> dyn ObjectBackend + 'b {
    /// Reattach to an upload session created earlier, possibly by another request.
    pub fn resume_multipart_upload<'a>(
        &'a self,
        key: &str,
        upload_id: &str,
    ) -> MultipartUpload<'a> {
        MultipartUpload {
            backend: self,
            key: key.to_string(),
            upload_id: upload_id.to_string(),
        }
    }
}

/// Handle binding a key and upload id to the backend that owns the session.
pub struct MultipartUpload<'a> {
    backend: &'a dyn ObjectBackend,
    key: String,
    upload_id: String,
}

impl MultipartUpload<'_> {
    pub async fn upload_part(&self, part_number: u32, body: Bytes) -> StorageResult<UploadedPart> {
        self.backend
            .upload_part(&self.key, &self.upload_id, part_number, body)
            .await
    }

    pub async fn complete(&self, parts: &[PartResult]) -> StorageResult<CompletedUpload> {
        self.backend
            .complete_multipart_upload(&self.key, &self.upload_id, parts)
            .await
    }
}

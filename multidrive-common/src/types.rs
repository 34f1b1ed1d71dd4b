use std::collections::BTreeMap;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Key suffix marking an otherwise empty directory.
pub const FOLDER_MARKER_SUFFIX: &str = "_$folder$";

pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

// ── Object metadata ──

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStat {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub custom_metadata: BTreeMap<String, String>,
}

impl ObjectStat {
    pub fn new(key: impl Into<String>, size: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified,
            content_type: None,
            custom_metadata: BTreeMap::new(),
        }
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type.filter(|s| !s.is_empty());
        self
    }
}

/// One page of a listing. `cursor` is backend-specific and must only be
/// handed back to the same backend's `list`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListPage {
    pub objects: Vec<ObjectStat>,
    pub common_prefixes: Vec<String>,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListOptions {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub cursor: Option<String>,
}

impl ListOptions {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Default::default()
        }
    }

    pub fn delimited(prefix: impl Into<String>, delimiter: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            delimiter: Some(delimiter.into()),
            cursor: None,
        }
    }

    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }
}

// ── Reads and writes ──

pub struct ObjectBody {
    pub stat: ObjectStat,
    pub body: ByteStream,
}

impl std::fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectBody").field("stat", &self.stat).finish_non_exhaustive()
    }
}

impl ObjectBody {
    /// Drain the body into memory.
    pub async fn into_bytes(self) -> StorageResult<Bytes> {
        collect_stream(self.body).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub custom_metadata: BTreeMap<String, String>,
    /// Declared length when the caller knows it ahead of the body.
    pub content_length: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PutResult {
    pub key: String,
    pub size: u64,
    pub uploaded: DateTime<Utc>,
}

// ── Multipart ──

#[derive(Debug, Clone, Default)]
pub struct MultipartOptions {
    pub content_type: Option<String>,
    pub custom_metadata: BTreeMap<String, String>,
    /// Total object size; required by backends whose sessions are range based.
    pub content_length: Option<u64>,
    pub chunk_size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreatedUpload {
    pub key: String,
    pub upload_id: String,
    /// Part size the session is bound to, when the backend dictates one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
    /// Parts must arrive in ascending order, one at a time.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sequential: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadedPart {
    pub etag: String,
}

/// A part the backend has acknowledged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PartResult {
    pub part_number: u32,
    pub etag: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletedUpload {
    pub etag: String,
}

/// JSON body of the completion call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompleteRequest {
    pub parts: Vec<PartResult>,
}

/// Return `parts` ordered by part number, the order every backend expects.
pub fn sorted_parts(parts: &[PartResult]) -> Vec<PartResult> {
    let mut sorted = parts.to_vec();
    sorted.sort_by_key(|p| p.part_number);
    sorted
}

// ── Streams ──

pub async fn collect_stream(mut stream: ByteStream) -> StorageResult<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Adapt a reqwest body into a `ByteStream`.
pub fn response_stream(resp: reqwest::Response) -> ByteStream {
    Box::pin(resp.bytes_stream().map(|r| r.map_err(StorageError::from)))
}

/// Strip leading/trailing slashes.
pub fn normalize_key(key: &str) -> &str {
    key.trim_matches('/')
}

pub fn is_folder_marker(key: &str) -> bool {
    normalize_key(key).ends_with(FOLDER_MARKER_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_stream(data: Bytes) -> ByteStream {
        Box::pin(futures_util::stream::once(async move { Ok(data) }))
    }

    #[test]
    fn test_sorted_parts() {
        let parts = vec![
            PartResult { part_number: 3, etag: "c".into() },
            PartResult { part_number: 1, etag: "a".into() },
            PartResult { part_number: 2, etag: "b".into() },
        ];
        let sorted = sorted_parts(&parts);
        let numbers: Vec<u32> = sorted.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_part_result_wire_format() {
        let json = serde_json::to_value(PartResult { part_number: 2, etag: "\"abc\"".into() }).unwrap();
        assert_eq!(json, serde_json::json!({ "partNumber": 2, "etag": "\"abc\"" }));

        let req: CompleteRequest =
            serde_json::from_str(r#"{"parts":[{"partNumber":1,"etag":"x"}]}"#).unwrap();
        assert_eq!(req.parts[0].part_number, 1);
    }

    #[test]
    fn test_folder_marker() {
        assert!(is_folder_marker("photos/2024_$folder$"));
        assert!(is_folder_marker("/photos_$folder$/"));
        assert!(!is_folder_marker("photos/2024/a.jpg"));
    }

    #[tokio::test]
    async fn test_collect_stream() {
        let body = ObjectBody {
            stat: ObjectStat::new("k", 5, Utc::now()),
            body: bytes_stream(Bytes::from_static(b"hello")),
        };
        assert_eq!(body.into_bytes().await.unwrap(), Bytes::from_static(b"hello"));
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use tracing::debug;

use multidrive_common::error::StorageError;
use multidrive_common::types::{
    normalize_key, CompleteRequest, MultipartOptions, PutOptions, PutResult,
};

use super::ApiError;
use crate::state::{header_str, AppState};
use crate::upload::UploadCoordinator;

pub const THUMBNAIL_HEADER: &str = "fd-thumbnail";
pub const CONTENT_LENGTH_HEADER: &str = "x-content-length";
pub const CHUNK_SIZE_HEADER: &str = "x-chunk-size";
pub const COPY_SOURCE_HEADER: &str = "x-amz-copy-source";

#[derive(Deserialize, Default)]
pub struct WriteQuery {
    pub uploads: Option<String>,
    #[serde(rename = "uploadId")]
    pub upload_id: Option<String>,
    #[serde(rename = "partNumber")]
    pub part_number: Option<String>,
}

// ── POST /api/write/items/{*path} ──

/// `?uploads` begins a multipart upload, `?uploadId=` completes one.
pub async fn post_item(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(query): Query<WriteQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let drive = state.drive(&headers).await?;
    let coordinator = UploadCoordinator::new(drive.backend);

    if query.uploads.is_some() {
        let opts = MultipartOptions {
            content_type: Some(content_type(&headers, &path)),
            custom_metadata: custom_metadata(&headers),
            content_length: numeric_header(&headers, CONTENT_LENGTH_HEADER)?,
            chunk_size: numeric_header(&headers, CHUNK_SIZE_HEADER)?,
        };
        let created = coordinator.begin(&path, &opts).await?;
        return Ok((StatusCode::OK, Json(created)).into_response());
    }

    if let Some(upload_id) = query.upload_id {
        let req: CompleteRequest = serde_json::from_slice(&body)
            .map_err(|e| StorageError::InvalidInput(format!("invalid completion body: {}", e)))?;
        let done = coordinator.complete(&path, &upload_id, &req.parts).await?;
        return Ok(etag_response(done.etag));
    }

    Err(StorageError::InvalidInput("expected ?uploads or ?uploadId".into()).into())
}

// ── PUT /api/write/items/{*path} ──

/// `?partNumber=&uploadId=` uploads one part; otherwise a one-shot put, or a
/// server-side copy when `x-amz-copy-source` is present.
pub async fn put_item(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(query): Query<WriteQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let drive = state.drive(&headers).await?;

    if let Some(upload_id) = query.upload_id {
        let part_number = parse_part_number(query.part_number.as_deref())?;
        let part = UploadCoordinator::new(drive.backend)
            .upload_part(&path, &upload_id, part_number, body)
            .await?;
        return Ok(etag_response(part.etag));
    }

    let key = normalize_key(&path).to_string();
    if key.is_empty() {
        return Err(StorageError::InvalidInput("object key must not be empty".into()).into());
    }

    if let Some(source) = header_str(&headers, COPY_SOURCE_HEADER) {
        let source = urlencoding::decode(source)
            .map_err(|e| StorageError::InvalidInput(format!("invalid copy source: {}", e)))?;
        let source = normalize_key(&source).to_string();
        debug!(drive = %drive.drive_id, src = %source, dst = %key, "Copying object");
        drive.backend.copy_object(&source, &key).await?;
        let stat = drive
            .backend
            .head(&key)
            .await?
            .ok_or_else(|| StorageError::NotFound(key.clone()))?;
        return Ok(Json(PutResult {
            key: stat.key,
            size: stat.size,
            uploaded: stat.last_modified,
        })
        .into_response());
    }

    let opts = PutOptions {
        content_type: Some(content_type(&headers, &key)),
        custom_metadata: custom_metadata(&headers),
        content_length: Some(body.len() as u64),
    };
    let result = drive.backend.put(&key, body, &opts).await?;
    Ok(Json(result).into_response())
}

// ── DELETE /api/write/items/{*path} ──

pub async fn delete_item(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let key = normalize_key(&path);
    if key.is_empty() {
        return Err(StorageError::InvalidInput("object key must not be empty".into()).into());
    }
    let drive = state.drive(&headers).await?;
    drive.backend.delete(key).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn etag_response(etag: String) -> Response {
    (StatusCode::OK, [(header::ETAG, etag)]).into_response()
}

fn parse_part_number(raw: Option<&str>) -> Result<u32, StorageError> {
    let raw = raw.ok_or_else(|| StorageError::InvalidInput("partNumber is required".into()))?;
    raw.trim()
        .parse::<u32>()
        .map_err(|_| StorageError::InvalidInput(format!("invalid partNumber '{}'", raw)))
}

fn numeric_header(headers: &HeaderMap, name: &str) -> Result<Option<u64>, StorageError> {
    header_str(headers, name)
        .map(|v| {
            v.parse::<u64>()
                .map_err(|_| StorageError::InvalidInput(format!("invalid {} '{}'", name, v)))
        })
        .transpose()
}

/// Request content type, else a guess from the key's extension.
fn content_type(headers: &HeaderMap, key: &str) -> String {
    header_str(headers, header::CONTENT_TYPE.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| {
            mime_guess::from_path(key)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        })
}

fn custom_metadata(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut meta = BTreeMap::new();
    if let Some(thumb) = header_str(headers, THUMBNAIL_HEADER) {
        meta.insert("thumbnail".to_string(), thumb.to_string());
    }
    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_parse_part_number() {
        assert_eq!(parse_part_number(Some("3")).unwrap(), 3);
        assert!(parse_part_number(None).is_err());
        assert!(parse_part_number(Some("-1")).is_err());
        assert!(parse_part_number(Some("abc")).is_err());
    }

    #[test]
    fn test_content_type_fallback() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_type(&headers, "a/photo.png"), "image/png");
        assert_eq!(content_type(&headers, "a/blob"), "application/octet-stream");
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        assert_eq!(content_type(&headers, "a/photo.png"), "text/plain");
    }

    #[test]
    fn test_numeric_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(numeric_header(&headers, CONTENT_LENGTH_HEADER).unwrap(), None);
        headers.insert(CONTENT_LENGTH_HEADER, HeaderValue::from_static("26214400"));
        assert_eq!(numeric_header(&headers, CONTENT_LENGTH_HEADER).unwrap(), Some(26_214_400));
        headers.insert(CHUNK_SIZE_HEADER, HeaderValue::from_static("ten"));
        assert!(numeric_header(&headers, CHUNK_SIZE_HEADER).is_err());
    }
}

//! S3-compatible REST backend.
//!
//! Talks to any SigV4 object store (AWS S3, R2's S3 API, MinIO, B2) with
//! reqwest and the signer in `sigv4`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, Response, Url};
use tracing::debug;

use multidrive_common::backend::{BackendKind, ObjectBackend};
use multidrive_common::config::RestConfig;
use multidrive_common::error::{ensure_success, StorageError, StorageResult};
use multidrive_common::types::{
    normalize_key, response_stream, sorted_parts, CompletedUpload, CreatedUpload, ListOptions,
    ListPage, MultipartOptions, ObjectBody, ObjectStat, PartResult, PutOptions, PutResult,
    UploadedPart,
};

use super::sigv4::{self, SigningCredentials};
use super::xml;

const META_PREFIX: &str = "x-amz-meta-";

pub struct RestObjectBackend {
    endpoint: Url,
    bucket: String,
    force_path_style: bool,
    creds: SigningCredentials,
    client: Client,
}

impl RestObjectBackend {
    pub fn new(config: RestConfig) -> StorageResult<Self> {
        let endpoint = Url::parse(config.endpoint.trim())
            .map_err(|e| StorageError::config(format!("invalid REST endpoint: {}", e)))?;
        if config.bucket.trim().is_empty() {
            return Err(StorageError::config("REST bucket is empty"));
        }
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()?;
        Ok(Self {
            endpoint,
            bucket: config.bucket.trim().to_string(),
            force_path_style: config.force_path_style,
            creds: SigningCredentials {
                access_key_id: config.access_key_id,
                secret_access_key: config.secret_access_key,
                region: if config.region.trim().is_empty() {
                    multidrive_common::config::DEFAULT_REGION.to_string()
                } else {
                    config.region
                },
            },
            client,
        })
    }

    /// URL for `key` (empty for the bucket itself) with a pre-encoded query.
    fn url(&self, key: &str, query: &str) -> StorageResult<Url> {
        let mut url = self.endpoint.clone();
        let base_path = url.path().trim_end_matches('/').to_string();
        let encoded_key = encode_key(key);

        let path = if self.force_path_style {
            format!("{}/{}/{}", base_path, urlencoding::encode(&self.bucket), encoded_key)
        } else {
            let host = url
                .host_str()
                .ok_or_else(|| StorageError::config("REST endpoint has no host"))?
                .to_string();
            url.set_host(Some(&format!("{}.{}", self.bucket, host)))
                .map_err(|e| StorageError::config(format!("invalid virtual host: {}", e)))?;
            format!("{}/{}", base_path, encoded_key)
        };
        url.set_path(&path);
        url.set_query(if query.is_empty() { None } else { Some(query) });
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        headers: Vec<(String, String)>,
        body: Option<Bytes>,
    ) -> StorageResult<Response> {
        let signed = sigv4::sign(&self.creds, method.as_str(), &url, &headers, Utc::now());
        let mut req = self.client.request(method, url);
        for (name, value) in &headers {
            req = req.header(name.as_str(), value.as_str());
        }
        req = signed.apply(req);
        if let Some(body) = body {
            req = req.body(body);
        }
        Ok(req.send().await?)
    }

    fn stat_from_headers(key: &str, headers: &HeaderMap) -> ObjectStat {
        let size = header_str(headers, "content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let last_modified = header_str(headers, "last-modified")
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let mut stat = ObjectStat::new(key, size, last_modified)
            .with_content_type(header_str(headers, "content-type").map(str::to_string));
        for (name, value) in headers {
            if let Some(meta_key) = name.as_str().strip_prefix(META_PREFIX) {
                if let Ok(v) = value.to_str() {
                    stat.custom_metadata.insert(meta_key.to_string(), v.to_string());
                }
            }
        }
        stat
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Percent-encode each segment, keeping `/` separators.
pub fn encode_key(key: &str) -> String {
    normalize_key(key)
        .split('/')
        .map(|s| urlencoding::encode(s).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn metadata_headers(
    content_type: Option<&str>,
    custom: &BTreeMap<String, String>,
) -> Vec<(String, String)> {
    let mut headers = Vec::new();
    if let Some(ct) = content_type.filter(|s| !s.is_empty()) {
        headers.push(("content-type".to_string(), ct.to_string()));
    }
    for (k, v) in custom {
        if v.is_empty() {
            continue;
        }
        headers.push((format!("{}{}", META_PREFIX, k.to_ascii_lowercase()), v.clone()));
    }
    headers
}

fn query_string(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Parse a ListObjectsV2 response body.
pub fn parse_list_page(body: &str) -> ListPage {
    let objects = xml::blocks(body, "Contents")
        .into_iter()
        .filter_map(|block| {
            let key = xml::extract_tag(block, "Key")?;
            let size = xml::extract_tag(block, "Size")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            let last_modified = xml::extract_tag(block, "LastModified")
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);
            Some(ObjectStat::new(key, size, last_modified))
        })
        .collect();
    let common_prefixes = xml::blocks(body, "CommonPrefixes")
        .into_iter()
        .filter_map(|block| xml::extract_tag(block, "Prefix"))
        .collect();
    let truncated = xml::extract_tag(body, "IsTruncated").as_deref() == Some("true");
    let cursor = xml::extract_tag(body, "NextContinuationToken").filter(|s| !s.is_empty());
    ListPage {
        objects,
        common_prefixes,
        truncated,
        cursor: if truncated { cursor } else { None },
    }
}

pub fn complete_multipart_xml(parts: &[PartResult]) -> String {
    let mut out = String::from("<CompleteMultipartUpload>");
    for part in sorted_parts(parts) {
        out.push_str(&format!(
            "<Part><PartNumber>{}</PartNumber><ETag>{}</ETag></Part>",
            part.part_number,
            xml::escape(&part.etag)
        ));
    }
    out.push_str("</CompleteMultipartUpload>");
    out
}

/// Read a 2xx body and reject embedded `<Error>` documents.
async fn read_xml(resp: Response, action: &str) -> StorageResult<String> {
    let status = resp.status().as_u16();
    let body = resp.text().await?;
    if xml::is_error_document(&body) {
        return Err(StorageError::protocol(action, status, body));
    }
    Ok(body)
}

#[async_trait]
impl ObjectBackend for RestObjectBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Rest
    }

    async fn list(&self, opts: &ListOptions) -> StorageResult<ListPage> {
        let mut pairs: Vec<(&str, &str)> = vec![("list-type", "2")];
        if let Some(prefix) = opts.prefix.as_deref().filter(|s| !s.is_empty()) {
            pairs.push(("prefix", prefix));
        }
        if let Some(delimiter) = opts.delimiter.as_deref().filter(|s| !s.is_empty()) {
            pairs.push(("delimiter", delimiter));
        }
        if let Some(cursor) = opts.cursor.as_deref().filter(|s| !s.is_empty()) {
            pairs.push(("continuation-token", cursor));
        }
        let url = self.url("", &query_string(&pairs))?;
        let resp = self.send(Method::GET, url, Vec::new(), None).await?;
        let resp = ensure_success(resp, "S3 ListObjectsV2").await?;
        let body = read_xml(resp, "S3 ListObjectsV2").await?;
        let page = parse_list_page(&body);
        debug!(prefix = ?opts.prefix, objects = page.objects.len(), "S3 list complete");
        Ok(page)
    }

    async fn head(&self, key: &str) -> StorageResult<Option<ObjectStat>> {
        let url = self.url(key, "")?;
        let resp = self.send(Method::HEAD, url, Vec::new(), None).await?;
        match ensure_success(resp, "S3 HeadObject").await {
            Ok(resp) => Ok(Some(Self::stat_from_headers(key, resp.headers()))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get(&self, key: &str) -> StorageResult<Option<ObjectBody>> {
        let url = self.url(key, "")?;
        let resp = self.send(Method::GET, url, Vec::new(), None).await?;
        match ensure_success(resp, "S3 GetObject").await {
            Ok(resp) => {
                let stat = Self::stat_from_headers(key, resp.headers());
                Ok(Some(ObjectBody { stat, body: response_stream(resp) }))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn put(&self, key: &str, body: Bytes, opts: &PutOptions) -> StorageResult<PutResult> {
        let url = self.url(key, "")?;
        let headers = metadata_headers(opts.content_type.as_deref(), &opts.custom_metadata);
        let size = body.len() as u64;
        let resp = self.send(Method::PUT, url, headers, Some(body)).await?;
        ensure_success(resp, "S3 PutObject").await?;
        debug!(key = %key, size, "S3 upload complete");
        Ok(PutResult {
            key: key.to_string(),
            size,
            uploaded: Utc::now(),
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let url = self.url(key, "")?;
        let resp = self.send(Method::DELETE, url, Vec::new(), None).await?;
        match ensure_success(resp, "S3 DeleteObject").await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        debug!(key = %key, "S3 delete complete");
        Ok(())
    }

    async fn copy_object(&self, src: &str, dst: &str) -> StorageResult<()> {
        let url = self.url(dst, "")?;
        let source = format!("/{}/{}", self.bucket, encode_key(src));
        let headers = vec![("x-amz-copy-source".to_string(), source)];
        let resp = self.send(Method::PUT, url, headers, None).await?;
        let resp = match ensure_success(resp, "S3 CopyObject").await {
            Ok(resp) => resp,
            Err(e) if e.is_not_found() => return Err(StorageError::NotFound(src.to_string())),
            Err(e) => return Err(e),
        };
        read_xml(resp, "S3 CopyObject").await?;
        debug!(src = %src, dst = %dst, "S3 copy complete");
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        key: &str,
        opts: &MultipartOptions,
    ) -> StorageResult<CreatedUpload> {
        let url = self.url(key, "uploads=")?;
        let headers = metadata_headers(opts.content_type.as_deref(), &opts.custom_metadata);
        let resp = self.send(Method::POST, url, headers, None).await?;
        let resp = ensure_success(resp, "S3 CreateMultipartUpload").await?;
        let status = resp.status().as_u16();
        let body = read_xml(resp, "S3 CreateMultipartUpload").await?;
        let upload_id = xml::extract_tag(&body, "UploadId")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| StorageError::protocol("S3 CreateMultipartUpload", status, body.clone()))?;
        debug!(key = %key, upload_id = %upload_id, "S3 multipart upload created");
        Ok(CreatedUpload {
            key: key.to_string(),
            upload_id,
            chunk_size: None,
            sequential: false,
        })
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> StorageResult<UploadedPart> {
        let part = part_number.to_string();
        let query = query_string(&[("partNumber", part.as_str()), ("uploadId", upload_id)]);
        let url = self.url(key, &query)?;
        let resp = self.send(Method::PUT, url, Vec::new(), Some(body)).await?;
        let resp = ensure_success(resp, "S3 UploadPart").await?;
        let etag = header_str(resp.headers(), "etag")
            .map(str::to_string)
            .ok_or_else(|| StorageError::protocol("S3 UploadPart", resp.status().as_u16(), "missing ETag header"))?;
        debug!(key = %key, part_number, "S3 part uploaded");
        Ok(UploadedPart { etag })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[PartResult],
    ) -> StorageResult<CompletedUpload> {
        let url = self.url(key, &query_string(&[("uploadId", upload_id)]))?;
        let headers = vec![("content-type".to_string(), "application/xml".to_string())];
        let body = Bytes::from(complete_multipart_xml(parts));
        let resp = self.send(Method::POST, url, headers, Some(body)).await?;
        let resp = ensure_success(resp, "S3 CompleteMultipartUpload").await?;
        let header_etag = header_str(resp.headers(), "etag").map(str::to_string);
        let body = read_xml(resp, "S3 CompleteMultipartUpload").await?;
        let etag = xml::extract_tag(&body, "ETag")
            .or(header_etag)
            .unwrap_or_default();
        debug!(key = %key, parts = parts.len(), "S3 multipart upload complete");
        Ok(CompletedUpload { etag })
    }
}

//! Cloud-drive backend speaking the Microsoft Graph drive API.
//!
//! Keys map onto item paths under an optional root folder. Empty folders
//! are represented by `_$folder$` marker keys, which this backend turns into
//! real folders. Large uploads go through Graph upload sessions; the session
//! URL travels to the client inside the upload id (see `capsule`).

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use multidrive_common::backend::{BackendKind, ObjectBackend};
use multidrive_common::config::{normalize_root_path, SessionConfig};
use multidrive_common::error::{ensure_success, StorageError, StorageResult};
use multidrive_common::types::{
    is_folder_marker, normalize_key, response_stream, CompletedUpload, CreatedUpload,
    ListOptions, ListPage, MultipartOptions, ObjectBody, ObjectStat, PartResult, PutOptions,
    PutResult, UploadedPart, FOLDER_MARKER_SUFFIX,
};

use super::capsule::UploadCapsule;
use super::token_cache::TokenCache;

/// Bodies up to this size go through a single content PUT.
pub const SIMPLE_UPLOAD_LIMIT: u64 = 4 * 1024 * 1024;
/// Graph requires session chunks to be multiples of this.
pub const MIN_CHUNK_SIZE: u64 = 320 * 1024;
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;
/// Largest range Graph accepts in one request (60 MiB, 192 units).
pub const MAX_CHUNK_SIZE: u64 = 192 * MIN_CHUNK_SIZE;
/// Prefix of the acknowledgement returned for ranges Graph accepted
/// without finishing the item.
const RANGE_ACK_PREFIX: &str = "range-";
const PAGE_SIZE: &str = "200";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Clamp into `MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE` and round down to a whole
/// number of units.
pub fn normalize_chunk_size(value: Option<u64>) -> u64 {
    let raw = value
        .unwrap_or(DEFAULT_CHUNK_SIZE)
        .clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
    raw / MIN_CHUNK_SIZE * MIN_CHUNK_SIZE
}

fn range_ack(start: u64, end: u64) -> String {
    format!("{}{}-{}", RANGE_ACK_PREFIX, start, end)
}

fn is_range_ack(etag: &str) -> bool {
    etag.starts_with(RANGE_ACK_PREFIX)
}

fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|s| urlencoding::encode(s).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn strip_marker(key: &str) -> &str {
    let key = normalize_key(key);
    key.strip_suffix(FOLDER_MARKER_SUFFIX).unwrap_or(key)
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct DriveItem {
    #[serde(default)]
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(rename = "lastModifiedDateTime")]
    last_modified: Option<DateTime<Utc>>,
    folder: Option<serde_json::Value>,
    file: Option<FileFacet>,
    #[serde(rename = "eTag")]
    etag: Option<String>,
}

#[derive(Deserialize)]
struct FileFacet {
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
}

#[derive(Deserialize)]
struct ChildrenPage {
    #[serde(default)]
    value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Deserialize)]
struct UploadSessionResponse {
    #[serde(rename = "uploadUrl")]
    upload_url: Option<String>,
}

pub struct SessionObjectBackend {
    config: SessionConfig,
    root_path: String,
    base_url: String,
    tokens: Arc<TokenCache>,
    client: Client,
}

impl SessionObjectBackend {
    pub fn new(config: SessionConfig, tokens: Arc<TokenCache>) -> StorageResult<Self> {
        if config.client_id.trim().is_empty() {
            return Err(StorageError::config("session client id is not configured"));
        }
        if config.client_secret.trim().is_empty() {
            return Err(StorageError::config("session client secret is not configured"));
        }
        if config.refresh_token.trim().is_empty() {
            return Err(StorageError::config("session refresh token is not configured"));
        }
        let api_base = config.api_base.trim_end_matches('/');
        let base_url = match config.drive_id.as_deref().map(normalize_root_path) {
            Some(drive) if !drive.is_empty() => {
                format!("{}/drives/{}", api_base, urlencoding::encode(&drive))
            }
            _ => format!("{}/me/drive", api_base),
        };
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()?;
        Ok(Self {
            root_path: normalize_root_path(&config.root_path),
            base_url,
            config,
            tokens,
            client,
        })
    }

    async fn access_token(&self) -> StorageResult<String> {
        let cache_key = TokenCache::cache_key(
            &self.config.client_id,
            &self.config.tenant_id,
            self.config.drive_id.as_deref(),
            &self.config.refresh_token,
        );
        if let Some(token) = self.tokens.get(&cache_key, Utc::now()) {
            return Ok(token);
        }

        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.config.auth_base.trim_end_matches('/'),
            self.config.tenant_id
        );
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", self.config.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ]
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

        let resp = self
            .client
            .post(&url)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await?;
        let resp = ensure_success(resp, "Graph token refresh").await?;
        let status = resp.status().as_u16();
        let payload: TokenResponse = resp.json().await?;
        let token = payload
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| StorageError::protocol("Graph token refresh", status, "missing access_token"))?;
        let lifetime = payload.expires_in.unwrap_or(3600).max(60);
        self.tokens
            .insert(&cache_key, token.clone(), Utc::now() + Duration::seconds(lifetime));
        debug!(tenant = %self.config.tenant_id, lifetime, "Graph access token refreshed");
        Ok(token)
    }

    async fn graph(&self, method: Method, url: &str) -> StorageResult<RequestBuilder> {
        let token = self.access_token().await?;
        Ok(self.client.request(method, url).bearer_auth(token))
    }

    /// Key rebased under the configured root folder.
    fn item_path(&self, key: &str) -> String {
        [self.root_path.as_str(), normalize_key(key)]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/")
    }

    fn item_url(&self, path: &str) -> String {
        if path.is_empty() {
            format!("{}/root", self.base_url)
        } else {
            format!("{}/root:/{}", self.base_url, encode_path(path))
        }
    }

    fn children_url(&self, path: &str) -> String {
        if path.is_empty() {
            format!("{}/root/children", self.base_url)
        } else {
            format!("{}/root:/{}:/children", self.base_url, encode_path(path))
        }
    }

    /// Create every missing folder along `path`, tolerating concurrent creators.
    async fn ensure_folder_path(&self, path: &str) -> StorageResult<()> {
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            let parent = current.clone();
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);

            let probe = self.graph(Method::GET, &self.item_url(&current)).await?.send().await?;
            if probe.status() != StatusCode::NOT_FOUND {
                ensure_success(probe, "Graph read folder").await?;
                continue;
            }

            let create = self
                .graph(Method::POST, &self.children_url(&parent))
                .await?
                .json(&json!({
                    "name": segment,
                    "folder": {},
                    "@microsoft.graph.conflictBehavior": "fail",
                }))
                .send()
                .await?;
            if create.status() == StatusCode::CONFLICT {
                warn!(folder = %current, "Folder created concurrently, continuing");
                continue;
            }
            ensure_success(create, "Graph create folder").await?;
            debug!(folder = %current, "Graph folder created");
        }
        Ok(())
    }

    async fn create_upload_session(&self, path: &str) -> StorageResult<String> {
        let name = path.rsplit('/').next().unwrap_or_default();
        let url = format!("{}:/createUploadSession", self.item_url(path));
        let resp = self
            .graph(Method::POST, &url)
            .await?
            .json(&json!({
                "item": {
                    "@microsoft.graph.conflictBehavior": "replace",
                    "name": name,
                }
            }))
            .send()
            .await?;
        let resp = ensure_success(resp, "Graph create upload session").await?;
        let status = resp.status().as_u16();
        let session: UploadSessionResponse = resp.json().await?;
        session
            .upload_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| StorageError::protocol("Graph create upload session", status, "missing uploadUrl"))
    }

    /// PUT one byte range to a pre-authorized session URL. Returns the item
    /// etag once the final range lands, `range-{start}-{end}` before that.
    async fn put_range(
        &self,
        upload_url: &str,
        start: u64,
        end: u64,
        total: u64,
        body: Bytes,
    ) -> StorageResult<String> {
        let resp = self
            .client
            .put(upload_url)
            .header("content-range", format!("bytes {}-{}/{}", start, end, total))
            .body(body)
            .send()
            .await?;
        let resp = ensure_success(resp, "Graph upload range").await?;
        if resp.status() == StatusCode::ACCEPTED {
            return Ok(range_ack(start, end));
        }
        let header_etag = resp
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        if let Some(etag) = header_etag {
            return Ok(etag);
        }
        let text = resp.text().await.unwrap_or_default();
        let etag = serde_json::from_str::<DriveItem>(&text)
            .ok()
            .and_then(|item| item.etag)
            .filter(|e| !e.is_empty());
        Ok(etag.unwrap_or_else(|| {
            warn!(start, end, total, "Final range acknowledged without an item etag");
            format!("\"{}\"", total)
        }))
    }

    fn display_prefix(prefix: Option<&str>) -> String {
        let p = prefix.map(normalize_key).unwrap_or_default();
        if p.is_empty() {
            String::new()
        } else {
            format!("{}/", p)
        }
    }
}

#[async_trait]
impl ObjectBackend for SessionObjectBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Session
    }

    async fn list(&self, opts: &ListOptions) -> StorageResult<ListPage> {
        let cursor = opts.cursor.as_deref().filter(|c| !c.is_empty());
        let url = match cursor {
            Some(next) if next.starts_with("http") => next.to_string(),
            _ => {
                let folder = self.item_path(opts.prefix.as_deref().unwrap_or_default());
                let mut url = format!("{}?$top={}", self.children_url(&folder), PAGE_SIZE);
                if let Some(token) = cursor {
                    url.push_str(&format!("&$skiptoken={}", urlencoding::encode(token)));
                }
                url
            }
        };

        let resp = self.graph(Method::GET, &url).await?.send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(ListPage::default());
        }
        let resp = ensure_success(resp, "Graph list children").await?;
        let page: ChildrenPage = resp.json().await?;

        let prefix = Self::display_prefix(opts.prefix.as_deref());
        let mut out = ListPage::default();
        for item in page.value {
            if item.name.is_empty() {
                continue;
            }
            if item.folder.is_some() {
                out.common_prefixes.push(format!("{}{}/", prefix, item.name));
            } else if let Some(file) = item.file {
                let stat = ObjectStat::new(
                    format!("{}{}", prefix, item.name),
                    item.size,
                    item.last_modified.unwrap_or_else(Utc::now),
                )
                .with_content_type(file.mime_type);
                out.objects.push(stat);
            }
        }
        out.cursor = page.next_link.filter(|l| !l.is_empty());
        out.truncated = out.cursor.is_some();
        debug!(prefix = %prefix, objects = out.objects.len(), "Graph list complete");
        Ok(out)
    }

    async fn head(&self, key: &str) -> StorageResult<Option<ObjectStat>> {
        let marker = is_folder_marker(key);
        let url = self.item_url(&self.item_path(strip_marker(key)));
        let resp = self.graph(Method::GET, &url).await?.send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = ensure_success(resp, "Graph item metadata").await?;
        let item: DriveItem = resp.json().await?;
        let is_folder = marker || item.folder.is_some();
        let stat = ObjectStat::new(
            key,
            if is_folder { 0 } else { item.size },
            item.last_modified.unwrap_or_else(Utc::now),
        );
        let content_type = if is_folder {
            None
        } else {
            item.file.and_then(|f| f.mime_type)
        };
        Ok(Some(stat.with_content_type(content_type)))
    }

    async fn get(&self, key: &str) -> StorageResult<Option<ObjectBody>> {
        if is_folder_marker(key) {
            return Ok(None);
        }
        let url = format!("{}:/content", self.item_url(&self.item_path(key)));
        let resp = self.graph(Method::GET, &url).await?.send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = ensure_success(resp, "Graph read content").await?;
        let headers = resp.headers();
        let size = headers
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let last_modified = headers
            .get("last-modified")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let content_type = headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let stat = ObjectStat::new(key, size, last_modified).with_content_type(content_type);
        Ok(Some(ObjectBody {
            stat,
            body: response_stream(resp),
        }))
    }

    async fn put(&self, key: &str, body: Bytes, opts: &PutOptions) -> StorageResult<PutResult> {
        if is_folder_marker(key) {
            self.ensure_folder_path(&self.item_path(strip_marker(key))).await?;
            return Ok(PutResult {
                key: key.to_string(),
                size: 0,
                uploaded: Utc::now(),
            });
        }

        let path = self.item_path(key);
        self.ensure_folder_path(parent_of(&path)).await?;
        let size = body.len() as u64;
        let content_type = opts
            .content_type
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        if size <= SIMPLE_UPLOAD_LIMIT {
            let url = format!("{}:/content", self.item_url(&path));
            let resp = self
                .graph(Method::PUT, &url)
                .await?
                .header("content-type", content_type)
                .body(body)
                .send()
                .await?;
            ensure_success(resp, "Graph upload").await?;
        } else {
            let upload_url = self.create_upload_session(&path).await?;
            let chunk = normalize_chunk_size(self.config.chunk_size) as usize;
            let mut offset = 0usize;
            while offset < body.len() {
                let end = (offset + chunk).min(body.len());
                self.put_range(
                    &upload_url,
                    offset as u64,
                    end as u64 - 1,
                    size,
                    body.slice(offset..end),
                )
                .await?;
                offset = end;
            }
        }

        debug!(key = %key, size, "Graph upload complete");
        Ok(PutResult {
            key: key.to_string(),
            size,
            uploaded: Utc::now(),
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let url = self.item_url(&self.item_path(strip_marker(key)));
        let resp = self.graph(Method::DELETE, &url).await?.send().await?;
        if resp.status() != StatusCode::NOT_FOUND {
            ensure_success(resp, "Graph delete").await?;
        }
        debug!(key = %key, "Graph delete complete");
        Ok(())
    }

    async fn copy_object(&self, src: &str, dst: &str) -> StorageResult<()> {
        let source = self
            .get(src)
            .await?
            .ok_or_else(|| StorageError::NotFound(src.to_string()))?;
        let opts = PutOptions {
            content_type: source.stat.content_type.clone(),
            custom_metadata: source.stat.custom_metadata.clone(),
            content_length: Some(source.stat.size),
        };
        let data = source.into_bytes().await?;
        self.put(dst, data, &opts).await?;
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        key: &str,
        opts: &MultipartOptions,
    ) -> StorageResult<CreatedUpload> {
        if is_folder_marker(key) {
            let put_opts = PutOptions {
                content_type: opts.content_type.clone(),
                ..Default::default()
            };
            self.put(key, Bytes::new(), &put_opts).await?;
            return Ok(CreatedUpload {
                key: key.to_string(),
                upload_id: String::new(),
                chunk_size: None,
                sequential: false,
            });
        }

        let total_size = opts.content_length.unwrap_or(0);
        if total_size == 0 {
            return Err(StorageError::InvalidInput(
                "session uploads require the total content length".into(),
            ));
        }
        let chunk_size = normalize_chunk_size(self.config.chunk_size.or(opts.chunk_size));

        let path = self.item_path(key);
        self.ensure_folder_path(parent_of(&path)).await?;
        let upload_url = self.create_upload_session(&path).await?;
        let upload_id = UploadCapsule {
            upload_url,
            total_size,
            chunk_size,
        }
        .encode()?;

        debug!(key = %key, total_size, chunk_size, "Graph upload session created");
        Ok(CreatedUpload {
            key: key.to_string(),
            upload_id,
            chunk_size: Some(chunk_size),
            sequential: true,
        })
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> StorageResult<UploadedPart> {
        let capsule = UploadCapsule::decode(upload_id)?;
        let (start, end) = capsule.part_range(part_number, body.len() as u64)?;
        let etag = self
            .put_range(&capsule.upload_url, start, end, capsule.total_size, body)
            .await?;
        debug!(key = %key, part_number, start, end, "Graph range uploaded");
        Ok(UploadedPart { etag })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        _upload_id: &str,
        parts: &[PartResult],
    ) -> StorageResult<CompletedUpload> {
        let etag = parts
            .iter()
            .map(|p| p.etag.as_str())
            .find(|e| !e.is_empty() && !is_range_ack(e))
            .ok_or_else(|| {
                StorageError::InvalidInput("upload session never received its final range".into())
            })?
            .to_string();
        debug!(key = %key, parts = parts.len(), "Graph upload session finished");
        Ok(CompletedUpload { etag })
    }
}

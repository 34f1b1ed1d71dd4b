use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG};
use tracing::debug;

use multidrive_common::error::{ensure_success, StorageError, StorageResult};
use multidrive_common::types::{CompleteRequest, CreatedUpload, MultipartOptions, PartResult};

/// Called with the bytes of the current part sent so far.
pub type PartProgress = Arc<dyn Fn(u64) + Send + Sync>;

/// The three calls of the multipart protocol, as seen from the client.
#[async_trait]
pub trait MultipartTransport: Send + Sync {
    async fn begin(&self, key: &str, opts: &MultipartOptions) -> StorageResult<CreatedUpload>;

    /// Returns the part's etag.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
        progress: PartProgress,
    ) -> StorageResult<String>;

    async fn complete(&self, key: &str, upload_id: &str, parts: &[PartResult]) -> StorageResult<()>;
}

const STREAM_SLICE: usize = 64 * 1024;

/// Talks to a multidrive server's `/api/write/items` surface.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    drive_id: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: &str, drive_id: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            drive_id: drive_id.filter(|d| !d.trim().is_empty()),
        }
    }

    fn item_url(&self, key: &str) -> String {
        let encoded: Vec<String> = key
            .trim_matches('/')
            .split('/')
            .map(|seg| urlencoding::encode(seg).into_owned())
            .collect();
        format!("{}/api/write/items/{}", self.base_url, encoded.join("/"))
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let req = self.client.request(method, url);
        match &self.drive_id {
            Some(id) => req.header("x-drive-id", id),
            None => req,
        }
    }
}

#[async_trait]
impl MultipartTransport for HttpTransport {
    async fn begin(&self, key: &str, opts: &MultipartOptions) -> StorageResult<CreatedUpload> {
        let url = format!("{}?uploads", self.item_url(key));
        let mut req = self.request(reqwest::Method::POST, url);
        if let Some(ct) = &opts.content_type {
            req = req.header(CONTENT_TYPE, ct);
        }
        if let Some(len) = opts.content_length {
            req = req.header("x-content-length", len.to_string());
        }
        if let Some(chunk) = opts.chunk_size {
            req = req.header("x-chunk-size", chunk.to_string());
        }
        if let Some(thumb) = opts.custom_metadata.get("thumbnail") {
            req = req.header("fd-thumbnail", thumb);
        }
        let resp = ensure_success(req.send().await?, "begin upload").await?;
        let created: CreatedUpload = resp.json().await?;
        debug!(key = %key, upload_id = %created.upload_id, "Upload started");
        Ok(created)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
        progress: PartProgress,
    ) -> StorageResult<String> {
        let url = format!(
            "{}?partNumber={}&uploadId={}",
            self.item_url(key),
            part_number,
            urlencoding::encode(upload_id)
        );
        let len = body.len();
        let resp = self
            .request(reqwest::Method::PUT, url)
            .header(CONTENT_LENGTH, len)
            .body(progress_body(body, progress))
            .send()
            .await?;
        let resp = ensure_success(resp, "upload part").await?;
        let status = resp.status().as_u16();
        resp.headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| StorageError::protocol("upload part", status, "response carried no etag"))
    }

    async fn complete(&self, key: &str, upload_id: &str, parts: &[PartResult]) -> StorageResult<()> {
        let url = format!("{}?uploadId={}", self.item_url(key), urlencoding::encode(upload_id));
        let body = CompleteRequest {
            parts: parts.to_vec(),
        };
        let resp = self
            .request(reqwest::Method::POST, url)
            .json(&body)
            .send()
            .await?;
        ensure_success(resp, "complete upload").await?;
        Ok(())
    }
}

/// Stream `data` in slices, reporting progress as each slice is handed to
/// the connection.
fn progress_body(data: Bytes, progress: PartProgress) -> reqwest::Body {
    let slices: Vec<Bytes> = (0..data.len())
        .step_by(STREAM_SLICE)
        .map(|start| data.slice(start..(start + STREAM_SLICE).min(data.len())))
        .collect();
    let mut sent = 0u64;
    let stream = futures_util::stream::iter(slices).map(move |slice| {
        sent += slice.len() as u64;
        progress(sent);
        Ok::<_, std::io::Error>(slice)
    });
    reqwest::Body::wrap_stream(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::{Json, Router};
    use std::collections::HashMap;

    #[derive(Default)]
    struct Seen {
        requests: Vec<(String, HashMap<String, String>, HashMap<String, String>, usize)>,
    }

    type Shared = Arc<Mutex<Seen>>;

    async fn handler(
        State(seen): State<Shared>,
        uri: axum::http::Uri,
        Query(query): Query<HashMap<String, String>>,
        headers: HeaderMap,
        body: Bytes,
    ) -> axum::response::Response {
        let hdrs = headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        seen.lock()
            .unwrap()
            .requests
            .push((uri.path().to_string(), query.clone(), hdrs, body.len()));

        if query.contains_key("uploads") {
            return Json(serde_json::json!({ "key": "a b/c.bin", "uploadId": "id+/=" })).into_response();
        }
        if query.contains_key("partNumber") {
            if query["partNumber"] == "9" {
                return (StatusCode::GONE, "expired").into_response();
            }
            return (StatusCode::OK, [("etag", "\"e1\"")]).into_response();
        }
        (StatusCode::OK, [("etag", "\"final\"")]).into_response()
    }

    async fn serve() -> (String, Shared) {
        let seen: Shared = Arc::default();
        let app = Router::new().fallback(handler).with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), seen)
    }

    #[tokio::test]
    async fn test_http_protocol() {
        let (base, seen) = serve().await;
        let transport = HttpTransport::new(&format!("{}/", base), Some("docs".into()));

        let mut opts = MultipartOptions {
            content_type: Some("video/mp4".into()),
            content_length: Some(26_214_400),
            chunk_size: Some(10_485_760),
            ..Default::default()
        };
        opts.custom_metadata.insert("thumbnail".into(), "t.png".into());
        let created = transport.begin("a b/c.bin", &opts).await.unwrap();
        assert_eq!(created.upload_id, "id+/=");

        let sent = Arc::new(AtomicU64::new(0));
        let counter = sent.clone();
        let body = Bytes::from(vec![7u8; 150_000]);
        let etag = transport
            .upload_part(
                "a b/c.bin",
                &created.upload_id,
                2,
                body,
                Arc::new(move |n| counter.store(n, Ordering::SeqCst)),
            )
            .await
            .unwrap();
        assert_eq!(etag, "\"e1\"");
        assert_eq!(sent.load(Ordering::SeqCst), 150_000);

        transport
            .complete("a b/c.bin", &created.upload_id, &[PartResult { part_number: 1, etag: "x".into() }])
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        let (path, query, headers, _) = &seen.requests[0];
        assert_eq!(path, "/api/write/items/a%20b/c.bin");
        assert!(query.contains_key("uploads"));
        assert_eq!(headers["x-drive-id"], "docs");
        assert_eq!(headers["x-content-length"], "26214400");
        assert_eq!(headers["x-chunk-size"], "10485760");
        assert_eq!(headers["fd-thumbnail"], "t.png");
        assert_eq!(headers["content-type"], "video/mp4");

        let (_, query, _, len) = &seen.requests[1];
        assert_eq!(query["uploadId"], "id+/=");
        assert_eq!(query["partNumber"], "2");
        assert_eq!(*len, 150_000);

        let (_, query, _, _) = &seen.requests[2];
        assert_eq!(query["uploadId"], "id+/=");
    }

    #[tokio::test]
    async fn test_http_errors_keep_status() {
        let (base, _seen) = serve().await;
        let transport = HttpTransport::new(&base, None);
        let err = transport
            .upload_part("k", "id", 9, Bytes::from_static(b"x"), Arc::new(|_| {}))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(410));
    }
}

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use multidrive_common::types::ObjectStat;

use super::{error_json, ApiError};
use crate::state::AppState;

/// RFC 7231 date, e.g. `Tue, 15 Nov 1994 08:12:31 GMT`.
const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

// ── GET /raw/{*path} ──

pub async fn get_raw(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let drive = state.drive(&headers).await?;
    let Some(object) = drive.backend.get(&path).await? else {
        return Ok(not_found(&path));
    };
    let mut resp = Response::new(Body::from_stream(object.body));
    apply_stat_headers(resp.headers_mut(), &object.stat);
    Ok(resp)
}

// ── HEAD /raw/{*path} ──

pub async fn head_raw(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let drive = state.drive(&headers).await?;
    let Some(stat) = drive.backend.head(&path).await? else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    let mut resp = Response::new(Body::empty());
    apply_stat_headers(resp.headers_mut(), &stat);
    Ok(resp)
}

fn not_found(path: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(error_json("not_found", &format!("{} not found", path))),
    )
        .into_response()
}

fn apply_stat_headers(headers: &mut HeaderMap, stat: &ObjectStat) {
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(stat.size));
    let content_type = stat
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);
    let modified = stat.last_modified.format(HTTP_DATE).to_string();
    if let Ok(v) = HeaderValue::from_str(&modified) {
        headers.insert(header::LAST_MODIFIED, v);
    }
    if let Some(v) = stat
        .custom_metadata
        .get("thumbnail")
        .and_then(|t| HeaderValue::from_str(t).ok())
    {
        headers.insert("fd-thumbnail", v);
    }
}

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;

use multidrive_common::config::{PublicStorageConfig, STORAGE_CONFIG_VERSION};
use multidrive_common::error::StorageError;

use super::{error_json, ApiError};
use crate::state::{header_str, AppState};

// ── GET /api/config/storage ──

pub async fn get_storage_config(
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let doc = state.config_store.load().await?;
    let public = match doc {
        Some(doc) => doc.to_public(),
        None => PublicStorageConfig {
            version: STORAGE_CONFIG_VERSION,
            updated_at: 0,
            drives: Vec::new(),
        },
    };
    Ok((
        StatusCode::OK,
        [(header::CACHE_CONTROL, "no-store")],
        Json(serde_json::json!({ "config": public })),
    )
        .into_response())
}

// ── PUT /api/config/storage ──

/// Replace the persisted drive records. Secrets omitted from the body are
/// carried over from the stored record with the same id.
pub async fn put_storage_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if !is_admin(&state, &headers) {
        return Ok((
            StatusCode::FORBIDDEN,
            Json(error_json("forbidden", "admin token required")),
        )
            .into_response());
    }
    let input: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| StorageError::InvalidInput(format!("invalid JSON body: {}", e)))?;
    let doc = state.config_store.save(&input).await?;
    Ok((
        StatusCode::OK,
        [(header::CACHE_CONTROL, "no-store")],
        Json(serde_json::json!({ "success": true, "config": doc.to_public() })),
    )
        .into_response())
}

/// `Authorization: Bearer <admin_token>`; always false when no token is set.
fn is_admin(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = state.admin_token.as_deref() else {
        return false;
    };
    header_str(headers, header::AUTHORIZATION.as_str())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token.trim() == expected)
}

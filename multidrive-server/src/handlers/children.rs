use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use multidrive_common::types::{is_folder_marker, normalize_key, ListOptions, ListPage, ObjectStat};

use super::ApiError;
use crate::state::AppState;

#[derive(Deserialize, Default)]
pub struct ChildrenQuery {
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Children {
    pub value: Vec<ObjectStat>,
    pub folders: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

// ── GET /api/children ──

pub async fn list_root(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChildrenQuery>,
    headers: HeaderMap,
) -> Result<Json<Children>, ApiError> {
    list_at(&state, "", query.cursor, &headers).await.map(Json)
}

// ── GET /api/children/{*path} ──

pub async fn list_children(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(query): Query<ChildrenQuery>,
    headers: HeaderMap,
) -> Result<Json<Children>, ApiError> {
    list_at(&state, &path, query.cursor, &headers).await.map(Json)
}

async fn list_at(
    state: &AppState,
    path: &str,
    cursor: Option<String>,
    headers: &HeaderMap,
) -> Result<Children, ApiError> {
    let dir = normalize_key(path);
    let prefix = if dir.is_empty() {
        String::new()
    } else {
        format!("{}/", dir)
    };
    let drive = state.drive(headers).await?;
    let page = drive
        .backend
        .list(&ListOptions::delimited(prefix.clone(), "/").with_cursor(cursor))
        .await?;
    Ok(visible_children(page, &prefix))
}

/// Drop folder markers, directory placeholders and the listed prefix itself.
fn visible_children(page: ListPage, prefix: &str) -> Children {
    let value = page
        .objects
        .into_iter()
        .filter(|o| !is_folder_marker(&o.key) && !o.key.ends_with('/') && o.key != prefix)
        .collect();
    Children {
        value,
        folders: page.common_prefixes,
        cursor: if page.truncated { page.cursor } else { None },
    }
}

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{children, config, objects, raw};
use crate::state::AppState;

/// Upper bound on a single request body (one-shot put or one part).
pub const MAX_BODY_BYTES: usize = 512 * 1024 * 1024;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Writes and multipart
        .route(
            "/api/write/items/{*path}",
            post(objects::post_item)
                .put(objects::put_item)
                .delete(objects::delete_item),
        )
        // Reads
        .route("/raw/{*path}", get(raw::get_raw).head(raw::head_raw))
        .route("/api/children", get(children::list_root))
        .route("/api/children/{*path}", get(children::list_children))
        // Drive records
        .route(
            "/api/config/storage",
            get(config::get_storage_config).put(config::put_storage_config),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

use axum::http::{header, HeaderMap};
use tracing::debug;

use multidrive_common::error::StorageResult;

use crate::config_store::ConfigStore;
use crate::resolver::{BackendResolver, ResolvedDrive};

pub const DRIVE_HEADER: &str = "x-drive-id";

pub struct AppState {
    pub resolver: BackendResolver,
    pub config_store: ConfigStore,
    pub admin_token: Option<String>,
}

impl AppState {
    pub fn new(
        resolver: BackendResolver,
        config_store: ConfigStore,
        admin_token: Option<String>,
    ) -> Self {
        Self {
            resolver,
            config_store,
            admin_token,
        }
    }

    /// Resolve the backend for the drive a request addresses. Called once per
    /// request; nothing is cached across requests except the persisted
    /// config document and access tokens.
    pub async fn drive(&self, headers: &HeaderMap) -> StorageResult<ResolvedDrive> {
        let drive_id = drive_id_from_headers(headers);
        let persisted = self.config_store.load().await?;
        let drive = self.resolver.resolve(&drive_id, persisted.as_deref())?;
        debug!(drive = %drive.drive_id, source = ?drive.source, kind = %drive.backend.kind(), "Request routed");
        Ok(drive)
    }
}

/// Drive id from `x-drive-id`, else the first label of `Host`.
///
/// Numeric hosts (`127.0.0.1:8787`) carry no drive label and yield an empty
/// id, which resolves to the default binding.
pub fn drive_id_from_headers(headers: &HeaderMap) -> String {
    if let Some(id) = header_str(headers, DRIVE_HEADER) {
        return id.to_string();
    }
    let Some(host) = header_str(headers, header::HOST.as_str()) else {
        return String::new();
    };
    let host = host.split(':').next().unwrap_or_default();
    if host.parse::<std::net::Ipv4Addr>().is_ok() {
        return String::new();
    }
    host.split('.').next().unwrap_or_default().to_string()
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

//! Drive configuration records.
//!
//! A drive names exactly one backend. Records are owned by the config store;
//! the storage layer only reads them.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::BackendKind;
use crate::error::{StorageError, StorageResult};

pub const STORAGE_CONFIG_VERSION: u32 = 1;
pub const DEFAULT_REGION: &str = "auto";
pub const DEFAULT_TENANT: &str = "common";
pub const DEFAULT_GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_OAUTH_BASE: &str = "https://login.microsoftonline.com";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriveConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub backend: BackendKind,
    #[serde(default, alias = "r2Binding", skip_serializing_if = "Option::is_none")]
    pub native_binding: Option<String>,
    #[serde(default, alias = "s3", skip_serializing_if = "Option::is_none")]
    pub rest: Option<RestConfig>,
    #[serde(default, alias = "onedrive", skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RestConfig {
    pub endpoint: String,
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default = "default_true")]
    pub force_path_style: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
    /// Target drive; the account's default drive when absent.
    #[serde(default, alias = "rootId", skip_serializing_if = "Option::is_none")]
    pub drive_id: Option<String>,
    #[serde(default)]
    pub root_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_oauth_base")]
    pub auth_base: String,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_tenant() -> String {
    DEFAULT_TENANT.to_string()
}

fn default_api_base() -> String {
    DEFAULT_GRAPH_API_BASE.to_string()
}

fn default_oauth_base() -> String {
    DEFAULT_OAUTH_BASE.to_string()
}

fn default_true() -> bool {
    true
}

/// The persisted document holding every drive record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfigDocument {
    pub version: u32,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub drives: Vec<DriveConfig>,
}

impl StorageConfigDocument {
    pub fn find_drive(&self, drive_id: &str) -> Option<&DriveConfig> {
        let wanted = normalize_drive_id(drive_id);
        self.drives.iter().find(|d| normalize_drive_id(&d.id) == wanted)
    }
}

// ── Drive id handling ──

/// Case-folded id used to match persisted records.
pub fn normalize_drive_id(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Environment-variable form of a drive id: runs of non-alphanumerics fold
/// to a single `_`, edges trimmed, upper-cased (`my-docs` → `MY_DOCS`).
pub fn env_drive_key(drive_id: &str) -> String {
    let mut out = String::with_capacity(drive_id.len());
    let mut pending_sep = false;
    for c in drive_id.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c.to_ascii_uppercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

/// DNS-label-like ids (underscore tolerated), at most 63 characters.
pub fn is_valid_drive_id(value: &str) -> bool {
    if value.is_empty() || value.len() > 63 {
        return false;
    }
    let bytes = value.as_bytes();
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !edge_ok(bytes[0]) || !edge_ok(bytes[bytes.len() - 1]) {
        return false;
    }
    bytes
        .iter()
        .all(|&b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
}

pub fn normalize_root_path(value: &str) -> String {
    value.trim().trim_matches('/').to_string()
}

// ── Input validation ──

fn read_str(obj: &Value, key: &str) -> String {
    obj.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn or_existing(value: String, existing: Option<&str>) -> String {
    if value.is_empty() {
        existing.map(|s| s.trim().to_string()).unwrap_or_default()
    } else {
        value
    }
}

fn require(value: String, drive: &str, what: &str) -> StorageResult<String> {
    if value.is_empty() {
        return Err(StorageError::InvalidInput(format!("drive {drive}: missing {what}")));
    }
    Ok(value)
}

/// Validate an incoming `{drives: [...]}` document.
///
/// Secrets omitted from the input are inherited from the existing record of
/// the same drive and backend, so a client can edit a drive without
/// resending credentials it never saw.
pub fn validate_storage_config_input(
    raw: &Value,
    existing: Option<&StorageConfigDocument>,
    now_ms: i64,
) -> StorageResult<StorageConfigDocument> {
    let drives_in = raw
        .get("drives")
        .and_then(|v| v.as_array())
        .ok_or_else(|| StorageError::InvalidInput("drives must be an array".into()))?;

    let existing_by_id: HashMap<String, &DriveConfig> = existing
        .map(|doc| doc.drives.iter().map(|d| (normalize_drive_id(&d.id), d)).collect())
        .unwrap_or_default();

    let mut seen = HashSet::new();
    let mut drives = Vec::with_capacity(drives_in.len());

    for drive_raw in drives_in {
        if !drive_raw.is_object() {
            return Err(StorageError::InvalidInput("drive must be an object".into()));
        }
        let id = normalize_drive_id(&read_str(drive_raw, "id"));
        if !is_valid_drive_id(&id) {
            return Err(StorageError::InvalidInput(format!(
                "invalid drive id: {}",
                read_str(drive_raw, "id")
            )));
        }
        if !seen.insert(id.clone()) {
            return Err(StorageError::InvalidInput(format!("duplicate drive id: {id}")));
        }

        let backend: BackendKind = drive_raw
            .get("backend")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| {
                StorageError::InvalidInput(format!(
                    "drive {id}: unknown backend {}",
                    read_str(drive_raw, "backend")
                ))
            })?;

        let name = Some(read_str(drive_raw, "name")).filter(|s| !s.is_empty());
        let prior = existing_by_id.get(&id).filter(|d| d.backend == backend);

        let drive = match backend {
            BackendKind::Native => {
                let binding = first_present(drive_raw, &["nativeBinding", "r2Binding"]);
                let binding = or_existing(binding, prior.and_then(|d| d.native_binding.as_deref()));
                DriveConfig {
                    id,
                    name,
                    backend,
                    native_binding: Some(binding).filter(|s| !s.is_empty()),
                    rest: None,
                    session: None,
                }
            }
            BackendKind::Rest => {
                let section = section(drive_raw, &["rest", "s3"]);
                let prior = prior.and_then(|d| d.rest.as_ref());
                let rest = validate_rest(&id, &section, prior)?;
                DriveConfig { id, name, backend, native_binding: None, rest: Some(rest), session: None }
            }
            BackendKind::Session => {
                let section = section(drive_raw, &["session", "onedrive"]);
                let prior = prior.and_then(|d| d.session.as_ref());
                let session = validate_session(&id, &section, prior)?;
                DriveConfig { id, name, backend, native_binding: None, rest: None, session: Some(session) }
            }
        };
        drives.push(drive);
    }

    Ok(StorageConfigDocument {
        version: STORAGE_CONFIG_VERSION,
        updated_at: now_ms,
        drives,
    })
}

fn first_present(obj: &Value, keys: &[&str]) -> String {
    keys.iter()
        .map(|k| read_str(obj, k))
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

fn section(obj: &Value, keys: &[&str]) -> Value {
    keys.iter()
        .find_map(|k| obj.get(*k).filter(|v| v.is_object()).cloned())
        .unwrap_or_else(|| Value::Object(Default::default()))
}

fn validate_rest(id: &str, raw: &Value, prior: Option<&RestConfig>) -> StorageResult<RestConfig> {
    let endpoint = require(
        or_existing(read_str(raw, "endpoint"), prior.map(|p| p.endpoint.as_str())),
        id,
        "REST endpoint",
    )?;
    let url = reqwest::Url::parse(&endpoint)
        .map_err(|_| StorageError::InvalidInput(format!("drive {id}: malformed REST endpoint")))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(StorageError::InvalidInput(format!(
            "drive {id}: REST endpoint must use http or https"
        )));
    }
    let bucket = require(
        or_existing(read_str(raw, "bucket"), prior.map(|p| p.bucket.as_str())),
        id,
        "REST bucket",
    )?;
    let mut region = or_existing(read_str(raw, "region"), prior.map(|p| p.region.as_str()));
    if region.is_empty() {
        region = DEFAULT_REGION.to_string();
    }
    let access_key_id = require(
        or_existing(read_str(raw, "accessKeyId"), prior.map(|p| p.access_key_id.as_str())),
        id,
        "REST access key id",
    )?;
    let secret_access_key = require(
        or_existing(read_str(raw, "secretAccessKey"), prior.map(|p| p.secret_access_key.as_str())),
        id,
        "REST secret access key",
    )?;
    let force_path_style = raw
        .get("forcePathStyle")
        .and_then(|v| v.as_bool())
        .or(prior.map(|p| p.force_path_style))
        .unwrap_or(true);

    Ok(RestConfig {
        endpoint: url.to_string(),
        bucket,
        region,
        access_key_id,
        secret_access_key,
        force_path_style,
    })
}

fn validate_session(
    id: &str,
    raw: &Value,
    prior: Option<&SessionConfig>,
) -> StorageResult<SessionConfig> {
    let client_id = require(
        or_existing(read_str(raw, "clientId"), prior.map(|p| p.client_id.as_str())),
        id,
        "session client id",
    )?;
    let client_secret = require(
        or_existing(read_str(raw, "clientSecret"), prior.map(|p| p.client_secret.as_str())),
        id,
        "session client secret",
    )?;
    let refresh_token = require(
        or_existing(read_str(raw, "refreshToken"), prior.map(|p| p.refresh_token.as_str())),
        id,
        "session refresh token",
    )?;
    let mut tenant_id = or_existing(read_str(raw, "tenantId"), prior.map(|p| p.tenant_id.as_str()));
    if tenant_id.is_empty() {
        tenant_id = DEFAULT_TENANT.to_string();
    }
    let drive_id = or_existing(read_str(raw, "driveId"), prior.and_then(|p| p.drive_id.as_deref()));
    let mut root_path = normalize_root_path(&read_str(raw, "rootPath"));
    if root_path.is_empty() {
        root_path = prior.map(|p| normalize_root_path(&p.root_path)).unwrap_or_default();
    }
    let chunk_size = raw
        .get("chunkSize")
        .and_then(|v| v.as_u64())
        .or(prior.and_then(|p| p.chunk_size));
    let api_base = or_existing(read_str(raw, "apiBase"), prior.map(|p| p.api_base.as_str()));
    let auth_base = or_existing(read_str(raw, "authBase"), prior.map(|p| p.auth_base.as_str()));

    Ok(SessionConfig {
        client_id,
        client_secret,
        refresh_token,
        tenant_id,
        drive_id: Some(drive_id).filter(|s| !s.is_empty()),
        root_path,
        chunk_size,
        api_base: if api_base.is_empty() { default_api_base() } else { api_base },
        auth_base: if auth_base.is_empty() { default_oauth_base() } else { auth_base },
    })
}

// ── Public (masked) view ──

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicStorageConfig {
    pub version: u32,
    pub updated_at: i64,
    pub drives: Vec<PublicDriveConfig>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicDriveConfig {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub backend: BackendKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_binding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rest: Option<PublicRestConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<PublicSessionConfig>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicRestConfig {
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub force_path_style: bool,
    pub access_key_id_preview: String,
    pub has_secret_access_key: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicSessionConfig {
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drive_id: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub root_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u64>,
    pub client_id_preview: String,
    pub has_client_secret: bool,
    pub has_refresh_token: bool,
}

/// `abcd...wxyz` for long values, `***` for short ones, empty stays empty.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    match chars.len() {
        0 => String::new(),
        1..=8 => "***".to_string(),
        n => {
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[n - 4..].iter().collect();
            format!("{head}...{tail}")
        }
    }
}

impl DriveConfig {
    pub fn to_public(&self) -> PublicDriveConfig {
        PublicDriveConfig {
            id: normalize_drive_id(&self.id),
            name: self.name.clone(),
            backend: self.backend,
            native_binding: self.native_binding.clone(),
            rest: self.rest.as_ref().map(|r| PublicRestConfig {
                endpoint: r.endpoint.clone(),
                bucket: r.bucket.clone(),
                region: r.region.clone(),
                force_path_style: r.force_path_style,
                access_key_id_preview: mask_secret(&r.access_key_id),
                has_secret_access_key: !r.secret_access_key.is_empty(),
            }),
            session: self.session.as_ref().map(|s| PublicSessionConfig {
                tenant_id: s.tenant_id.clone(),
                drive_id: s.drive_id.clone(),
                root_path: s.root_path.clone(),
                chunk_size: s.chunk_size,
                client_id_preview: mask_secret(&s.client_id),
                has_client_secret: !s.client_secret.is_empty(),
                has_refresh_token: !s.refresh_token.is_empty(),
            }),
        }
    }
}

impl StorageConfigDocument {
    pub fn to_public(&self) -> PublicStorageConfig {
        PublicStorageConfig {
            version: self.version,
            updated_at: self.updated_at,
            drives: self.drives.iter().map(DriveConfig::to_public).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_env_drive_key() {
        assert_eq!(env_drive_key("docs"), "DOCS");
        assert_eq!(env_drive_key("my-docs"), "MY_DOCS");
        assert_eq!(env_drive_key("--Team..Share--"), "TEAM_SHARE");
        assert_eq!(env_drive_key(""), "");
    }

    #[test]
    fn test_drive_id_validation() {
        assert!(is_valid_drive_id("docs"));
        assert!(is_valid_drive_id("my_docs-2"));
        assert!(!is_valid_drive_id("-docs"));
        assert!(!is_valid_drive_id("Docs"));
        assert!(!is_valid_drive_id(&"a".repeat(64)));
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "");
        assert_eq!(mask_secret("short"), "***");
        assert_eq!(mask_secret("AKIAABCDEFGH1234"), "AKIA...1234");
    }

    #[test]
    fn test_parse_persisted_aliases() {
        let doc: StorageConfigDocument = serde_json::from_value(json!({
            "version": 1,
            "updatedAt": 10,
            "drives": [
                { "id": "Photos", "backend": "s3", "s3": {
                    "endpoint": "https://s3.example.com", "bucket": "b",
                    "accessKeyId": "AK", "secretAccessKey": "SK" } },
                { "id": "legacy", "backend": "r2", "r2Binding": "LEGACY" }
            ]
        }))
        .unwrap();
        let photos = doc.find_drive("photos").unwrap();
        assert_eq!(photos.backend, BackendKind::Rest);
        let rest = photos.rest.as_ref().unwrap();
        assert_eq!(rest.region, "auto");
        assert!(rest.force_path_style);
        assert_eq!(doc.find_drive("LEGACY").unwrap().native_binding.as_deref(), Some("LEGACY"));
    }

    #[test]
    fn test_validate_inherits_secrets() {
        let existing = validate_storage_config_input(
            &json!({ "drives": [{ "id": "docs", "backend": "rest", "rest": {
                "endpoint": "https://s3.example.com", "bucket": "b",
                "accessKeyId": "AKIA1234", "secretAccessKey": "secret" } }] }),
            None,
            1,
        )
        .unwrap();

        let updated = validate_storage_config_input(
            &json!({ "drives": [{ "id": "DOCS", "backend": "rest", "rest": { "bucket": "b2" } }] }),
            Some(&existing),
            2,
        )
        .unwrap();

        let rest = updated.drives[0].rest.as_ref().unwrap();
        assert_eq!(updated.drives[0].id, "docs");
        assert_eq!(rest.bucket, "b2");
        assert_eq!(rest.secret_access_key, "secret");
        assert_eq!(updated.updated_at, 2);
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let dup = json!({ "drives": [
            { "id": "a", "backend": "native" },
            { "id": "A", "backend": "native" }
        ]});
        assert!(validate_storage_config_input(&dup, None, 0).is_err());

        let bad_scheme = json!({ "drives": [{ "id": "a", "backend": "rest", "rest": {
            "endpoint": "ftp://x", "bucket": "b", "accessKeyId": "k", "secretAccessKey": "s" } }] });
        assert!(validate_storage_config_input(&bad_scheme, None, 0).is_err());

        let missing_token = json!({ "drives": [{ "id": "od", "backend": "session", "session": {
            "clientId": "c", "clientSecret": "s" } }] });
        assert!(validate_storage_config_input(&missing_token, None, 0).is_err());

        assert!(validate_storage_config_input(&json!({}), None, 0).is_err());
    }

    #[test]
    fn test_validate_session_defaults() {
        let doc = validate_storage_config_input(
            &json!({ "drives": [{ "id": "od", "backend": "onedrive", "onedrive": {
                "clientId": "client-1234567", "clientSecret": "s", "refreshToken": "r",
                "rootPath": "/Apps/Drive/" } }] }),
            None,
            0,
        )
        .unwrap();
        let session = doc.drives[0].session.as_ref().unwrap();
        assert_eq!(session.tenant_id, "common");
        assert_eq!(session.root_path, "Apps/Drive");
        assert_eq!(session.api_base, DEFAULT_GRAPH_API_BASE);

        let public = doc.to_public();
        let view = public.drives[0].session.as_ref().unwrap();
        assert_eq!(view.client_id_preview, "clie...4567");
        assert!(view.has_client_secret);
    }
}

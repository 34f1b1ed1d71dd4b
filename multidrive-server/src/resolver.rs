//! Per-request backend selection.
//!
//! Precedence, first match wins:
//! 1. persisted drive record
//! 2. `S3_{DRIVE}_*` environment override
//! 3. native binding named after the drive
//! 4. global `S3_*` environment defaults
//! 5. native binding `BUCKET`

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use multidrive_common::backend::ObjectBackend;
use multidrive_common::config::{
    env_drive_key, normalize_drive_id, RestConfig, StorageConfigDocument, DEFAULT_REGION,
};
use multidrive_common::error::{StorageError, StorageResult};

use crate::backend::native::NativeBindings;
use crate::backend::rest::RestObjectBackend;
use crate::backend::token_cache::TokenCache;
use crate::backend::{from_drive_config, native_backend};

pub const DEFAULT_BINDING: &str = "BUCKET";

/// Snapshot of environment variables, captured once at startup.
#[derive(Debug, Clone, Default)]
pub struct EnvLayer {
    vars: HashMap<String, String>,
}

impl EnvLayer {
    pub fn from_process() -> Self {
        Self::from_pairs(std::env::vars())
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Trimmed value, treating blank as unset.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// First of `names` that is set.
    pub fn first(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|n| self.get(n))
    }
}

/// Where a drive's backend came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Persisted,
    EnvOverride,
    NamedBinding,
    GlobalEnv,
    DefaultBinding,
}

pub struct ResolvedDrive {
    pub drive_id: String,
    pub source: ResolutionSource,
    pub backend: Arc<dyn ObjectBackend>,
}

impl std::fmt::Debug for ResolvedDrive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedDrive")
            .field("drive_id", &self.drive_id)
            .field("source", &self.source)
            .field("kind", &self.backend.kind())
            .finish()
    }
}

pub struct BackendResolver {
    env: EnvLayer,
    bindings: NativeBindings,
    tokens: Arc<TokenCache>,
}

impl BackendResolver {
    pub fn new(env: EnvLayer, bindings: NativeBindings) -> Self {
        Self {
            env,
            bindings,
            tokens: Arc::new(TokenCache::new()),
        }
    }

    pub fn bindings(&self) -> &NativeBindings {
        &self.bindings
    }

    /// Pick exactly one backend for `drive_id`. Configuration problems are
    /// reported before any network traffic.
    pub fn resolve(
        &self,
        drive_id: &str,
        persisted: Option<&StorageConfigDocument>,
    ) -> StorageResult<ResolvedDrive> {
        let drive_id = normalize_drive_id(drive_id);
        let resolved = |source, backend| ResolvedDrive {
            drive_id: drive_id.clone(),
            source,
            backend,
        };

        if let Some(record) = persisted.and_then(|doc| doc.find_drive(&drive_id)) {
            let backend = from_drive_config(record, &self.bindings, self.tokens.clone())?;
            debug!(drive = %drive_id, kind = %backend.kind(), "Resolved drive from persisted config");
            return Ok(resolved(ResolutionSource::Persisted, backend));
        }

        if let Some(rest) = self.drive_override(&drive_id)? {
            debug!(drive = %drive_id, "Resolved drive from environment override");
            return Ok(resolved(ResolutionSource::EnvOverride, Arc::new(RestObjectBackend::new(rest)?)));
        }

        let env_key = env_drive_key(&drive_id);
        for name in [drive_id.as_str(), env_key.as_str()] {
            if !name.is_empty() && self.bindings.contains(name) {
                debug!(drive = %drive_id, binding = %name, "Resolved drive to named binding");
                return Ok(resolved(ResolutionSource::NamedBinding, native_backend(&self.bindings, name)?));
            }
        }

        if let Some(rest) = self.global_rest() {
            debug!(drive = %drive_id, "Resolved drive from global REST settings");
            return Ok(resolved(ResolutionSource::GlobalEnv, Arc::new(RestObjectBackend::new(rest)?)));
        }

        if self.bindings.contains(DEFAULT_BINDING) {
            return Ok(resolved(
                ResolutionSource::DefaultBinding,
                native_backend(&self.bindings, DEFAULT_BINDING)?,
            ));
        }

        Err(StorageError::config(format!(
            "no storage backend configured for drive '{}'",
            drive_id
        )))
    }

    fn global_endpoint(&self) -> Option<&str> {
        self.env.get("S3_ENDPOINT")
    }

    fn global_bucket(&self) -> Option<&str> {
        self.env.get("S3_BUCKET")
    }

    fn global_access_key(&self) -> Option<&str> {
        self.env.first(&["S3_ACCESS_KEY_ID", "AWS_ACCESS_KEY_ID"])
    }

    fn global_secret(&self) -> Option<&str> {
        self.env.first(&["S3_SECRET_ACCESS_KEY", "AWS_SECRET_ACCESS_KEY"])
    }

    fn global_region(&self) -> Option<&str> {
        self.env.first(&["S3_REGION", "AWS_REGION"])
    }

    /// `S3_{DRIVE}_*` settings, gaps filled from the globals. `Ok(None)` when
    /// no override variable is set at all.
    fn drive_override(&self, drive_id: &str) -> StorageResult<Option<RestConfig>> {
        let key = env_drive_key(drive_id);
        if key.is_empty() {
            return Ok(None);
        }
        let name = |field: &str| format!("S3_{}_{}", key, field);
        let endpoint = self.env.get(&name("ENDPOINT"));
        let bucket = self.env.get(&name("BUCKET"));
        let access_key = self.env.get(&name("ACCESS_KEY_ID"));
        let secret = self.env.get(&name("SECRET_ACCESS_KEY"));
        let region = self.env.get(&name("REGION"));

        let any_set = [endpoint, bucket, access_key, secret, region]
            .iter()
            .any(Option::is_some);
        if !any_set {
            return Ok(None);
        }

        let endpoint = endpoint.or(self.global_endpoint());
        let bucket = bucket.or(self.global_bucket());
        let access_key = access_key.or(self.global_access_key());
        let secret = secret.or(self.global_secret());
        let region = region.or(self.global_region()).unwrap_or(DEFAULT_REGION);

        let mut missing = Vec::new();
        if endpoint.is_none() {
            missing.push(name("ENDPOINT"));
        }
        if bucket.is_none() {
            missing.push(name("BUCKET"));
        }
        if access_key.is_none() {
            missing.push(name("ACCESS_KEY_ID"));
        }
        if secret.is_none() {
            missing.push(name("SECRET_ACCESS_KEY"));
        }
        match (endpoint, bucket, access_key, secret) {
            (Some(endpoint), Some(bucket), Some(access_key), Some(secret)) => Ok(Some(RestConfig {
                endpoint: endpoint.to_string(),
                bucket: bucket.to_string(),
                region: region.to_string(),
                access_key_id: access_key.to_string(),
                secret_access_key: secret.to_string(),
                force_path_style: true,
            })),
            _ => Err(StorageError::config(format!(
                "incomplete REST override for drive '{}': missing {}",
                drive_id,
                missing.join(", ")
            ))),
        }
    }

    fn global_rest(&self) -> Option<RestConfig> {
        Some(RestConfig {
            endpoint: self.global_endpoint()?.to_string(),
            bucket: self.global_bucket()?.to_string(),
            region: self.global_region().unwrap_or(DEFAULT_REGION).to_string(),
            access_key_id: self.global_access_key()?.to_string(),
            secret_access_key: self.global_secret()?.to_string(),
            force_path_style: true,
        })
    }
}

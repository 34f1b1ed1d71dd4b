pub mod capsule;
pub mod directory;
pub mod native;
pub mod rest;
pub mod session;
pub mod sigv4;
pub mod token_cache;
pub mod xml;

use std::sync::Arc;

use multidrive_common::backend::{BackendKind, ObjectBackend};
use multidrive_common::config::DriveConfig;
use multidrive_common::error::{StorageError, StorageResult};

use self::native::{NativeBindings, NativeObjectBackend};
use self::rest::RestObjectBackend;
use self::session::SessionObjectBackend;
use self::token_cache::TokenCache;

/// Construct the backend a persisted drive record names.
///
/// A record whose backend section is missing, or that names an unregistered
/// native binding, is a configuration error. Native records without a
/// binding name use the drive id as the name.
pub fn from_drive_config(
    drive: &DriveConfig,
    bindings: &NativeBindings,
    tokens: Arc<TokenCache>,
) -> StorageResult<Arc<dyn ObjectBackend>> {
    match drive.backend {
        BackendKind::Rest => {
            let rest = drive.rest.clone().ok_or_else(|| {
                StorageError::config(format!("drive '{}' has no REST settings", drive.id))
            })?;
            Ok(Arc::new(RestObjectBackend::new(rest)?))
        }
        BackendKind::Session => {
            let session = drive.session.clone().ok_or_else(|| {
                StorageError::config(format!("drive '{}' has no session settings", drive.id))
            })?;
            Ok(Arc::new(SessionObjectBackend::new(session, tokens)?))
        }
        BackendKind::Native => {
            let name = drive
                .native_binding
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(drive.id.as_str());
            native_backend(bindings, name)
        }
    }
}

pub fn native_backend(
    bindings: &NativeBindings,
    name: &str,
) -> StorageResult<Arc<dyn ObjectBackend>> {
    let inner = bindings
        .get(name)
        .ok_or_else(|| StorageError::config(format!("native binding '{}' is not registered", name)))?;
    Ok(Arc::new(NativeObjectBackend::new(name, inner)))
}

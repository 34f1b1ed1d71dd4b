pub mod backend;
pub mod config;
pub mod error;
pub mod types;

pub use backend::{BackendKind, MultipartUpload, ObjectBackend};
pub use error::{StorageError, StorageResult};

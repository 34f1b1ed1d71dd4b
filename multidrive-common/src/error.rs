/// Errors surfaced by every storage backend.
///
/// `NotFound` is only ever produced for operations that require an existing
/// object (copy source, part upload against a vanished target); `head` and
/// `get` report a missing key as `Ok(None)` instead.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("{action} failed: HTTP {status} {body}")]
    BackendProtocol {
        action: String,
        status: u16,
        body: String,
    },
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Upload session invalid or expired: {0}")]
    SessionInvalid(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    pub fn protocol(action: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        StorageError::BackendProtocol {
            action: action.into(),
            status,
            body: body.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        StorageError::Configuration(msg.into())
    }

    /// HTTP status reported by the backend, when the failure came from one.
    pub fn status(&self) -> Option<u16> {
        match self {
            StorageError::BackendProtocol { status, .. } => Some(*status),
            StorageError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_)) || self.status() == Some(404)
    }
}

/// Convert a non-2xx response into `BackendProtocol`, keeping the body.
///
/// Some S3 implementations answer a missing key with 400 + `NoSuchKey`; that
/// case is reported with status 404 so callers can treat it uniformly.
pub async fn ensure_success(
    resp: reqwest::Response,
    action: &str,
) -> StorageResult<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    let status = if status == 400 && mentions_no_such_key(&body) {
        404
    } else {
        status
    };
    Err(StorageError::protocol(action, status, body))
}

pub fn mentions_no_such_key(body: &str) -> bool {
    body.to_ascii_lowercase().contains("nosuchkey")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = StorageError::protocol("S3 PutObject", 403, "<Error>AccessDenied</Error>");
        assert_eq!(
            err.to_string(),
            "S3 PutObject failed: HTTP 403 <Error>AccessDenied</Error>"
        );
        assert_eq!(err.status(), Some(403));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_not_found_detection() {
        assert!(StorageError::NotFound("a".into()).is_not_found());
        assert!(StorageError::protocol("x", 404, "").is_not_found());
        assert!(!StorageError::SessionInvalid("bad".into()).is_not_found());
    }

    #[test]
    fn test_no_such_key_match() {
        assert!(mentions_no_such_key("<Code>NoSuchKey</Code>"));
        assert!(mentions_no_such_key("nosuchkey"));
        assert!(!mentions_no_such_key("<Code>AccessDenied</Code>"));
    }
}

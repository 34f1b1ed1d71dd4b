use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// Tokens within this window of expiry are treated as expired.
const REFRESH_MARGIN_SECS: i64 = 30;

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Process-wide OAuth access tokens keyed by credential tuple.
///
/// Lookups and inserts never hold the lock across an await; two requests
/// racing on an expired token may both refresh, and the later write wins.
pub struct TokenCache {
    tokens: RwLock<HashMap<String, CachedToken>>,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCache {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub fn cache_key(
        client_id: &str,
        tenant_id: &str,
        drive_id: Option<&str>,
        refresh_token: &str,
    ) -> String {
        format!(
            "{}:{}:{}:{}",
            client_id,
            tenant_id,
            drive_id.unwrap_or_default(),
            refresh_token
        )
    }

    /// A cached token still valid at `now`, if any.
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<String> {
        let tokens = self.tokens.read().unwrap();
        let cached = tokens.get(key)?;
        if now < cached.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) {
            Some(cached.access_token.clone())
        } else {
            None
        }
    }

    pub fn insert(&self, key: &str, access_token: String, expires_at: DateTime<Utc>) {
        let mut tokens = self.tokens.write().unwrap();
        tokens.insert(
            key.to_string(),
            CachedToken {
                access_token,
                expires_at,
            },
        );
        debug!(expires_at = %expires_at, cached = tokens.len(), "Token cache: stored access token");
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.tokens.read().unwrap().len()
    }
}

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::driver::{DriverOptions, DEFAULT_CONCURRENCY, DEFAULT_RETRIES, MIN_CHUNK_SIZE};

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub server_url: String,
    #[serde(default)]
    pub drive_id: Option<String>,
    /// Part size in megabytes (10^6 bytes). Raised to 5 MiB when smaller.
    #[serde(default = "default_chunk_size_mb")]
    pub chunk_size_mb: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_chunk_size_mb() -> u64 {
    50
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

fn default_retry_delay_ms() -> u64 {
    800
}

impl UploadConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        let config: UploadConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let url = self.server_url.trim();
        if url.is_empty() {
            anyhow::bail!("server_url must not be empty");
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            anyhow::bail!("server_url must be an http(s) URL: {}", url);
        }
        if self.chunk_size_mb == 0 {
            anyhow::bail!("chunk_size_mb must be at least 1");
        }
        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be at least 1");
        }
        Ok(())
    }

    pub fn driver_options(&self) -> DriverOptions {
        DriverOptions {
            chunk_size: self.chunk_size_mb.saturating_mul(1_000_000).max(MIN_CHUNK_SIZE),
            concurrency: self.concurrency,
            retries: self.retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

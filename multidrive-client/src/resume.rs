use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use multidrive_common::types::PartResult;

/// What a later run needs to continue an interrupted upload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResumeState {
    pub upload_id: String,
    /// Part size the upload was started with; 0 means "use the configured size".
    #[serde(default)]
    pub chunk_size: u64,
    /// The server wants parts one at a time, in order.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sequential: bool,
    /// Acknowledged parts. Dense or sparse; each entry is placed by its own
    /// part number.
    #[serde(default)]
    pub uploaded_parts: Vec<Option<PartResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl ResumeState {
    pub fn new(upload_id: impl Into<String>, uploaded_parts: Vec<Option<PartResult>>) -> Self {
        Self {
            upload_id: upload_id.into(),
            uploaded_parts,
            ..Default::default()
        }
    }

    /// True when this state was written for the same key and source size.
    pub fn matches(&self, key: &str, size: u64) -> bool {
        self.key.as_deref().map_or(true, |k| k == key) && self.size.map_or(true, |s| s == size)
    }

    pub fn acknowledged(&self) -> usize {
        self.uploaded_parts.iter().flatten().count()
    }
}

/// `<file>.multidrive-resume.json` beside the source.
pub fn state_path_for(source: &Path) -> PathBuf {
    let mut name = source
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".multidrive-resume.json");
    source.with_file_name(name)
}

pub async fn load(path: &Path) -> anyhow::Result<Option<ResumeState>> {
    match tokio::fs::read(path).await {
        Ok(raw) => {
            let state = serde_json::from_slice(&raw)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
            Ok(Some(state))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(anyhow::anyhow!("Failed to read {}: {}", path.display(), e)),
    }
}

pub async fn save(path: &Path, state: &ResumeState) -> anyhow::Result<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, serde_json::to_vec_pretty(state)?).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

pub async fn remove(path: &Path) -> anyhow::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

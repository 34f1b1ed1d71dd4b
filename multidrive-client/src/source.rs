use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Bytes to upload. File sources are read one part range at a time.
#[derive(Debug, Clone)]
pub enum PartSource {
    Memory(Bytes),
    File { path: PathBuf, len: u64 },
}

impl PartSource {
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        PartSource::Memory(data.into())
    }

    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        Ok(PartSource::File {
            path: path.to_path_buf(),
            len: meta.len(),
        })
    }

    pub fn len(&self) -> u64 {
        match self {
            PartSource::Memory(b) => b.len() as u64,
            PartSource::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn read_range(&self, offset: u64, len: u64) -> std::io::Result<Bytes> {
        match self {
            PartSource::Memory(b) => {
                let start = (offset as usize).min(b.len());
                let end = (start + len as usize).min(b.len());
                Ok(b.slice(start..end))
            }
            PartSource::File { path, .. } => {
                let mut file = tokio::fs::File::open(path).await?;
                file.seek(std::io::SeekFrom::Start(offset)).await?;
                let mut buf = vec![0u8; len as usize];
                file.read_exact(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

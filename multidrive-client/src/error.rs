use multidrive_common::error::StorageError;
use multidrive_common::types::PartResult;

use crate::resume::ResumeState;

/// Failures of a chunked upload job.
///
/// Variants raised after the upload id is known carry the parts the server
/// has acknowledged so far, indexed by `part_number - 1`, so the caller can
/// resume without re-sending them.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("failed to begin upload of {key}: {source}")]
    Begin {
        key: String,
        #[source]
        source: StorageError,
    },
    #[error("part {part_number}/{total_parts} of upload {upload_id} failed after all retries: {source}")]
    PartUploadExhausted {
        upload_id: String,
        part_number: u32,
        total_parts: u32,
        chunk_size: u64,
        sequential: bool,
        uploaded_parts: Vec<Option<PartResult>>,
        #[source]
        source: StorageError,
    },
    #[error("failed to complete upload {upload_id}: {source}")]
    Complete {
        upload_id: String,
        chunk_size: u64,
        sequential: bool,
        uploaded_parts: Vec<Option<PartResult>>,
        #[source]
        source: StorageError,
    },
    #[error("invalid resume state: {0}")]
    InvalidResume(String),
    #[error("source is empty")]
    EmptySource,
    #[error("upload worker panicked: {0}")]
    Worker(#[from] tokio::task::JoinError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// State to continue from, when the failure left a live upload behind.
    pub fn resume_state(&self) -> Option<ResumeState> {
        match self {
            UploadError::PartUploadExhausted {
                upload_id,
                chunk_size,
                sequential,
                uploaded_parts,
                ..
            }
            | UploadError::Complete {
                upload_id,
                chunk_size,
                sequential,
                uploaded_parts,
                ..
            } => {
                let mut state = ResumeState::new(upload_id.clone(), uploaded_parts.clone());
                state.chunk_size = *chunk_size;
                state.sequential = *sequential;
                Some(state)
            }
            _ => None,
        }
    }
}

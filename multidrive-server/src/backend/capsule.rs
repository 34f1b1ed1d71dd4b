//! Opaque upload id for range-based upload sessions.
//!
//! The session backend keeps no server-side state between requests: the
//! pre-authorized upload URL and the byte geometry travel inside the upload
//! id itself, as URL-safe unpadded base64 of a small JSON document.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use multidrive_common::error::{StorageError, StorageResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadCapsule {
    pub upload_url: String,
    pub total_size: u64,
    pub chunk_size: u64,
}

impl UploadCapsule {
    pub fn encode(&self) -> StorageResult<String> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Fails closed: anything that does not decode to a usable session is
    /// reported as `SessionInvalid`.
    pub fn decode(upload_id: &str) -> StorageResult<Self> {
        let invalid = || StorageError::SessionInvalid("upload session expired or invalid, restart the upload".into());
        let raw = URL_SAFE_NO_PAD
            .decode(upload_id.trim().trim_end_matches('='))
            .map_err(|_| invalid())?;
        let capsule: UploadCapsule = serde_json::from_slice(&raw).map_err(|_| invalid())?;
        if capsule.upload_url.is_empty() || capsule.total_size == 0 || capsule.chunk_size == 0 {
            return Err(invalid());
        }
        Ok(capsule)
    }

    /// Inclusive byte range covered by `part_number` carrying `len` bytes.
    pub fn part_range(&self, part_number: u32, len: u64) -> StorageResult<(u64, u64)> {
        if part_number == 0 || len == 0 {
            return Err(StorageError::InvalidInput("empty part or part number 0".into()));
        }
        let start = u64::from(part_number - 1) * self.chunk_size;
        if start >= self.total_size {
            return Err(StorageError::InvalidInput(format!(
                "part {} starts past the end of a {} byte upload",
                part_number, self.total_size
            )));
        }
        let end = (start + len - 1).min(self.total_size - 1);
        Ok((start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capsule() -> UploadCapsule {
        UploadCapsule {
            upload_url: "https://upload.example.com/up?sig=a+b/c==&x=\u{00e9}".into(),
            total_size: 25_000_000,
            chunk_size: 10_485_760,
        }
    }

    #[test]
    fn test_capsule_roundtrip_url_safe() {
        let encoded = capsule().encode().unwrap();
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('='));
        assert_eq!(UploadCapsule::decode(&encoded).unwrap(), capsule());
    }

    #[test]
    fn test_capsule_fails_closed() {
        for bad in ["", "not base64!", "e30", "eyJ1cGxvYWRVcmwiOiJ4IiwidG90YWxTaXplIjowLCJjaHVua1NpemUiOjF9"] {
            let err = UploadCapsule::decode(bad).unwrap_err();
            assert!(matches!(err, StorageError::SessionInvalid(_)), "{bad}");
        }
    }

    #[test]
    fn test_part_range() {
        let c = capsule();
        assert_eq!(c.part_range(1, 10_485_760).unwrap(), (0, 10_485_759));
        assert_eq!(c.part_range(3, 4_028_480).unwrap(), (20_971_520, 24_999_999));
        // trailing part larger than what remains is clamped
        assert_eq!(c.part_range(3, 10_485_760).unwrap(), (20_971_520, 24_999_999));
        assert!(c.part_range(0, 1).is_err());
        assert!(c.part_range(4, 1).is_err());
    }
}

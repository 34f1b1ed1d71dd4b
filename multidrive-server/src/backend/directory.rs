//! Filesystem-rooted bucket used as the deployable native binding.
//!
//! Objects live at `{root}/{key}`. Everything the bucket needs besides the
//! object bytes is kept under `{root}/.multidrive/`: JSON metadata sidecars
//! and staged multipart parts. Writes go through a temp file and a rename so
//! readers never observe a partial object.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use walkdir::WalkDir;

use multidrive_common::backend::{BackendKind, ObjectBackend};
use multidrive_common::error::{StorageError, StorageResult};
use multidrive_common::types::{
    normalize_key, sorted_parts, CompletedUpload, CreatedUpload, ListOptions, ListPage,
    MultipartOptions, ObjectBody, ObjectStat, PartResult, PutOptions, PutResult, UploadedPart,
};

const STATE_DIR: &str = ".multidrive";
const LIST_PAGE_SIZE: usize = 1000;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Sidecar {
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(default)]
    custom_metadata: BTreeMap<String, String>,
}

pub struct DirectoryBucket {
    root: PathBuf,
}

impl DirectoryBucket {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Key with empty, `.` and `..` segments dropped.
    fn clean_key(key: &str) -> StorageResult<String> {
        let cleaned = normalize_key(key)
            .split('/')
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
            .collect::<Vec<_>>()
            .join("/");
        if cleaned.is_empty() || cleaned == STATE_DIR || cleaned.starts_with(&format!("{}/", STATE_DIR)) {
            return Err(StorageError::InvalidInput(format!("invalid object key: {:?}", key)));
        }
        Ok(cleaned)
    }

    fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        Ok(self.root.join(Self::clean_key(key)?))
    }

    fn sidecar_path(&self, key: &str) -> StorageResult<PathBuf> {
        let cleaned = Self::clean_key(key)?;
        Ok(self.root.join(STATE_DIR).join("meta").join(format!("{}.json", cleaned)))
    }

    fn upload_dir(&self, upload_id: &str) -> StorageResult<PathBuf> {
        let valid = !upload_id.is_empty()
            && upload_id.chars().all(|c| c.is_ascii_hexdigit() || c == '-');
        if !valid {
            return Err(StorageError::SessionInvalid(format!("unknown upload id {:?}", upload_id)));
        }
        Ok(self.root.join(STATE_DIR).join("uploads").join(upload_id))
    }

    /// temp file → fsync → rename.
    async fn write_atomic(dest: &Path, data: &[u8]) -> StorageResult<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = temp_path_for(dest);
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, dest).await?;
        Ok(())
    }

    async fn read_sidecar(&self, key: &str) -> Sidecar {
        let Ok(path) = self.sidecar_path(key) else {
            return Sidecar::default();
        };
        match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
                warn!(key = %key, error = %e, "Ignoring unreadable metadata sidecar");
                Sidecar::default()
            }),
            Err(_) => Sidecar::default(),
        }
    }

    async fn write_sidecar(&self, key: &str, sidecar: &Sidecar) -> StorageResult<()> {
        let path = self.sidecar_path(key)?;
        if sidecar.content_type.is_none() && sidecar.custom_metadata.is_empty() {
            remove_if_exists(&path).await?;
            return Ok(());
        }
        Self::write_atomic(&path, &serde_json::to_vec(sidecar)?).await
    }

    async fn stat(&self, key: &str, path: &Path) -> StorageResult<Option<ObjectStat>> {
        let meta = match tokio::fs::metadata(path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let sidecar = self.read_sidecar(key).await;
        let content_type = sidecar
            .content_type
            .or_else(|| mime_guess::from_path(path).first().map(|m| m.to_string()));
        let mut stat = ObjectStat::new(key, meta.len(), system_time_to_chrono(meta.modified()?))
            .with_content_type(content_type);
        stat.custom_metadata = sidecar.custom_metadata;
        Ok(Some(stat))
    }

    /// Every object key under the root, sorted. The walk runs on the
    /// blocking pool.
    async fn walk_keys(&self) -> StorageResult<Vec<(String, u64, DateTime<Utc>)>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || walk_keys(&root))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))
    }
}

fn walk_keys(root: &Path) -> Vec<(String, u64, DateTime<Utc>)> {
    let mut keys = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.file_name() != STATE_DIR);
    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if is_temp_name(&key) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let mtime = system_time_to_chrono(meta.modified().unwrap_or(SystemTime::UNIX_EPOCH));
        keys.push((key, meta.len(), mtime));
    }
    keys.sort_by(|a, b| a.0.cmp(&b.0));
    keys
}

fn temp_path_for(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4()))
}

fn is_temp_name(key: &str) -> bool {
    let name = key.rsplit('/').next().unwrap_or(key);
    name.starts_with('.') && name.ends_with(".tmp")
}

async fn remove_if_exists(path: &Path) -> StorageResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn system_time_to_chrono(t: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(t)
}

enum Entry {
    Object(ObjectStat),
    Prefix(String),
}

#[async_trait]
impl ObjectBackend for DirectoryBucket {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    async fn list(&self, opts: &ListOptions) -> StorageResult<ListPage> {
        let prefix = opts.prefix.clone().unwrap_or_default();
        let delimiter = opts.delimiter.clone().filter(|d| !d.is_empty());
        let offset: usize = match opts.cursor.as_deref().filter(|c| !c.is_empty()) {
            Some(c) => c
                .parse()
                .map_err(|_| StorageError::InvalidInput(format!("invalid list cursor {:?}", c)))?,
            None => 0,
        };

        let mut entries: Vec<Entry> = Vec::new();
        for (key, size, mtime) in self.walk_keys().await? {
            let Some(rest) = key.strip_prefix(prefix.as_str()) else {
                continue;
            };
            if let Some(d) = delimiter.as_deref() {
                if let Some(idx) = rest.find(d) {
                    let common = format!("{}{}", prefix, &rest[..idx + d.len()]);
                    let duplicate = matches!(entries.last(), Some(Entry::Prefix(p)) if *p == common);
                    if !duplicate {
                        entries.push(Entry::Prefix(common));
                    }
                    continue;
                }
            }
            entries.push(Entry::Object(ObjectStat::new(key, size, mtime)));
        }

        let total = entries.len();
        let end = (offset + LIST_PAGE_SIZE).min(total);
        let mut page = ListPage::default();
        for entry in entries.into_iter().skip(offset).take(end.saturating_sub(offset)) {
            match entry {
                Entry::Object(stat) => {
                    let sidecar = self.read_sidecar(&stat.key).await;
                    let mut stat = stat.with_content_type(sidecar.content_type);
                    stat.custom_metadata = sidecar.custom_metadata;
                    page.objects.push(stat);
                }
                Entry::Prefix(p) => page.common_prefixes.push(p),
            }
        }
        page.truncated = end < total;
        page.cursor = page.truncated.then(|| end.to_string());
        Ok(page)
    }

    async fn head(&self, key: &str) -> StorageResult<Option<ObjectStat>> {
        let path = self.object_path(key)?;
        self.stat(key, &path).await
    }

    async fn get(&self, key: &str) -> StorageResult<Option<ObjectBody>> {
        let path = self.object_path(key)?;
        let Some(stat) = self.stat(key, &path).await? else {
            return Ok(None);
        };
        let file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let body = ReaderStream::new(file).map(|r| r.map_err(StorageError::from));
        Ok(Some(ObjectBody {
            stat,
            body: Box::pin(body),
        }))
    }

    async fn put(&self, key: &str, body: Bytes, opts: &PutOptions) -> StorageResult<PutResult> {
        let dest = self.object_path(key)?;
        Self::write_atomic(&dest, &body).await?;
        let sidecar = Sidecar {
            content_type: opts.content_type.clone().filter(|s| !s.is_empty()),
            custom_metadata: opts
                .custom_metadata
                .iter()
                .filter(|(_, v)| !v.is_empty())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        self.write_sidecar(key, &sidecar).await?;
        debug!(key = %key, size = body.len(), "Directory upload complete");
        Ok(PutResult {
            key: key.to_string(),
            size: body.len() as u64,
            uploaded: Utc::now(),
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        remove_if_exists(&self.object_path(key)?).await?;
        remove_if_exists(&self.sidecar_path(key)?).await?;
        debug!(key = %key, "Directory delete complete");
        Ok(())
    }

    async fn copy_object(&self, src: &str, dst: &str) -> StorageResult<()> {
        let src_path = self.object_path(src)?;
        let dst_path = self.object_path(dst)?;
        if !tokio::fs::try_exists(&src_path).await? {
            return Err(StorageError::NotFound(src.to_string()));
        }
        if let Some(parent) = dst_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = temp_path_for(&dst_path);
        tokio::fs::copy(&src_path, &tmp).await?;
        tokio::fs::rename(&tmp, &dst_path).await?;
        let sidecar = self.read_sidecar(src).await;
        self.write_sidecar(dst, &sidecar).await?;
        debug!(src = %src, dst = %dst, "Directory copy complete");
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        key: &str,
        opts: &MultipartOptions,
    ) -> StorageResult<CreatedUpload> {
        Self::clean_key(key)?;
        let upload_id = uuid::Uuid::new_v4().to_string();
        let dir = self.upload_dir(&upload_id)?;
        tokio::fs::create_dir_all(&dir).await?;
        let sidecar = Sidecar {
            content_type: opts.content_type.clone().filter(|s| !s.is_empty()),
            custom_metadata: opts.custom_metadata.clone(),
        };
        Self::write_atomic(&dir.join("upload.json"), &serde_json::to_vec(&sidecar)?).await?;
        debug!(key = %key, upload_id = %upload_id, "Directory multipart upload created");
        Ok(CreatedUpload {
            key: key.to_string(),
            upload_id,
            chunk_size: None,
            sequential: false,
        })
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> StorageResult<UploadedPart> {
        if part_number == 0 {
            return Err(StorageError::InvalidInput("part numbers start at 1".into()));
        }
        let dir = self.upload_dir(upload_id)?;
        if !tokio::fs::try_exists(&dir).await? {
            return Err(StorageError::SessionInvalid(format!("unknown upload id {:?}", upload_id)));
        }
        Self::write_atomic(&dir.join(format!("{:05}.part", part_number)), &body).await?;
        let etag = format!("\"{}-{}\"", part_number, body.len());
        debug!(key = %key, part_number, "Directory part staged");
        Ok(UploadedPart { etag })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[PartResult],
    ) -> StorageResult<CompletedUpload> {
        let dir = self.upload_dir(upload_id)?;
        if !tokio::fs::try_exists(&dir).await? {
            return Err(StorageError::SessionInvalid(format!("unknown upload id {:?}", upload_id)));
        }
        let parts = sorted_parts(parts);
        if parts.is_empty() {
            return Err(StorageError::InvalidInput("no parts to complete".into()));
        }

        let sidecar: Sidecar = match tokio::fs::read(dir.join("upload.json")).await {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(_) => Sidecar::default(),
        };

        let dest = self.object_path(key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = temp_path_for(&dest);
        let mut out = tokio::fs::File::create(&tmp_path).await?;
        let size = match append_parts(&dir, &parts, &mut out).await {
            Ok(size) => size,
            Err(e) => {
                drop(out);
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(e);
            }
        };
        out.sync_all().await?;
        drop(out);
        tokio::fs::rename(&tmp_path, &dest).await?;
        self.write_sidecar(key, &sidecar).await?;
        tokio::fs::remove_dir_all(&dir).await?;

        let etag = format!("\"{}-{}\"", size, parts.len());
        debug!(key = %key, parts = parts.len(), size, "Directory multipart upload complete");
        Ok(CompletedUpload { etag })
    }
}

/// Stream staged parts into `out` in the given order, checking each etag.
async fn append_parts(
    dir: &Path,
    parts: &[PartResult],
    out: &mut tokio::fs::File,
) -> StorageResult<u64> {
    let mut total = 0u64;
    for part in parts {
        let path = dir.join(format!("{:05}.part", part.part_number));
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::InvalidInput(format!(
                    "part {} was never uploaded",
                    part.part_number
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();
        if part.etag != format!("\"{}-{}\"", part.part_number, len) {
            return Err(StorageError::InvalidInput(format!(
                "etag mismatch for part {}",
                part.part_number
            )));
        }
        total += tokio::io::copy(&mut file, out).await?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_bucket_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = DirectoryBucket::new(dir.path());

        let mut opts = PutOptions {
            content_type: Some("text/markdown".into()),
            ..Default::default()
        };
        opts.custom_metadata.insert("thumbnail".into(), "t.png".into());
        bucket
            .put("test/subdir/file.txt", Bytes::from("hello world"), &opts)
            .await
            .unwrap();

        let stat = bucket.head("test/subdir/file.txt").await.unwrap().unwrap();
        assert_eq!(stat.size, 11);
        assert_eq!(stat.content_type.as_deref(), Some("text/markdown"));
        assert_eq!(stat.custom_metadata["thumbnail"], "t.png");

        let body = bucket.get("test/subdir/file.txt").await.unwrap().unwrap();
        assert_eq!(body.into_bytes().await.unwrap(), Bytes::from("hello world"));

        bucket.delete("test/subdir/file.txt").await.unwrap();
        bucket.delete("test/subdir/file.txt").await.unwrap();
        assert!(bucket.head("test/subdir/file.txt").await.unwrap().is_none());
        assert!(bucket.get("test/subdir/file.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_directory_bucket_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = DirectoryBucket::new(dir.path().join("bucket"));

        bucket
            .put("../../../etc/passwd", Bytes::from("x"), &PutOptions::default())
            .await
            .unwrap();
        assert!(dir.path().join("bucket/etc/passwd").exists());

        let err = bucket.put("../..", Bytes::new(), &PutOptions::default()).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));
        let err = bucket.head(".multidrive/meta/x.json").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_directory_bucket_list_delimited() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = DirectoryBucket::new(dir.path());
        for key in ["a.txt", "docs/b.txt", "docs/c.txt", "docs/sub/d.txt", "img/e.png"] {
            bucket.put(key, Bytes::from("x"), &PutOptions::default()).await.unwrap();
        }

        let root = bucket.list(&ListOptions::delimited("", "/")).await.unwrap();
        let keys: Vec<&str> = root.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a.txt"]);
        assert_eq!(root.common_prefixes, vec!["docs/".to_string(), "img/".to_string()]);
        assert!(!root.truncated);

        let docs = bucket.list(&ListOptions::delimited("docs/", "/")).await.unwrap();
        let keys: Vec<&str> = docs.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["docs/b.txt", "docs/c.txt"]);
        assert_eq!(docs.common_prefixes, vec!["docs/sub/".to_string()]);

        let flat = bucket.list(&ListOptions::prefix("docs/")).await.unwrap();
        assert_eq!(flat.objects.len(), 3);

        let err = bucket
            .list(&ListOptions::default().with_cursor(Some("abc".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_directory_bucket_copy() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = DirectoryBucket::new(dir.path());
        let opts = PutOptions {
            content_type: Some("image/png".into()),
            ..Default::default()
        };
        bucket.put("src.bin", Bytes::from(vec![1u8; 32]), &opts).await.unwrap();
        bucket.copy_object("src.bin", "nested/dst.bin").await.unwrap();

        let stat = bucket.head("nested/dst.bin").await.unwrap().unwrap();
        assert_eq!(stat.size, 32);
        assert_eq!(stat.content_type.as_deref(), Some("image/png"));

        let err = bucket.copy_object("missing", "x").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_directory_bucket_multipart() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = DirectoryBucket::new(dir.path());
        let opts = MultipartOptions {
            content_type: Some("application/zip".into()),
            ..Default::default()
        };
        let created = bucket.create_multipart_upload("archive.zip", &opts).await.unwrap();

        let p2 = bucket
            .upload_part("archive.zip", &created.upload_id, 2, Bytes::from("world"))
            .await
            .unwrap();
        let p1 = bucket
            .upload_part("archive.zip", &created.upload_id, 1, Bytes::from("hello "))
            .await
            .unwrap();
        let parts = vec![
            PartResult { part_number: 2, etag: p2.etag },
            PartResult { part_number: 1, etag: p1.etag },
        ];
        bucket
            .complete_multipart_upload("archive.zip", &created.upload_id, &parts)
            .await
            .unwrap();

        let body = bucket.get("archive.zip").await.unwrap().unwrap();
        assert_eq!(body.stat.content_type.as_deref(), Some("application/zip"));
        assert_eq!(body.into_bytes().await.unwrap(), Bytes::from("hello world"));

        // Staging area is gone, so the session cannot be reused.
        let err = bucket
            .upload_part("archive.zip", &created.upload_id, 3, Bytes::from("!"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SessionInvalid(_)));

        let listed = bucket.list(&ListOptions::default()).await.unwrap();
        assert_eq!(listed.objects.len(), 1);
    }

    #[tokio::test]
    async fn test_directory_bucket_rejects_bad_parts() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = DirectoryBucket::new(dir.path());
        let created = bucket
            .create_multipart_upload("k", &MultipartOptions::default())
            .await
            .unwrap();
        bucket
            .upload_part("k", &created.upload_id, 1, Bytes::from("abc"))
            .await
            .unwrap();

        let wrong = [PartResult { part_number: 1, etag: "\"nope\"".into() }];
        assert!(bucket.complete_multipart_upload("k", &created.upload_id, &wrong).await.is_err());

        let missing = [PartResult { part_number: 2, etag: "\"2-3\"".into() }];
        assert!(bucket.complete_multipart_upload("k", &created.upload_id, &missing).await.is_err());
        // Failed completions leave no object and no temp file behind.
        assert!(bucket.head("k").await.unwrap().is_none());
        assert!(bucket.list(&ListOptions::default()).await.unwrap().objects.is_empty());
        let stray: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(stray.is_empty());

        let err = bucket
            .upload_part("k", "../../etc", 1, Bytes::from("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SessionInvalid(_)));
    }

    #[tokio::test]
    async fn test_directory_bucket_multipart_streams_large_parts() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = DirectoryBucket::new(dir.path());
        let created = bucket
            .create_multipart_upload("media/big.bin", &MultipartOptions::default())
            .await
            .unwrap();

        // Three parts, uploaded out of order, each larger than a copy buffer.
        let chunks: Vec<Vec<u8>> = (0..3u8)
            .map(|n| vec![n + 1; 300 * 1024 + n as usize])
            .collect();
        let mut parts = Vec::new();
        for n in [3u32, 1, 2] {
            let data = Bytes::from(chunks[n as usize - 1].clone());
            let part = bucket
                .upload_part("media/big.bin", &created.upload_id, n, data)
                .await
                .unwrap();
            parts.push(PartResult { part_number: n, etag: part.etag });
        }
        let done = bucket
            .complete_multipart_upload("media/big.bin", &created.upload_id, &parts)
            .await
            .unwrap();

        let expected: Vec<u8> = chunks.concat();
        assert_eq!(done.etag, format!("\"{}-3\"", expected.len()));
        let stat = bucket.head("media/big.bin").await.unwrap().unwrap();
        assert_eq!(stat.size, expected.len() as u64);
        let body = bucket.get("media/big.bin").await.unwrap().unwrap();
        assert_eq!(body.into_bytes().await.unwrap(), Bytes::from(expected));
        assert!(!dir.path().join(".multidrive/uploads").join(&created.upload_id).exists());
    }
}

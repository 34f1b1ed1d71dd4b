//! Client-side chunked upload.
//!
//! A source is split into fixed-size parts which a bounded pool of workers
//! uploads concurrently. Each part is retried with exponential backoff; the
//! first part that exhausts its retries stops new claims, lets in-flight
//! siblings finish, and surfaces everything acknowledged so far so a later
//! run can resume. Completion is issued exactly once, with parts sorted.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use multidrive_common::error::StorageError;
use multidrive_common::types::{sorted_parts, MultipartOptions, PartResult};

use crate::error::UploadError;
use crate::resume::ResumeState;
use crate::source::PartSource;
use crate::transport::{MultipartTransport, PartProgress};

pub const MIN_CHUNK_SIZE: u64 = 5 * 1024 * 1024;
pub const DEFAULT_CHUNK_SIZE: u64 = 50_000_000;
pub const DEFAULT_CONCURRENCY: usize = 3;
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(800);
pub const MAX_JITTER_MS: u64 = 200;

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub chunk_size: u64,
    pub concurrency: usize,
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl DriverOptions {
    /// Chunk size raised to the floor, concurrency raised to one.
    pub fn normalized(mut self) -> Self {
        self.chunk_size = self.chunk_size.max(MIN_CHUNK_SIZE);
        self.concurrency = self.concurrency.max(1);
        self
    }
}

/// Progress of one part, in bytes of the whole object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub part_number: u32,
    /// `(part_number - 1) * chunk_size` plus bytes of this part sent so far.
    pub loaded: u64,
    pub total: u64,
}

pub type ProgressFn = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub key: String,
    pub upload_id: String,
    pub parts: Vec<PartResult>,
    pub size: u64,
}

/// Parts still owed for one upload id.
struct Job {
    key: String,
    upload_id: String,
    chunk_size: u64,
    sequential: bool,
    total_parts: u32,
    slots: Vec<Option<PartResult>>,
}

impl Job {
    fn pending(&self) -> Vec<u32> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(i, _)| i as u32 + 1)
            .collect()
    }
}

/// State shared by the workers of one job.
struct Shared {
    transport: Arc<dyn MultipartTransport>,
    source: PartSource,
    key: String,
    upload_id: String,
    chunk_size: u64,
    retries: u32,
    retry_delay: Duration,
    pending: Vec<u32>,
    next: AtomicUsize,
    failed: AtomicBool,
    slots: Mutex<Vec<Option<PartResult>>>,
    progress: Option<ProgressFn>,
}

pub struct ChunkedUploadDriver {
    transport: Arc<dyn MultipartTransport>,
    options: DriverOptions,
    progress: Option<ProgressFn>,
}

impl ChunkedUploadDriver {
    pub fn new(transport: Arc<dyn MultipartTransport>, options: DriverOptions) -> Self {
        Self {
            transport,
            options: options.normalized(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, f: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(f));
        self
    }

    /// Upload `source` to `key`, starting fresh or continuing `resume`.
    pub async fn upload(
        &self,
        source: PartSource,
        key: &str,
        opts: &MultipartOptions,
        resume: Option<&ResumeState>,
    ) -> Result<UploadOutcome, UploadError> {
        if source.is_empty() {
            return Err(UploadError::EmptySource);
        }
        let size = source.len();

        let job = match resume {
            Some(state) => self.resume_job(key, size, state)?,
            None => {
                let Some(job) = self.begin_job(key, size, opts).await? else {
                    info!(key = %key, "Upload finished without parts");
                    return Ok(UploadOutcome {
                        key: key.to_string(),
                        upload_id: String::new(),
                        parts: Vec::new(),
                        size,
                    });
                };
                job
            }
        };

        let (key, upload_id) = (job.key.clone(), job.upload_id.clone());
        let parts = self.run(job, source).await?;
        Ok(UploadOutcome {
            key,
            upload_id,
            parts,
            size,
        })
    }

    /// `Ok(None)` when the server finished the object at begin time and
    /// handed back no upload id.
    async fn begin_job(
        &self,
        key: &str,
        size: u64,
        opts: &MultipartOptions,
    ) -> Result<Option<Job>, UploadError> {
        let mut opts = opts.clone();
        opts.content_length = Some(size);
        opts.chunk_size = Some(self.options.chunk_size);
        let created = self
            .transport
            .begin(key, &opts)
            .await
            .map_err(|source| UploadError::Begin {
                key: key.to_string(),
                source,
            })?;
        if created.upload_id.is_empty() {
            return Ok(None);
        }

        let chunk_size = match created.chunk_size {
            Some(c) if c > 0 => {
                if c != self.options.chunk_size {
                    debug!(requested = self.options.chunk_size, granted = c, "Adopting server part size");
                }
                c
            }
            _ => self.options.chunk_size,
        };
        let total_parts = part_count(size, chunk_size);
        Ok(Some(Job {
            key: key.to_string(),
            upload_id: created.upload_id,
            chunk_size,
            sequential: created.sequential,
            total_parts,
            slots: vec![None; total_parts as usize],
        }))
    }

    fn resume_job(&self, key: &str, size: u64, state: &ResumeState) -> Result<Job, UploadError> {
        if state.upload_id.trim().is_empty() {
            return Err(UploadError::InvalidResume("upload id is empty".into()));
        }
        let chunk_size = if state.chunk_size > 0 {
            state.chunk_size
        } else {
            self.options.chunk_size
        };
        let total_parts = part_count(size, chunk_size);
        let slots = reindex_parts(&state.uploaded_parts, total_parts)?;
        debug!(
            key = %key,
            upload_id = %state.upload_id,
            acknowledged = slots.iter().flatten().count(),
            total_parts,
            "Resuming upload"
        );
        Ok(Job {
            key: key.to_string(),
            upload_id: state.upload_id.clone(),
            chunk_size,
            sequential: state.sequential,
            total_parts,
            slots,
        })
    }

    async fn run(&self, job: Job, source: PartSource) -> Result<Vec<PartResult>, UploadError> {
        let pending = job.pending();
        let workers = if job.sequential {
            1
        } else {
            self.options.concurrency.min(pending.len())
        };
        let shared = Arc::new(Shared {
            transport: self.transport.clone(),
            source,
            key: job.key.clone(),
            upload_id: job.upload_id.clone(),
            chunk_size: job.chunk_size,
            retries: self.options.retries,
            retry_delay: self.options.retry_delay,
            pending,
            next: AtomicUsize::new(0),
            failed: AtomicBool::new(false),
            slots: Mutex::new(job.slots),
            progress: self.progress.clone(),
        });

        let mut set = JoinSet::new();
        for _ in 0..workers {
            set.spawn(worker(shared.clone()));
        }

        let mut first_failure: Option<(u32, StorageError)> = None;
        let mut panicked = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(failure)) => {
                    first_failure.get_or_insert(failure);
                }
                Err(e) => {
                    shared.failed.store(true, Ordering::SeqCst);
                    panicked.get_or_insert(e);
                }
            }
        }

        let slots = shared.slots.lock().unwrap().clone();
        if let Some((part_number, source)) = first_failure {
            return Err(UploadError::PartUploadExhausted {
                upload_id: job.upload_id,
                part_number,
                total_parts: job.total_parts,
                chunk_size: job.chunk_size,
                sequential: job.sequential,
                uploaded_parts: slots,
                source,
            });
        }
        if let Some(e) = panicked {
            return Err(UploadError::Worker(e));
        }

        let parts: Vec<PartResult> = sorted_parts(&slots.iter().flatten().cloned().collect::<Vec<_>>());
        self.transport
            .complete(&job.key, &job.upload_id, &parts)
            .await
            .map_err(|source| UploadError::Complete {
                upload_id: job.upload_id.clone(),
                chunk_size: job.chunk_size,
                sequential: job.sequential,
                uploaded_parts: slots,
                source,
            })?;
        info!(key = %job.key, upload_id = %job.upload_id, parts = parts.len(), "Upload complete");
        Ok(parts)
    }
}

/// Claim pending parts until none are left or a sibling has failed.
async fn worker(shared: Arc<Shared>) -> Result<(), (u32, StorageError)> {
    loop {
        if shared.failed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let idx = shared.next.fetch_add(1, Ordering::SeqCst);
        let Some(&part_number) = shared.pending.get(idx) else {
            return Ok(());
        };
        match upload_with_retry(&shared, part_number).await {
            Ok(etag) => {
                let mut slots = shared.slots.lock().unwrap();
                slots[part_number as usize - 1] = Some(PartResult { part_number, etag });
            }
            Err(e) => {
                shared.failed.store(true, Ordering::SeqCst);
                return Err((part_number, e));
            }
        }
    }
}

async fn upload_with_retry(shared: &Shared, part_number: u32) -> Result<String, StorageError> {
    let offset = (part_number as u64 - 1) * shared.chunk_size;
    let len = shared.chunk_size.min(shared.source.len() - offset);
    let body = shared.source.read_range(offset, len).await?;
    let progress = part_progress(shared, part_number, offset);

    let mut attempt = 0u32;
    loop {
        match shared
            .transport
            .upload_part(&shared.key, &shared.upload_id, part_number, body.clone(), progress.clone())
            .await
        {
            Ok(etag) => {
                debug!(part_number, attempt, "Part uploaded");
                return Ok(etag);
            }
            Err(e) if attempt < shared.retries => {
                let delay = backoff_delay(shared.retry_delay, attempt);
                warn!(part_number, attempt, delay_ms = delay.as_millis() as u64, error = %e, "Part upload failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(part_number, attempts = attempt + 1, error = %e, "Part upload failed, giving up");
                return Err(e);
            }
        }
    }
}

fn part_progress(shared: &Shared, part_number: u32, offset: u64) -> PartProgress {
    let total = shared.source.len();
    match shared.progress.clone() {
        Some(report) => Arc::new(move |sent| {
            report(ProgressEvent {
                part_number,
                loaded: offset + sent,
                total,
            })
        }),
        None => Arc::new(|_| {}),
    }
}

/// `base * 2^attempt` plus up to `MAX_JITTER_MS` of jitter.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..MAX_JITTER_MS);
    base.saturating_mul(1u32 << attempt.min(16)) + Duration::from_millis(jitter)
}

pub fn part_count(size: u64, chunk_size: u64) -> u32 {
    size.div_ceil(chunk_size) as u32
}

/// Place each acknowledged part at `part_number - 1`, whatever position it
/// held in `parts`.
pub fn reindex_parts(
    parts: &[Option<PartResult>],
    total_parts: u32,
) -> Result<Vec<Option<PartResult>>, UploadError> {
    let mut slots = vec![None; total_parts as usize];
    for part in parts.iter().flatten() {
        if part.part_number < 1 || part.part_number > total_parts {
            return Err(UploadError::InvalidResume(format!(
                "part {} is outside 1..={}",
                part.part_number, total_parts
            )));
        }
        if part.etag.is_empty() {
            return Err(UploadError::InvalidResume(format!(
                "part {} has no etag",
                part.part_number
            )));
        }
        slots[part.part_number as usize - 1] = Some(part.clone());
    }
    Ok(slots)
}

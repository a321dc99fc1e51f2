//! One in-flight bundle transfer
//!
//! A [`DownloadTask`] is the single transfer for one bundle content hash:
//! every requester shares it through a reference count instead of issuing
//! a duplicate fetch. The control plane (the scheduler's tick) starts,
//! polls, and aborts the task; the byte transfer itself runs on a spawned
//! tokio task that communicates back only through atomics and a one-shot
//! completion slot.

use std::io::{ErrorKind, SeekFrom};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bale_cache::{verify_file, CacheRecord, CacheStore, VerifyLevel};
use bale_manifest::BundleDescriptor;
use bale_task::{CooperativeTask, TaskStatus};
use futures::StreamExt as _;
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt as _, AsyncWriteExt as _};
use tracing::{debug, warn};

use crate::{CopyLocalFileService, DownloadSource, Error, FetchClient, Result};

/// Control-plane state, mutated only on the polling thread.
struct Control {
    status: TaskStatus,
    error: Option<String>,
    join: Option<tokio::task::JoinHandle<()>>,
    result: Option<CacheRecord>,
    watchdog_bytes: u64,
    watchdog_at: Instant,
}

/// One reference-counted transfer of one bundle.
pub struct DownloadTask {
    bundle: BundleDescriptor,
    source: DownloadSource,
    sequence: u64,
    resume_mode: bool,
    watchdog_interval: Duration,
    resume_invalidating_codes: Vec<u16>,
    client: FetchClient,
    store: Arc<CacheStore>,
    copy_service: Option<Arc<dyn CopyLocalFileService>>,
    ref_count: AtomicI32,
    /// Cumulative bytes present in the staged file, including any resume
    /// offset. Written by the data plane, read by the watchdog.
    downloaded: Arc<AtomicU64>,
    /// One-shot completion slot filled by the data plane.
    outcome: Arc<Mutex<Option<Result<CacheRecord>>>>,
    control: Mutex<Control>,
}

impl std::fmt::Debug for DownloadTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadTask")
            .field("guid", &self.bundle.content_hash)
            .field("sequence", &self.sequence)
            .field("status", &self.status())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

impl DownloadTask {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        bundle: BundleDescriptor,
        source: DownloadSource,
        sequence: u64,
        resume_min_size: u64,
        watchdog_interval: Duration,
        resume_invalidating_codes: Vec<u16>,
        client: FetchClient,
        store: Arc<CacheStore>,
        copy_service: Option<Arc<dyn CopyLocalFileService>>,
    ) -> Self {
        let resume_mode = matches!(source, DownloadSource::Remote { .. })
            && bundle.file_size >= resume_min_size;
        Self {
            bundle,
            source,
            sequence,
            resume_mode,
            watchdog_interval,
            resume_invalidating_codes,
            client,
            store,
            copy_service,
            ref_count: AtomicI32::new(0),
            downloaded: Arc::new(AtomicU64::new(0)),
            outcome: Arc::new(Mutex::new(None)),
            control: Mutex::new(Control {
                status: TaskStatus::Idle,
                error: None,
                join: None,
                result: None,
                watchdog_bytes: 0,
                watchdog_at: Instant::now(),
            }),
        }
    }

    /// Content hash of the bundle this task transfers.
    pub fn guid(&self) -> &str {
        &self.bundle.content_hash
    }

    /// Descriptor of the bundle this task transfers.
    pub fn bundle(&self) -> &BundleDescriptor {
        &self.bundle
    }

    /// Creation-order sequence number, used for FIFO starts.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Whether this transfer appends to an existing partial file.
    pub fn resume_mode(&self) -> bool {
        self.resume_mode
    }

    /// Add one reference. Every requester sharing this task holds one.
    pub fn retain(&self) {
        self.ref_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop one reference. The scheduler reaps zero-reference tasks on its
    /// next tick.
    pub fn release(&self) {
        self.ref_count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Current reference count.
    pub fn ref_count(&self) -> i32 {
        self.ref_count.load(Ordering::Relaxed)
    }

    /// Bytes present in the staged file so far.
    pub fn downloaded_bytes(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    /// Declared total size of the bundle.
    pub fn total_bytes(&self) -> u64 {
        self.bundle.file_size
    }

    /// Transfer progress in `0.0..=1.0`.
    pub fn progress(&self) -> f64 {
        if self.bundle.file_size == 0 {
            return if self.status() == TaskStatus::Succeeded {
                1.0
            } else {
                0.0
            };
        }
        (self.downloaded_bytes() as f64 / self.bundle.file_size as f64).clamp(0.0, 1.0)
    }

    /// Lifecycle state.
    pub fn status(&self) -> TaskStatus {
        self.control.lock().status
    }

    /// Terminal error message, if any.
    pub fn error(&self) -> Option<String> {
        self.control.lock().error.clone()
    }

    /// The cache record produced by a successful transfer.
    pub fn result(&self) -> Option<CacheRecord> {
        self.control.lock().result.clone()
    }

    /// Spawn the data plane and transition to `Running`.
    ///
    /// Must be called from within a tokio runtime. A task that already
    /// started is left untouched.
    pub fn start(&self) {
        let mut control = self.control.lock();
        if control.status != TaskStatus::Idle {
            return;
        }
        control.status = TaskStatus::Running;
        control.watchdog_bytes = 0;
        control.watchdog_at = Instant::now();

        let ctx = TransferContext {
            client: self.client.clone(),
            store: Arc::clone(&self.store),
            bundle: self.bundle.clone(),
            source: self.source.clone(),
            resume_mode: self.resume_mode,
            resume_invalidating_codes: self.resume_invalidating_codes.clone(),
            copy_service: self.copy_service.clone(),
            downloaded: Arc::clone(&self.downloaded),
        };
        let outcome = Arc::clone(&self.outcome);
        debug!(guid = self.guid(), resume = self.resume_mode, "transfer started");
        control.join = Some(tokio::spawn(async move {
            let result = run_transfer(ctx).await;
            *outcome.lock() = Some(result);
        }));
    }

    /// Observe the data plane: pick up a completion, or abort on a stall.
    ///
    /// Safe to call on every tick, in any state.
    pub fn update(&self) {
        let mut control = self.control.lock();
        if control.status != TaskStatus::Running {
            return;
        }

        if let Some(result) = self.outcome.lock().take() {
            control.join = None;
            match result {
                Ok(record) => {
                    debug!(guid = self.guid(), "transfer complete");
                    control.result = Some(record);
                    control.status = TaskStatus::Succeeded;
                }
                Err(e) => {
                    warn!(guid = self.guid(), error = %e, "transfer failed");
                    control.error = Some(e.to_string());
                    control.status = TaskStatus::Failed;
                }
            }
            return;
        }

        // Stall watchdog: byte progress resets the clock; a connection that
        // stays open without delivering data does not.
        let bytes = self.downloaded.load(Ordering::Relaxed);
        if bytes != control.watchdog_bytes {
            control.watchdog_bytes = bytes;
            control.watchdog_at = Instant::now();
        } else if control.watchdog_at.elapsed() >= self.watchdog_interval {
            let seconds = self.watchdog_interval.as_secs();
            warn!(guid = self.guid(), seconds, "transfer stalled, aborting");
            self.cancel_data_plane(&mut control);
            control.error = Some(Error::WatchdogAborted { seconds }.to_string());
            control.status = TaskStatus::Aborted;
        }
    }

    /// Cooperative cancellation by the owner.
    pub fn abort(&self) {
        let mut control = self.control.lock();
        if control.status.is_terminal() {
            return;
        }
        debug!(guid = self.guid(), "transfer aborted");
        self.cancel_data_plane(&mut control);
        control.error = Some(Error::UserAborted.to_string());
        control.status = TaskStatus::Aborted;
    }

    fn cancel_data_plane(&self, control: &mut Control) {
        if let Some(join) = control.join.take() {
            join.abort();
        }
        // A resumable partial file is kept for a later resume; a normal-mode
        // partial is useless and removed.
        if !self.resume_mode {
            let temp = self.store.temp_file_path(self.guid());
            tokio::spawn(async move {
                let _ = tokio::fs::remove_file(temp).await;
            });
        }
    }
}

impl CooperativeTask for Arc<DownloadTask> {
    fn start(&mut self) {
        DownloadTask::start(self);
    }

    fn update(&mut self) {
        DownloadTask::update(self);
    }

    fn abort(&mut self) {
        DownloadTask::abort(self);
    }

    fn status(&self) -> TaskStatus {
        DownloadTask::status(self)
    }

    fn error(&self) -> Option<String> {
        DownloadTask::error(self)
    }
}

/// Everything the data plane owns.
struct TransferContext {
    client: FetchClient,
    store: Arc<CacheStore>,
    bundle: BundleDescriptor,
    source: DownloadSource,
    resume_mode: bool,
    resume_invalidating_codes: Vec<u16>,
    copy_service: Option<Arc<dyn CopyLocalFileService>>,
    downloaded: Arc<AtomicU64>,
}

/// Stage the bundle into the temp file, verify it, and commit it to the
/// cache. Runs on a spawned tokio task; cancellation is external.
async fn run_transfer(ctx: TransferContext) -> Result<CacheRecord> {
    let guid = ctx.bundle.content_hash.clone();
    let temp = ctx.store.temp_file_path(&guid);

    match &ctx.source {
        DownloadSource::Local { path } => {
            remove_if_present(&temp).await?;
            match &ctx.copy_service {
                Some(service) => service.copy_file(path, &temp).await?,
                None => {
                    tokio::fs::copy(path, &temp).await?;
                }
            }
            ctx.downloaded
                .store(tokio::fs::metadata(&temp).await?.len(), Ordering::Relaxed);
        }
        DownloadSource::Remote { url } => {
            remote_transfer(&ctx, url, &temp).await?;
        }
    }

    // Strict verification before the file is handed to the cache; a
    // mismatching staged file is deleted so it cannot poison a resume.
    let outcome = verify_file(
        &temp,
        ctx.bundle.file_size,
        ctx.bundle.file_checksum,
        VerifyLevel::High,
    )
    .await?;
    if !outcome.is_ok() {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(Error::Verification { guid, outcome });
    }

    let record = ctx.store.write(&ctx.bundle, &temp).await?;
    let _ = tokio::fs::remove_file(&temp).await;
    Ok(record)
}

async fn remote_transfer(
    ctx: &TransferContext,
    url: &str,
    temp: &std::path::Path,
) -> Result<()> {
    let mut offset = 0u64;
    if ctx.resume_mode {
        match tokio::fs::metadata(temp).await {
            // A temp file at or beyond the declared size is stale data from
            // an earlier manifest; start over.
            Ok(m) if m.len() >= ctx.bundle.file_size => {
                tokio::fs::remove_file(temp).await?;
            }
            Ok(m) => offset = m.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    } else {
        remove_if_present(temp).await?;
    }
    ctx.downloaded.store(offset, Ordering::Relaxed);

    let response = ctx
        .client
        .get(url, (offset > 0).then_some(offset))
        .await?;
    let status = response.status();
    if !status.is_success() {
        let code = status.as_u16();
        if offset > 0 && ctx.resume_invalidating_codes.contains(&code) {
            // These servers answer a range request with a full-content
            // error body; the partial file cannot be trusted afterwards.
            warn!(guid = ctx.bundle.content_hash, code, "resume invalidated, deleting partial file");
            let _ = tokio::fs::remove_file(temp).await;
        }
        return Err(Error::Network {
            status: code,
            url: url.to_string(),
        });
    }
    if offset > 0 && status != StatusCode::PARTIAL_CONTENT {
        // The server ignored the range header and is sending the whole
        // file; restart the staged file from zero.
        warn!(guid = ctx.bundle.content_hash, "server ignored range request, restarting");
        offset = 0;
        ctx.downloaded.store(0, Ordering::Relaxed);
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .read(true)
        .truncate(offset == 0)
        .open(temp)
        .await?;
    if offset > 0 {
        file.seek(SeekFrom::Start(offset)).await?;
    }

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        ctx.downloaded
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);
    }
    file.flush().await?;
    Ok(())
}

async fn remove_if_present(path: &std::path::Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

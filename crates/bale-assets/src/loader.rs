//! Per-bundle load pipeline
//!
//! A [`BundleLoader`] is the one in-memory load of one bundle: ensure the
//! bytes are cached (downloading through the scheduler when they are
//! not), then read them into memory, decrypting on the way when the
//! bundle calls for it. Providers share loaders through a reference
//! count; a loader's payload is the in-memory cache entry that
//! `try_unload` later evicts.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};

use bale_cache::CacheStore;
use bale_fetch::{DownloadScheduler, DownloadSource, DownloadTask};
use bale_manifest::BundleDescriptor;
use bale_task::{CooperativeTask, TaskStatus};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::pack::PackDirectory;
use crate::{Error, Result};

/// A loaded bundle's in-memory payload.
///
/// The packed directory is parsed lazily: raw-bundle requests never need
/// it, and the parse result is shared by every request that does.
#[derive(Debug)]
pub struct BundlePayload {
    bytes: Arc<Vec<u8>>,
    directory: OnceLock<std::result::Result<Arc<PackDirectory>, String>>,
}

impl BundlePayload {
    fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
            directory: OnceLock::new(),
        }
    }

    /// The bundle's payload bytes.
    pub fn bytes(&self) -> &Arc<Vec<u8>> {
        &self.bytes
    }

    /// The packed directory, parsed on first use.
    pub fn directory(&self) -> Result<Arc<PackDirectory>> {
        self.directory
            .get_or_init(|| {
                PackDirectory::parse(&self.bytes)
                    .map(Arc::new)
                    .map_err(|e| e.to_string())
            })
            .clone()
            .map_err(Error::pack_corrupt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoaderStep {
    CheckCache,
    Download,
    LoadPayload,
    Done,
}

struct LoaderState {
    step: LoaderStep,
    status: TaskStatus,
    error: Option<String>,
    download: Option<Arc<DownloadTask>>,
    payload: Option<Arc<BundlePayload>>,
    read_join: Option<tokio::task::JoinHandle<()>>,
}

/// One reference-counted in-memory load of one bundle.
pub struct BundleLoader {
    bundle: BundleDescriptor,
    source: DownloadSource,
    store: Arc<CacheStore>,
    scheduler: Arc<Mutex<DownloadScheduler>>,
    ref_count: AtomicI32,
    /// Completion slot for the spawned payload read.
    read_outcome: Arc<Mutex<Option<std::result::Result<Vec<u8>, String>>>>,
    state: Mutex<LoaderState>,
}

impl std::fmt::Debug for BundleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleLoader")
            .field("bundle", &self.bundle.bundle_name)
            .field("status", &self.status())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

impl BundleLoader {
    pub(crate) fn new(
        bundle: BundleDescriptor,
        source: DownloadSource,
        store: Arc<CacheStore>,
        scheduler: Arc<Mutex<DownloadScheduler>>,
    ) -> Self {
        Self {
            bundle,
            source,
            store,
            scheduler,
            ref_count: AtomicI32::new(0),
            read_outcome: Arc::new(Mutex::new(None)),
            state: Mutex::new(LoaderState {
                step: LoaderStep::CheckCache,
                status: TaskStatus::Idle,
                error: None,
                download: None,
                payload: None,
                read_join: None,
            }),
        }
    }

    /// Descriptor of the bundle this loader loads.
    pub fn bundle(&self) -> &BundleDescriptor {
        &self.bundle
    }

    /// Content hash of the bundle.
    pub fn guid(&self) -> &str {
        &self.bundle.content_hash
    }

    /// Add one reference.
    pub fn retain(&self) {
        self.ref_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop one reference.
    pub fn release(&self) {
        self.ref_count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Current reference count.
    pub fn ref_count(&self) -> i32 {
        self.ref_count.load(Ordering::Relaxed)
    }

    /// Lifecycle state.
    pub fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    /// Terminal error message, if any.
    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    /// The in-memory payload of a successfully loaded bundle.
    pub fn payload(&self) -> Option<Arc<BundlePayload>> {
        self.state.lock().payload.clone()
    }

    /// Whether this loader may be torn down: nobody references it and it
    /// is not mid-flight. The manager additionally consults the
    /// manifest's reverse edges before destroying it.
    pub fn can_destroy(&self) -> bool {
        self.ref_count() <= 0 && self.status() != TaskStatus::Running
    }

    /// Bytes staged so far and the declared total, for progress
    /// aggregation across a provider's loaders.
    pub fn download_progress(&self) -> (u64, u64) {
        let total = self.bundle.file_size;
        let state = self.state.lock();
        if state.payload.is_some() || state.status == TaskStatus::Succeeded {
            return (total, total);
        }
        if let Some(task) = &state.download {
            return (task.downloaded_bytes(), total);
        }
        if self.store.exists(&self.bundle) {
            (total, total)
        } else {
            (0, total)
        }
    }

    /// Begin loading. Safe to call repeatedly.
    pub fn start(&self) {
        let mut state = self.state.lock();
        if state.status == TaskStatus::Idle {
            state.status = TaskStatus::Running;
        }
    }

    /// Advance one step.
    pub fn update(&self) {
        let mut state = self.state.lock();
        if state.status != TaskStatus::Running {
            return;
        }

        match state.step {
            LoaderStep::CheckCache => {
                if self.store.exists(&self.bundle) {
                    debug!(bundle = self.bundle.bundle_name, "bundle already cached");
                    self.spawn_read(&mut state);
                    state.step = LoaderStep::LoadPayload;
                } else {
                    let task = self
                        .scheduler
                        .lock()
                        .request(&self.bundle, self.source.clone());
                    state.download = Some(task);
                    state.step = LoaderStep::Download;
                }
            }
            LoaderStep::Download => {
                let Some(task) = state.download.clone() else {
                    state.step = LoaderStep::CheckCache;
                    return;
                };
                match task.status() {
                    TaskStatus::Succeeded => {
                        task.release();
                        state.download = None;
                        self.spawn_read(&mut state);
                        state.step = LoaderStep::LoadPayload;
                    }
                    TaskStatus::Failed | TaskStatus::Aborted => {
                        warn!(
                            bundle = self.bundle.bundle_name,
                            error = task.error(),
                            "bundle download failed"
                        );
                        task.release();
                        state.download = None;
                        state.error = task.error();
                        state.status = task.status();
                        state.step = LoaderStep::Done;
                    }
                    _ => {}
                }
            }
            LoaderStep::LoadPayload => {
                if let Some(result) = self.read_outcome.lock().take() {
                    state.read_join = None;
                    match result {
                        Ok(bytes) => {
                            debug!(
                                bundle = self.bundle.bundle_name,
                                size = bytes.len(),
                                "bundle payload loaded"
                            );
                            state.payload = Some(Arc::new(BundlePayload::new(bytes)));
                            state.status = TaskStatus::Succeeded;
                        }
                        Err(error) => {
                            warn!(
                                bundle = self.bundle.bundle_name,
                                error, "bundle payload read failed"
                            );
                            state.error = Some(error);
                            state.status = TaskStatus::Failed;
                        }
                    }
                    state.step = LoaderStep::Done;
                }
            }
            LoaderStep::Done => {}
        }
    }

    /// Cooperative cancellation.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        if state.status.is_terminal() {
            return;
        }
        if let Some(task) = state.download.take() {
            task.release();
        }
        if let Some(join) = state.read_join.take() {
            join.abort();
        }
        state.error = Some("bundle load aborted".to_string());
        state.status = TaskStatus::Aborted;
        state.step = LoaderStep::Done;
    }

    fn spawn_read(&self, state: &mut LoaderState) {
        let store = Arc::clone(&self.store);
        let bundle = self.bundle.clone();
        let outcome = Arc::clone(&self.read_outcome);
        state.read_join = Some(tokio::spawn(async move {
            let result = store
                .read_bundle_data(&bundle)
                .await
                .map_err(|e| e.to_string());
            *outcome.lock() = Some(result);
        }));
    }
}

impl CooperativeTask for Arc<BundleLoader> {
    fn start(&mut self) {
        BundleLoader::start(self);
    }

    fn update(&mut self) {
        BundleLoader::update(self);
    }

    fn abort(&mut self) {
        BundleLoader::abort(self);
    }

    fn status(&self) -> TaskStatus {
        BundleLoader::status(self)
    }

    fn error(&self) -> Option<String> {
        BundleLoader::error(self)
    }
}

//! Request resolution state machine
//!
//! One [`Provider`] exists per distinct (request kind, asset) key. It
//! turns the request into a set of bundle loads — the asset's own bundle
//! plus its transitive dependency closure — waits for all of them,
//! extracts the kind-specific result, and fans the completion out to
//! every attached handle exactly once. The first failing loader
//! short-circuits the whole provider; partial results are never
//! surfaced.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use bale_cache::CacheStore;
use bale_fetch::DownloadScheduler;
use bale_manifest::{AssetDescriptor, BundleDescriptor, ManifestGraph};
use bale_task::TaskStatus;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::handle::{AssetResult, Completion, HandleCell, ProviderKey, RequestKind};
use crate::loader::BundleLoader;
use crate::services::{source_for_attempt, RemoteServices};
use crate::Error;

/// Borrowed view of the manager's shared services and tables, handed to
/// providers while they are driven. All mutation stays on the polling
/// thread.
pub(crate) struct EngineCtx<'a> {
    pub graph: &'a Arc<ManifestGraph>,
    pub store: &'a Arc<CacheStore>,
    pub scheduler: &'a Arc<Mutex<DownloadScheduler>>,
    pub remote: &'a Arc<dyn RemoteServices>,
    pub loaders: &'a mut HashMap<String, Arc<BundleLoader>>,
    pub fetch_attempts: &'a mut HashMap<String, u32>,
}

impl EngineCtx<'_> {
    /// Create or reuse the one loader for a bundle, retaining it for the
    /// caller. A previously failed loader is replaced with a fresh one
    /// pointed at the fallback endpoint, which is the explicit try-again
    /// path.
    pub(crate) fn acquire_loader(&mut self, bundle: &BundleDescriptor) -> Arc<BundleLoader> {
        let guid = &bundle.content_hash;
        if let Some(existing) = self.loaders.get(guid) {
            match existing.status() {
                TaskStatus::Failed | TaskStatus::Aborted => {
                    debug!(bundle = bundle.bundle_name, "replacing failed loader");
                    self.loaders.remove(guid);
                }
                _ => {
                    existing.retain();
                    return Arc::clone(existing);
                }
            }
        }

        let attempt = self.fetch_attempts.get(guid).copied().unwrap_or(0);
        let source = source_for_attempt(self.remote.as_ref(), bundle, attempt);
        *self.fetch_attempts.entry(guid.clone()).or_insert(0) += 1;

        let loader = Arc::new(BundleLoader::new(
            bundle.clone(),
            source,
            Arc::clone(self.store),
            Arc::clone(self.scheduler),
        ));
        loader.start();
        loader.retain();
        self.loaders.insert(guid.clone(), Arc::clone(&loader));
        loader
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProviderStep {
    StartBundleLoaders,
    WaitBundleLoaders,
    ProcessResult,
    Done,
}

/// The in-flight or retained resolution of one logical request.
pub(crate) struct Provider {
    key: ProviderKey,
    asset: AssetDescriptor,
    step: ProviderStep,
    status: TaskStatus,
    error: Option<String>,
    result: Option<AssetResult>,
    /// Main bundle's loader first, then the dependency closure.
    loaders: Vec<Arc<BundleLoader>>,
    ref_count: i32,
    strong_cells: Vec<Arc<HandleCell>>,
    weak_cells: Vec<Weak<HandleCell>>,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("key", &self.key)
            .field("step", &self.step)
            .field("status", &self.status)
            .field("ref_count", &self.ref_count)
            .finish()
    }
}

impl Provider {
    pub(crate) fn new(key: ProviderKey, asset: AssetDescriptor) -> Self {
        Self {
            key,
            asset,
            step: ProviderStep::StartBundleLoaders,
            status: TaskStatus::Running,
            error: None,
            result: None,
            loaders: Vec::new(),
            ref_count: 0,
            strong_cells: Vec::new(),
            weak_cells: Vec::new(),
        }
    }

    pub(crate) fn ref_count(&self) -> i32 {
        self.ref_count
    }

    /// Attach one more handle, completing it immediately if the provider
    /// already settled.
    pub(crate) fn attach(&mut self, cell: &Arc<HandleCell>, weak_mode: bool) {
        self.ref_count += 1;
        if weak_mode {
            self.weak_cells.push(Arc::downgrade(cell));
        } else {
            self.strong_cells.push(Arc::clone(cell));
        }
        if self.step == ProviderStep::Done {
            cell.complete(self.snapshot());
        }
    }

    /// Detach the handle backed by `cell`. Returns whether it was found.
    pub(crate) fn release_cell(&mut self, cell: &Arc<HandleCell>) -> bool {
        if let Some(pos) = self.strong_cells.iter().position(|c| Arc::ptr_eq(c, cell)) {
            self.strong_cells.swap_remove(pos);
            self.ref_count -= 1;
            return true;
        }
        if let Some(pos) = self
            .weak_cells
            .iter()
            .position(|w| w.upgrade().is_some_and(|c| Arc::ptr_eq(&c, cell)))
        {
            self.weak_cells.swap_remove(pos);
            self.ref_count -= 1;
            return true;
        }
        false
    }

    /// Drop weak entries whose handle has disappeared, releasing their
    /// reference counts. Runs before every teardown decision so stale
    /// entries cannot keep the provider alive forever.
    pub(crate) fn sweep_weak(&mut self) {
        let before = self.weak_cells.len();
        self.weak_cells.retain(|w| w.strong_count() > 0);
        let dropped = before - self.weak_cells.len();
        if dropped > 0 {
            debug!(key = ?self.key, dropped, "swept dead weak handles");
            self.ref_count -= dropped as i32;
        }
    }

    /// Whether the provider may be garbage collected: nobody holds a
    /// handle and it is not mid-flight.
    pub(crate) fn can_teardown(&self) -> bool {
        self.ref_count <= 0 && self.status != TaskStatus::Running
    }

    /// Advance one step.
    pub(crate) fn update(&mut self, ctx: &mut EngineCtx<'_>) {
        match self.step {
            ProviderStep::StartBundleLoaders => self.start_bundle_loaders(ctx),
            ProviderStep::WaitBundleLoaders => self.wait_bundle_loaders(),
            ProviderStep::ProcessResult => self.process_result(),
            ProviderStep::Done => {}
        }
    }

    fn start_bundle_loaders(&mut self, ctx: &mut EngineCtx<'_>) {
        let main = match ctx.graph.bundle_for_asset(&self.asset) {
            Ok(bundle) => bundle.clone(),
            Err(_) => {
                let error = Error::BundleMissingInGraph {
                    asset_path: self.asset.asset_path.clone(),
                }
                .to_string();
                self.fail(error);
                return;
            }
        };
        let deps: Vec<BundleDescriptor> = ctx
            .graph
            .all_dependencies_of_asset(&self.asset)
            .into_iter()
            .cloned()
            .collect();

        self.loaders.push(ctx.acquire_loader(&main));
        for dep in &deps {
            self.loaders.push(ctx.acquire_loader(dep));
        }
        debug!(key = ?self.key, loaders = self.loaders.len(), "bundle loaders started");
        self.step = ProviderStep::WaitBundleLoaders;
    }

    fn wait_bundle_loaders(&mut self) {
        let mut all_done = true;
        for loader in &self.loaders {
            match loader.status() {
                TaskStatus::Failed | TaskStatus::Aborted => {
                    let error = loader
                        .error()
                        .unwrap_or_else(|| "bundle load failed".to_string());
                    self.fail(error);
                    return;
                }
                TaskStatus::Succeeded => {}
                _ => all_done = false,
            }
        }
        if all_done {
            self.step = ProviderStep::ProcessResult;
        }
    }

    fn process_result(&mut self) {
        let Some(payload) = self.loaders.first().and_then(|l| l.payload()) else {
            self.fail("main bundle payload unavailable".to_string());
            return;
        };

        let result = match self.key.kind {
            RequestKind::RawBundle => Ok(AssetResult::RawBundle(Arc::clone(payload.bytes()))),
            RequestKind::Asset => payload.directory().and_then(|dir| {
                dir.read(payload.bytes(), &self.asset.asset_path)
                    .map(|bytes| AssetResult::Asset(Arc::new(bytes.to_vec())))
                    .ok_or_else(|| Error::ItemNotFound {
                        item: self.asset.asset_path.clone(),
                        bundle: self.loaders[0].bundle().bundle_name.clone(),
                    })
            }),
            RequestKind::Container => payload.directory().map(|dir| {
                let entries: Vec<(String, Vec<u8>)> = dir
                    .entries()
                    .iter()
                    .map(|entry| {
                        let bytes = dir
                            .read(payload.bytes(), &entry.path)
                            .map(<[u8]>::to_vec)
                            .unwrap_or_default();
                        (entry.path.clone(), bytes)
                    })
                    .collect();
                AssetResult::Container(Arc::new(entries))
            }),
        };

        match result {
            Ok(result) => self.succeed(result),
            Err(e) => self.fail(e.to_string()),
        }
    }

    fn succeed(&mut self, result: AssetResult) {
        debug!(key = ?self.key, "request resolved");
        self.result = Some(result);
        self.status = TaskStatus::Succeeded;
        self.step = ProviderStep::Done;
        self.deliver();
    }

    fn fail(&mut self, error: String) {
        warn!(key = ?self.key, error, "request failed");
        self.error = Some(error);
        self.status = TaskStatus::Failed;
        self.step = ProviderStep::Done;
        self.deliver();
    }

    /// Record an aborted completion if still mid-flight, then give back
    /// every loader reference. Called on teardown; a caller that destroys
    /// its handle mid-flight still observes a terminal state.
    pub(crate) fn shutdown(&mut self) {
        if self.status == TaskStatus::Running {
            self.error = Some(Error::UserAborted.to_string());
            self.status = TaskStatus::Aborted;
            self.step = ProviderStep::Done;
            self.deliver();
        }
        for loader in self.loaders.drain(..) {
            loader.release();
        }
    }

    /// Deliver the terminal completion to every attached handle.
    fn deliver(&mut self) {
        let completion = self.snapshot();
        for cell in &self.strong_cells {
            cell.complete(completion.clone());
        }
        for weak in &self.weak_cells {
            if let Some(cell) = weak.upgrade() {
                cell.complete(completion.clone());
            }
        }
    }

    fn snapshot(&self) -> Completion {
        Completion {
            status: self.status,
            error: self.error.clone(),
            result: self.result.clone(),
        }
    }
}

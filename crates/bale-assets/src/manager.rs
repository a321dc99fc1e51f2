//! The request-facing resource manager
//!
//! Owns the provider and loader tables and the download scheduler, and
//! drives all of them from one `update` call on the polling thread.
//! Deduplication invariants live here: one provider per (kind, asset)
//! key, one loader per bundle, one download task per bundle content
//! hash.

use std::collections::HashMap;
use std::sync::Arc;

use bale_cache::CacheStore;
use bale_fetch::DownloadScheduler;
use bale_manifest::ManifestGraph;
use bale_task::TaskStatus;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::handle::{Completion, Handle, HandleCell, ProviderKey, RequestKind};
use crate::loader::BundleLoader;
use crate::provider::{EngineCtx, Provider};
use crate::services::RemoteServices;
use crate::Error;

/// Aggregate byte progress of one request's bundle set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadStatus {
    /// Declared total bytes across the main bundle and its dependencies
    pub total_bytes: u64,
    /// Bytes already present locally or staged so far
    pub downloaded_bytes: u64,
}

impl DownloadStatus {
    /// Progress in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            1.0
        } else {
            (self.downloaded_bytes as f64 / self.total_bytes as f64).clamp(0.0, 1.0)
        }
    }
}

/// Turns asset requests into bundle loads and reference-counted handles.
pub struct ResourceManager {
    graph: Arc<ManifestGraph>,
    store: Arc<CacheStore>,
    scheduler: Arc<Mutex<DownloadScheduler>>,
    remote: Arc<dyn RemoteServices>,
    providers: HashMap<ProviderKey, Provider>,
    /// Bundle content hash -> the one in-memory loader for that bundle
    loaders: HashMap<String, Arc<BundleLoader>>,
    /// Fetch attempts per bundle, for main/fallback endpoint selection
    fetch_attempts: HashMap<String, u32>,
    weak_handle_mode: bool,
    locked: bool,
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("providers", &self.providers.len())
            .field("loaders", &self.loaders.len())
            .field("weak_handle_mode", &self.weak_handle_mode)
            .field("locked", &self.locked)
            .finish()
    }
}

impl ResourceManager {
    /// Create a manager over a manifest, cache, and scheduler.
    ///
    /// With `weak_handle_mode` enabled, handles are tracked through weak
    /// references and do not require an explicit release: dropping the
    /// handle is observed by the sweep on the next update.
    pub fn new(
        graph: Arc<ManifestGraph>,
        store: Arc<CacheStore>,
        scheduler: DownloadScheduler,
        remote: Arc<dyn RemoteServices>,
        weak_handle_mode: bool,
    ) -> Self {
        Self {
            graph,
            store,
            scheduler: Arc::new(Mutex::new(scheduler)),
            remote,
            providers: HashMap::new(),
            loaders: HashMap::new(),
            fetch_attempts: HashMap::new(),
            weak_handle_mode,
            locked: false,
        }
    }

    /// The manifest graph this manager serves.
    pub fn graph(&self) -> &Arc<ManifestGraph> {
        &self.graph
    }

    /// The cache store bundles are committed to.
    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// Number of live providers.
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Number of in-memory bundle loaders.
    pub fn loader_count(&self) -> usize {
        self.loaders.len()
    }

    /// Reference count of the provider for a key, if one is live.
    pub fn provider_ref_count(&self, kind: RequestKind, location: &str) -> Option<i32> {
        let key = self.provider_key(kind, location)?;
        self.providers.get(&key).map(Provider::ref_count)
    }

    /// Whether a loader currently holds the bundle in memory.
    pub fn has_loader(&self, guid: &str) -> bool {
        self.loaders.contains_key(guid)
    }

    /// Reject all requests until [`ResourceManager::unlock`]. For
    /// teardown windows.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    /// Accept requests again.
    pub fn unlock(&mut self) {
        self.locked = false;
    }

    /// Whether the manager is currently locked.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Request an asset, deduplicating against any provider already in
    /// flight or retained for the same (kind, asset) key.
    ///
    /// Always returns a handle; resolution failures (unknown location, a
    /// locked manager) surface as an immediately-failed handle rather
    /// than an error return, so callers observe every outcome through
    /// the same completion path.
    pub fn request(&mut self, kind: RequestKind, location: &str) -> Handle {
        let cell = Arc::new(HandleCell::default());

        if self.locked {
            let key = ProviderKey {
                kind,
                location: location.to_string(),
            };
            cell.complete(failed_completion(Error::Locked.to_string()));
            return Handle::new(key, cell);
        }

        let Some(asset) = self.graph.asset(location) else {
            let key = ProviderKey {
                kind,
                location: location.to_string(),
            };
            cell.complete(failed_completion(
                Error::AssetNotFound {
                    location: location.to_string(),
                }
                .to_string(),
            ));
            return Handle::new(key, cell);
        };

        let key = ProviderKey {
            kind,
            location: asset.asset_path.clone(),
        };
        let asset = asset.clone();
        let provider = self
            .providers
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(?key, "provider created");
                Provider::new(key.clone(), asset)
            });
        provider.attach(&cell, self.weak_handle_mode);

        Handle::new(key, cell)
    }

    /// Release one handle's claim on its provider.
    pub fn release_handle(&mut self, handle: &Handle) {
        if let Some(provider) = self.providers.get_mut(handle.key()) {
            provider.release_cell(handle.cell());
        }
    }

    /// Drive everything one step: sweep weak handles, advance providers
    /// and loaders, tick the scheduler, and garbage-collect providers
    /// whose reference count reached zero.
    ///
    /// Must be called on a regular cadence from within a tokio runtime.
    pub fn update(&mut self) {
        if self.weak_handle_mode {
            for provider in self.providers.values_mut() {
                provider.sweep_weak();
            }
        }

        let mut providers = std::mem::take(&mut self.providers);
        {
            let mut ctx = EngineCtx {
                graph: &self.graph,
                store: &self.store,
                scheduler: &self.scheduler,
                remote: &self.remote,
                loaders: &mut self.loaders,
                fetch_attempts: &mut self.fetch_attempts,
            };
            for provider in providers.values_mut() {
                provider.update(&mut ctx);
            }
        }
        self.providers = providers;

        let loaders: Vec<Arc<BundleLoader>> = self.loaders.values().cloned().collect();
        for loader in loaders {
            loader.update();
        }

        self.scheduler.lock().tick();

        // Providers with no handles left are torn down; their loader
        // references go with them. Loaders themselves stay as the
        // in-memory cache until try_unload evicts them.
        let teardown: Vec<ProviderKey> = self
            .providers
            .iter()
            .filter(|(_, p)| p.can_teardown())
            .map(|(k, _)| k.clone())
            .collect();
        for key in teardown {
            if let Some(mut provider) = self.providers.remove(&key) {
                debug!(?key, "provider torn down");
                provider.shutdown();
            }
        }
    }

    /// Release and evict the in-memory bundles behind one asset.
    ///
    /// Walks up to `max_passes` passes over the asset's providers and its
    /// bundle chain, destroying loaders whose reference count reached
    /// zero and which no other in-memory bundle still depends on. The
    /// on-disk cache is untouched by this path.
    pub fn try_unload(&mut self, location: &str, max_passes: u32) {
        let Some(asset) = self.graph.asset(location) else {
            return;
        };
        let asset_path = asset.asset_path.clone();
        let mut chain: Vec<String> = Vec::new();
        if let Ok(main) = self.graph.bundle_for_asset(asset) {
            chain.push(main.content_hash.clone());
        }
        for dep in self.graph.all_dependencies_of_asset(asset) {
            chain.push(dep.content_hash.clone());
        }

        for _ in 0..max_passes {
            let mut changed = false;

            for kind in [RequestKind::Asset, RequestKind::RawBundle, RequestKind::Container] {
                let key = ProviderKey {
                    kind,
                    location: asset_path.clone(),
                };
                let eligible = self
                    .providers
                    .get(&key)
                    .is_some_and(Provider::can_teardown);
                if eligible {
                    if let Some(mut provider) = self.providers.remove(&key) {
                        provider.shutdown();
                        changed = true;
                    }
                }
            }

            for guid in &chain {
                if self.try_destroy_loader(guid) {
                    changed = true;
                }
            }

            if !changed {
                break;
            }
        }
    }

    /// Destroy one loader if nobody references it: its own reference
    /// count is zero, it is not mid-flight, and the manifest's reverse
    /// edges show no other in-memory bundle depending on it.
    fn try_destroy_loader(&mut self, guid: &str) -> bool {
        let Some(loader) = self.loaders.get(guid) else {
            return false;
        };
        if !loader.can_destroy() {
            return false;
        }
        let referenced = loader.bundle().reference_bundle_ids.iter().any(|id| {
            self.graph
                .bundle(*id)
                .is_some_and(|b| self.loaders.contains_key(&b.content_hash))
        });
        if referenced {
            return false;
        }
        debug!(guid, "loader evicted from memory");
        self.loaders.remove(guid);
        true
    }

    /// Aggregate download progress for one asset's bundle set.
    pub fn download_status(&self, location: &str) -> Option<DownloadStatus> {
        let asset = self.graph.asset(location)?;
        let mut bundles = Vec::new();
        if let Ok(main) = self.graph.bundle_for_asset(asset) {
            bundles.push(main);
        }
        bundles.extend(self.graph.all_dependencies_of_asset(asset));

        let mut status = DownloadStatus {
            total_bytes: 0,
            downloaded_bytes: 0,
        };
        for bundle in bundles {
            status.total_bytes += bundle.file_size;
            if let Some(loader) = self.loaders.get(&bundle.content_hash) {
                status.downloaded_bytes += loader.download_progress().0;
            } else if self.store.exists(bundle) {
                status.downloaded_bytes += bundle.file_size;
            }
        }
        Some(status)
    }

    /// Abort every provider, loader, and download. Mid-flight requests
    /// observe an aborted completion before their providers disappear.
    pub fn abort_all(&mut self) {
        info!(
            providers = self.providers.len(),
            loaders = self.loaders.len(),
            "aborting all requests"
        );
        for provider in self.providers.values_mut() {
            provider.shutdown();
        }
        self.providers.clear();
        for loader in self.loaders.values() {
            loader.abort();
        }
        self.loaders.clear();
        self.fetch_attempts.clear();
        self.scheduler.lock().abort_all();
    }

    fn provider_key(&self, kind: RequestKind, location: &str) -> Option<ProviderKey> {
        let asset = self.graph.asset(location)?;
        Some(ProviderKey {
            kind,
            location: asset.asset_path.clone(),
        })
    }
}

fn failed_completion(error: String) -> Completion {
    Completion {
        status: TaskStatus::Failed,
        error: Some(error),
        result: None,
    }
}

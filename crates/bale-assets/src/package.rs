//! Package composition root
//!
//! A [`Package`] wires one manifest, one cache store, one scheduler, and
//! one resource manager together and owns them for the lifetime of the
//! logical package. There are no process-wide singletons: whoever
//! composes the system holds the `Package` and drives its `update`.

use std::path::PathBuf;
use std::sync::Arc;

use bale_cache::{CacheConfig, CacheStore, DecryptionService};
use bale_fetch::{CopyLocalFileService, DownloadScheduler, FetchClient, FetchConfig};
use bale_manifest::{md5_hex, parse_manifest, ManifestGraph, ManifestTransform};
use tracing::info;

use crate::handle::{Handle, RequestKind};
use crate::manager::{DownloadStatus, ResourceManager};
use crate::services::RemoteServices;
use crate::Result;

/// Builder for a [`Package`].
pub struct PackageBuilder {
    name: String,
    cache_root: PathBuf,
    manifest_bytes: Vec<u8>,
    remote: Arc<dyn RemoteServices>,
    manifest_transform: Option<Box<dyn ManifestTransform>>,
    decryption: Option<Arc<dyn DecryptionService>>,
    copy_service: Option<Arc<dyn CopyLocalFileService>>,
    client: Option<FetchClient>,
    cache_config: CacheConfig,
    fetch_config: FetchConfig,
    weak_handle_mode: bool,
    scan_cache: bool,
}

impl PackageBuilder {
    /// Start building a package from its manifest bytes.
    pub fn new(
        name: impl Into<String>,
        cache_root: impl Into<PathBuf>,
        manifest_bytes: Vec<u8>,
        remote: Arc<dyn RemoteServices>,
    ) -> Self {
        Self {
            name: name.into(),
            cache_root: cache_root.into(),
            manifest_bytes,
            remote,
            manifest_transform: None,
            decryption: None,
            copy_service: None,
            client: None,
            cache_config: CacheConfig::default(),
            fetch_config: FetchConfig::default(),
            weak_handle_mode: false,
            scan_cache: true,
        }
    }

    /// Transform (typically decrypt) the manifest bytes before parsing.
    #[must_use]
    pub fn manifest_transform(mut self, transform: Box<dyn ManifestTransform>) -> Self {
        self.manifest_transform = Some(transform);
        self
    }

    /// Decryption collaborator for encrypted bundles.
    #[must_use]
    pub fn decryption(mut self, service: Arc<dyn DecryptionService>) -> Self {
        self.decryption = Some(service);
        self
    }

    /// Copy collaborator for locally imported bundles.
    #[must_use]
    pub fn copy_service(mut self, service: Arc<dyn CopyLocalFileService>) -> Self {
        self.copy_service = Some(service);
        self
    }

    /// Use a preconfigured HTTP client.
    #[must_use]
    pub fn client(mut self, client: FetchClient) -> Self {
        self.client = Some(client);
        self
    }

    /// Cache store configuration.
    #[must_use]
    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    /// Download scheduler configuration.
    #[must_use]
    pub fn fetch_config(mut self, config: FetchConfig) -> Self {
        self.fetch_config = config;
        self
    }

    /// Track handles weakly; dropping a handle releases it on the next
    /// update instead of requiring an explicit release call.
    #[must_use]
    pub fn weak_handle_mode(mut self, enabled: bool) -> Self {
        self.weak_handle_mode = enabled;
        self
    }

    /// Skip the startup cache scan. Intended for tests and tooling that
    /// manage the store themselves.
    #[must_use]
    pub fn skip_cache_scan(mut self) -> Self {
        self.scan_cache = false;
        self
    }

    /// Parse the manifest, open the cache, and assemble the engine.
    pub async fn build(self) -> Result<Package> {
        let graph = Arc::new(parse_manifest(
            &self.manifest_bytes,
            self.manifest_transform.as_deref(),
        )?);

        let mut store = CacheStore::open(&self.cache_root, self.cache_config).await?;
        if let Some(decryption) = self.decryption {
            store = store.with_decryption(decryption);
        }
        let store = Arc::new(store);
        if self.scan_cache {
            store.initialize().await?;
        }

        // Persist the manifest and its hash so tooling can re-open the
        // package offline, and drop files from older versions.
        let version = &graph.header().package_version;
        store
            .save_manifest(&self.name, version, &self.manifest_bytes)
            .await?;
        store
            .save_package_hash(&self.name, version, &md5_hex(&self.manifest_bytes))
            .await?;
        store.clear_manifest_files(&self.name, version).await?;

        let client = match self.client {
            Some(client) => client,
            None => FetchClient::new()?,
        };
        let mut scheduler = DownloadScheduler::new(client, Arc::clone(&store), self.fetch_config);
        if let Some(copy_service) = self.copy_service {
            scheduler = scheduler.with_copy_service(copy_service);
        }

        let manager = ResourceManager::new(
            Arc::clone(&graph),
            Arc::clone(&store),
            scheduler,
            self.remote,
            self.weak_handle_mode,
        );

        info!(
            package = self.name,
            version,
            bundles = graph.bundles().len(),
            assets = graph.assets().len(),
            "package ready"
        );
        Ok(Package {
            name: self.name,
            graph,
            store,
            manager,
        })
    }
}

/// One logical package: manifest, cache, scheduler, and manager.
#[derive(Debug)]
pub struct Package {
    name: String,
    graph: Arc<ManifestGraph>,
    store: Arc<CacheStore>,
    manager: ResourceManager,
}

impl Package {
    /// Start building a package.
    pub fn builder(
        name: impl Into<String>,
        cache_root: impl Into<PathBuf>,
        manifest_bytes: Vec<u8>,
        remote: Arc<dyn RemoteServices>,
    ) -> PackageBuilder {
        PackageBuilder::new(name, cache_root, manifest_bytes, remote)
    }

    /// Package name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The manifest graph.
    pub fn manifest(&self) -> &ManifestGraph {
        &self.graph
    }

    /// The cache store.
    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// The resource manager, for direct control.
    pub fn manager(&mut self) -> &mut ResourceManager {
        &mut self.manager
    }

    /// Request one packed item by logical location.
    pub fn request_asset(&mut self, location: &str) -> Handle {
        self.manager.request(RequestKind::Asset, location)
    }

    /// Request the raw payload bytes of the asset's owning bundle.
    pub fn request_raw_bundle(&mut self, location: &str) -> Handle {
        self.manager.request(RequestKind::RawBundle, location)
    }

    /// Request every item packed in the asset's owning bundle.
    pub fn request_container(&mut self, location: &str) -> Handle {
        self.manager.request(RequestKind::Container, location)
    }

    /// Release one handle's claim.
    pub fn release(&mut self, handle: &Handle) {
        self.manager.release_handle(handle);
    }

    /// Drive the engine one step. Call on a regular cadence.
    pub fn update(&mut self) {
        self.manager.update();
    }

    /// Evict the in-memory bundles behind one asset once unreferenced.
    pub fn try_unload(&mut self, location: &str, max_passes: u32) {
        self.manager.try_unload(location, max_passes);
    }

    /// Aggregate download progress for one asset's bundle set.
    pub fn download_status(&self, location: &str) -> Option<DownloadStatus> {
        self.manager.download_status(location)
    }

    /// Reject new requests until unlocked.
    pub fn lock(&mut self) {
        self.manager.lock();
    }

    /// Accept requests again.
    pub fn unlock(&mut self) {
        self.manager.unlock();
    }

    /// Lock the package and abort everything in flight. Pending handles
    /// observe an aborted completion.
    pub fn shutdown(&mut self) {
        info!(package = self.name, "package shutting down");
        self.manager.lock();
        self.manager.abort_all();
    }

    /// Delete cached bundle files the current manifest no longer
    /// references.
    pub async fn clear_unused_cache_files(&self) -> Result<usize> {
        Ok(self.store.clear_unused_bundles(&self.graph).await?)
    }

    /// Delete every cached bundle file.
    pub async fn clear_all_cache_files(&self) -> Result<usize> {
        Ok(self.store.clear_all_bundles().await?)
    }
}

//! The content-addressed bundle store
//!
//! Layout under the cache root:
//!
//! ```text
//! <root>/bundles/<2-char-hash-prefix>/<full-content-hash>/__data[.ext]
//! <root>/bundles/<2-char-hash-prefix>/<full-content-hash>/__info
//! <root>/temp/<content-hash>
//! <root>/manifests/<package>_<version>.manifest
//! <root>/manifests/<package>_<version>.hash
//! ```
//!
//! Content hashes are uniformly distributed, so the two-level sharding
//! keeps directory fan-out bounded even with hundreds of thousands of
//! cached bundles.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bale_manifest::{BundleDescriptor, ManifestGraph};
use dashmap::DashMap;
use futures::stream::{self, StreamExt as _};
use tracing::{debug, info, warn};

use crate::record::{read_info_file, write_info_file};
use crate::{
    verify_file, CacheConfig, CacheRecord, DecryptionService, Error, Result, VerifyLevel,
    VerifyOutcome,
};

/// Name of the payload file inside a bundle's cache folder. A file
/// extension may be appended when the store is configured to keep them.
pub const DATA_FILE_NAME: &str = "__data";

/// Name of the metadata file inside a bundle's cache folder.
pub const INFO_FILE_NAME: &str = "__info";

const BUNDLE_DIR: &str = "bundles";
const TEMP_DIR: &str = "temp";
const MANIFEST_DIR: &str = "manifests";

/// Content-addressed on-disk store of verified bundle files.
///
/// The in-memory record table is the source of truth for "is this bundle
/// present locally": a record is inserted only after the data file and its
/// info file are durable on disk, so holding a [`CacheRecord`] is a promise
/// that [`CacheStore::data_file_path`] points at valid data.
pub struct CacheStore {
    root: PathBuf,
    config: CacheConfig,
    records: DashMap<String, CacheRecord>,
    decryption: Option<Arc<dyn DecryptionService>>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("root", &self.root)
            .field("config", &self.config)
            .field("records", &self.records.len())
            .field("decryption", &self.decryption.is_some())
            .finish()
    }
}

impl CacheStore {
    /// Open a store rooted at `root`, creating the directory skeleton.
    pub async fn open(root: impl AsRef<Path>, config: CacheConfig) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        ensure_dir(&root.join(BUNDLE_DIR)).await?;
        ensure_dir(&root.join(TEMP_DIR)).await?;
        ensure_dir(&root.join(MANIFEST_DIR)).await?;

        debug!("opened cache store at {root:?}");
        Ok(Self {
            root,
            config,
            records: DashMap::new(),
            decryption: None,
        })
    }

    /// Attach the injected decryption collaborator for encrypted bundles.
    #[must_use]
    pub fn with_decryption(mut self, service: Arc<dyn DecryptionService>) -> Self {
        self.decryption = Some(service);
        self
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of bundles currently recorded as cached.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Whether the bundle's data file is cached and verified.
    pub fn exists(&self, bundle: &BundleDescriptor) -> bool {
        self.records.contains_key(&bundle.content_hash)
    }

    /// The cache record for a bundle, if present.
    pub fn record(&self, bundle: &BundleDescriptor) -> Option<CacheRecord> {
        self.records
            .get(&bundle.content_hash)
            .map(|r| r.value().clone())
    }

    /// Folder holding one bundle's data and info files.
    fn bundle_dir(&self, guid: &str) -> PathBuf {
        let mut path = self.root.join(BUNDLE_DIR);
        if guid.len() >= 2 {
            path.push(&guid[..2]);
        }
        path.push(guid);
        path
    }

    fn data_file_name(&self, bundle: &BundleDescriptor) -> String {
        if self.config.append_file_extension {
            format!("{DATA_FILE_NAME}{}", bundle.file_extension())
        } else {
            DATA_FILE_NAME.to_string()
        }
    }

    /// Final on-disk location of the bundle's data file.
    pub fn data_file_path(&self, bundle: &BundleDescriptor) -> PathBuf {
        self.bundle_dir(&bundle.content_hash)
            .join(self.data_file_name(bundle))
    }

    /// On-disk location of the bundle's info file.
    pub fn info_file_path(&self, guid: &str) -> PathBuf {
        self.bundle_dir(guid).join(INFO_FILE_NAME)
    }

    /// Private temporary path where a bundle is staged while downloading.
    pub fn temp_file_path(&self, guid: &str) -> PathBuf {
        self.root.join(TEMP_DIR).join(guid)
    }

    /// Admit a staged file into the cache.
    ///
    /// The temp file is strictly verified (size and checksum) against the
    /// descriptor, copied into the sharded location, its info file written,
    /// and only then is the record registered. Any failure along the way
    /// leaves the table without a record, so a crashed or interrupted write
    /// can never masquerade as a valid cache entry. The temp file itself is
    /// left for the caller to clean up.
    pub async fn write(
        &self,
        bundle: &BundleDescriptor,
        temp_path: &Path,
    ) -> Result<CacheRecord> {
        let guid = &bundle.content_hash;
        let outcome = verify_file(
            temp_path,
            bundle.file_size,
            bundle.file_checksum,
            VerifyLevel::High,
        )
        .await?;
        if !outcome.is_ok() {
            warn!("staged file for {guid} failed verification: {outcome:?}");
            return Err(Error::VerificationFailed {
                guid: guid.clone(),
                outcome,
            });
        }

        let dir = self.bundle_dir(guid);
        ensure_dir(&dir).await?;

        let data_path = dir.join(self.data_file_name(bundle));
        tokio::fs::copy(temp_path, &data_path).await?;

        let info_path = dir.join(INFO_FILE_NAME);
        write_info_file(&info_path, bundle.file_checksum, bundle.file_size).await?;

        let record = CacheRecord {
            data_file_path: data_path,
            info_file_path: info_path,
            file_checksum: bundle.file_checksum,
            file_size: bundle.file_size,
        };
        self.records.insert(guid.clone(), record.clone());

        debug!(guid, size = bundle.file_size, "bundle admitted to cache");
        Ok(record)
    }

    /// Verify a cached bundle at the given level.
    ///
    /// A bundle with no record reports [`VerifyOutcome::CacheMissing`]
    /// without touching the disk.
    pub async fn verify(
        &self,
        bundle: &BundleDescriptor,
        level: VerifyLevel,
    ) -> Result<VerifyOutcome> {
        let Some(record) = self.record(bundle) else {
            return Ok(VerifyOutcome::CacheMissing);
        };
        Ok(verify_file(
            &record.data_file_path,
            record.file_size,
            record.file_checksum,
            level,
        )
        .await?)
    }

    /// Evict one bundle: drop its record and remove its folder.
    ///
    /// Returns whether an on-disk entry existed.
    pub async fn delete(&self, guid: &str) -> Result<bool> {
        self.records.remove(guid);
        remove_dir_if_present(&self.bundle_dir(guid)).await
    }

    /// Read a cached bundle's payload bytes.
    ///
    /// Encrypted bundles route through the injected decryption service;
    /// the store never implements cipher logic itself.
    pub async fn read_bundle_data(&self, bundle: &BundleDescriptor) -> Result<Vec<u8>> {
        let guid = &bundle.content_hash;
        let record = self.record(bundle).ok_or_else(|| Error::NotCached {
            guid: guid.clone(),
        })?;

        if bundle.encrypted {
            let service = self
                .decryption
                .as_ref()
                .ok_or_else(|| Error::NoDecryptionService { guid: guid.clone() })?;
            return service
                .decrypt_file(&record.data_file_path, record.file_checksum)
                .await;
        }

        Ok(tokio::fs::read(&record.data_file_path).await?)
    }

    /// Scan the bundle root and re-admit entries that survive verification.
    ///
    /// Entries whose info file is unreadable or whose data file fails the
    /// configured verification level are deleted. Verification runs with
    /// bounded concurrency; the cheap default level keeps a large cache's
    /// startup fast, the strict level is for verifying individual bundles
    /// right after download.
    pub async fn initialize(&self) -> Result<usize> {
        let mut candidates = Vec::new();
        let bundle_root = self.root.join(BUNDLE_DIR);
        let mut shards = tokio::fs::read_dir(&bundle_root).await?;
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut entries = tokio::fs::read_dir(shard.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    candidates.push(entry.path());
                }
            }
        }

        let level = self.config.verify_level;
        let outcomes = stream::iter(candidates)
            .map(|dir| async move { (readmit_entry(&dir, level).await, dir) })
            .buffer_unordered(self.config.verify_concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut admitted = 0usize;
        for (outcome, dir) in outcomes {
            match outcome {
                Ok(Some((guid, record))) => {
                    self.records.insert(guid, record);
                    admitted += 1;
                }
                Ok(None) => {
                    warn!("removing failed cache entry at {dir:?}");
                    remove_dir_if_present(&dir).await?;
                }
                Err(e) => return Err(e),
            }
        }

        info!(admitted, "cache startup scan complete");
        Ok(admitted)
    }

    /// Remove every cached bundle file and record.
    pub async fn clear_all_bundles(&self) -> Result<usize> {
        let guids: Vec<String> = self.records.iter().map(|r| r.key().clone()).collect();
        let cleared = guids.len();
        for guid in guids {
            self.delete(&guid).await?;
        }
        info!(cleared, "cleared all cached bundles");
        Ok(cleared)
    }

    /// Remove cached bundles the given manifest no longer references.
    ///
    /// This is the disk-reclamation path after a package update: anything
    /// the new manifest still names stays put.
    pub async fn clear_unused_bundles(&self, manifest: &ManifestGraph) -> Result<usize> {
        let unused: Vec<String> = self
            .records
            .iter()
            .map(|r| r.key().clone())
            .filter(|guid| manifest.find_bundle_by_guid(guid).is_none())
            .collect();
        let cleared = unused.len();
        for guid in unused {
            self.delete(&guid).await?;
        }
        info!(cleared, "cleared unused cached bundles");
        Ok(cleared)
    }

    /// Remove any stale files from the temp staging directory.
    pub async fn clear_temp_files(&self) -> Result<usize> {
        let mut cleared = 0usize;
        let mut entries = tokio::fs::read_dir(self.root.join(TEMP_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                tokio::fs::remove_file(entry.path()).await?;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    fn manifest_file_path(&self, package: &str, version: &str) -> PathBuf {
        self.root
            .join(MANIFEST_DIR)
            .join(format!("{package}_{version}.manifest"))
    }

    fn package_hash_path(&self, package: &str, version: &str) -> PathBuf {
        self.root
            .join(MANIFEST_DIR)
            .join(format!("{package}_{version}.hash"))
    }

    /// Persist manifest bytes for a package version.
    pub async fn save_manifest(&self, package: &str, version: &str, data: &[u8]) -> Result<()> {
        tokio::fs::write(self.manifest_file_path(package, version), data).await?;
        Ok(())
    }

    /// Load previously persisted manifest bytes, if any.
    pub async fn load_manifest(&self, package: &str, version: &str) -> Result<Option<Vec<u8>>> {
        read_optional(&self.manifest_file_path(package, version)).await
    }

    /// Persist the recorded hash string for a package version's manifest.
    pub async fn save_package_hash(&self, package: &str, version: &str, hash: &str) -> Result<()> {
        tokio::fs::write(self.package_hash_path(package, version), hash.as_bytes()).await?;
        Ok(())
    }

    /// Load the recorded hash string for a package version, if any.
    pub async fn load_package_hash(&self, package: &str, version: &str) -> Result<Option<String>> {
        match read_optional(&self.package_hash_path(package, version)).await? {
            Some(bytes) => Ok(Some(String::from_utf8(bytes).map_err(|_| {
                Error::InfoFileCorrupt {
                    path: self.package_hash_path(package, version).display().to_string(),
                }
            })?)),
            None => Ok(None),
        }
    }

    /// Remove persisted manifest and hash files for every version of the
    /// given package except `keep_version`.
    pub async fn clear_manifest_files(&self, package: &str, keep_version: &str) -> Result<usize> {
        let prefix = format!("{package}_");
        let keep_manifest = format!("{package}_{keep_version}.manifest");
        let keep_hash = format!("{package}_{keep_version}.hash");

        let mut cleared = 0usize;
        let mut entries = tokio::fs::read_dir(self.root.join(MANIFEST_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(&prefix) && name != keep_manifest && name != keep_hash {
                tokio::fs::remove_file(entry.path()).await?;
                cleared += 1;
            }
        }
        Ok(cleared)
    }
}

/// Re-admit one scanned cache folder: parse its info file, locate the data
/// file, verify at the configured level. `None` means the entry is bad and
/// should be deleted.
async fn readmit_entry(dir: &Path, level: VerifyLevel) -> Result<Option<(String, CacheRecord)>> {
    let Some(guid) = dir.file_name().and_then(|n| n.to_str()) else {
        return Ok(None);
    };

    let info_path = dir.join(INFO_FILE_NAME);
    let (checksum, size) = match read_info_file(&info_path).await {
        Ok(pair) => pair,
        Err(Error::Io(e)) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(Error::InfoFileCorrupt { .. }) => return Ok(None),
        Err(e) => return Err(e),
    };

    // The data file name may carry an appended extension.
    let Some(data_path) = find_data_file(dir).await? else {
        return Ok(None);
    };

    if !verify_file(&data_path, size, checksum, level).await?.is_ok() {
        return Ok(None);
    }

    Ok(Some((
        guid.to_string(),
        CacheRecord {
            data_file_path: data_path,
            info_file_path: info_path,
            file_checksum: checksum,
            file_size: size,
        },
    )))
}

async fn find_data_file(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(DATA_FILE_NAME) {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}

/// Create a directory and its parents if missing.
pub(crate) async fn ensure_dir(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

async fn remove_dir_if_present(path: &Path) -> Result<bool> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

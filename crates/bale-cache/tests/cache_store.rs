//! Cache store behavior over a real temp directory

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bale_cache::{
    CacheConfig, CacheStore, DecryptionService, Error, Result, VerifyLevel, VerifyOutcome,
};
use bale_manifest::{
    crc32, md5_hex, parse_manifest, write_manifest, AssetDescriptor, BundleDescriptor,
    FileNameStyle, ManifestGraph, ManifestHeader, FORMAT_VERSION_1_5,
};
use pretty_assertions::assert_eq;

fn bundle_for(payload: &[u8], name: &str) -> BundleDescriptor {
    BundleDescriptor {
        bundle_name: name.to_string(),
        content_hash: md5_hex(payload),
        file_checksum: crc32(payload),
        file_size: payload.len() as u64,
        encrypted: false,
        tags: Vec::new(),
        depend_bundle_ids: Vec::new(),
        reference_bundle_ids: Vec::new(),
        remote_file_name: String::new(),
    }
}

async fn stage(store: &CacheStore, bundle: &BundleDescriptor, payload: &[u8]) -> std::path::PathBuf {
    let temp = store.temp_file_path(&bundle.content_hash);
    tokio::fs::write(&temp, payload).await.unwrap();
    temp
}

#[tokio::test]
async fn write_admits_verified_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), CacheConfig::default())
        .await
        .unwrap();

    let payload = b"bundle payload bytes";
    let bundle = bundle_for(payload, "ui.bundle");
    assert!(!store.exists(&bundle));

    let temp = stage(&store, &bundle, payload).await;
    let record = store.write(&bundle, &temp).await.unwrap();

    assert!(store.exists(&bundle));
    assert_eq!(record.file_size, payload.len() as u64);
    let on_disk = tokio::fs::read(&record.data_file_path).await.unwrap();
    assert_eq!(on_disk, payload);

    // Sharded layout: .../bundles/<2-char prefix>/<guid>/__data
    let prefix = &bundle.content_hash[..2];
    assert!(record
        .data_file_path
        .to_string_lossy()
        .contains(&format!("{prefix}/{}", bundle.content_hash)));

    let verified = store.verify(&bundle, VerifyLevel::High).await.unwrap();
    assert_eq!(verified, VerifyOutcome::Ok);
}

#[tokio::test]
async fn corrupt_staged_file_leaves_no_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), CacheConfig::default())
        .await
        .unwrap();

    let payload = b"expected payload";
    let bundle = bundle_for(payload, "a.bundle");
    // Stage bytes that match the size but not the checksum.
    let temp = stage(&store, &bundle, b"tampered payload").await;

    match store.write(&bundle, &temp).await {
        Err(Error::VerificationFailed { outcome, .. }) => {
            assert!(matches!(outcome, VerifyOutcome::ChecksumMismatch { .. }));
        }
        other => panic!("expected VerificationFailed, got {other:?}"),
    }
    assert!(!store.exists(&bundle));
    assert_eq!(
        store.verify(&bundle, VerifyLevel::Low).await.unwrap(),
        VerifyOutcome::CacheMissing
    );
}

#[tokio::test]
async fn short_staged_file_reports_size_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), CacheConfig::default())
        .await
        .unwrap();

    let payload = b"full sized payload";
    let bundle = bundle_for(payload, "a.bundle");
    let temp = stage(&store, &bundle, &payload[..5]).await;

    match store.write(&bundle, &temp).await {
        Err(Error::VerificationFailed { outcome, .. }) => {
            assert!(matches!(outcome, VerifyOutcome::SizeMismatch { .. }));
        }
        other => panic!("expected VerificationFailed, got {other:?}"),
    }
    assert!(!store.exists(&bundle));
}

#[tokio::test]
async fn startup_scan_readmits_good_entries_and_deletes_bad_ones() {
    let dir = tempfile::tempdir().unwrap();

    let good_payload = b"good entry";
    let good = bundle_for(good_payload, "good.bundle");
    let bad_payload = b"bad entry";
    let bad = bundle_for(bad_payload, "bad.bundle");

    {
        let store = CacheStore::open(dir.path(), CacheConfig::default())
            .await
            .unwrap();
        let temp = stage(&store, &good, good_payload).await;
        store.write(&good, &temp).await.unwrap();
        let temp = stage(&store, &bad, bad_payload).await;
        let record = store.write(&bad, &temp).await.unwrap();
        // Truncate the bad entry's data file behind the store's back.
        tokio::fs::write(&record.data_file_path, b"x").await.unwrap();
    }

    // A fresh store starts with an empty table until the scan runs.
    let store = CacheStore::open(dir.path(), CacheConfig::default())
        .await
        .unwrap();
    assert!(!store.exists(&good));

    let admitted = store.initialize().await.unwrap();
    assert_eq!(admitted, 1);
    assert!(store.exists(&good));
    assert!(!store.exists(&bad));

    // The bad entry's folder is gone from disk too.
    let rescanned = CacheStore::open(dir.path(), CacheConfig::default())
        .await
        .unwrap();
    assert_eq!(rescanned.initialize().await.unwrap(), 1);
}

#[tokio::test]
async fn low_level_scan_accepts_undersized_file() {
    let dir = tempfile::tempdir().unwrap();
    let payload = b"will be truncated";
    let bundle = bundle_for(payload, "t.bundle");

    {
        let store = CacheStore::open(dir.path(), CacheConfig::default())
            .await
            .unwrap();
        let temp = stage(&store, &bundle, payload).await;
        let record = store.write(&bundle, &temp).await.unwrap();
        tokio::fs::write(&record.data_file_path, b"xy").await.unwrap();
    }

    // Low only checks existence, so the truncated file survives the scan.
    let config = CacheConfig {
        verify_level: VerifyLevel::Low,
        ..CacheConfig::default()
    };
    let store = CacheStore::open(dir.path(), config).await.unwrap();
    assert_eq!(store.initialize().await.unwrap(), 1);

    // Medium catches it.
    let config = CacheConfig {
        verify_level: VerifyLevel::Medium,
        ..CacheConfig::default()
    };
    let store = CacheStore::open(dir.path(), config).await.unwrap();
    assert_eq!(store.initialize().await.unwrap(), 0);
}

#[tokio::test]
async fn delete_removes_record_and_folder() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), CacheConfig::default())
        .await
        .unwrap();

    let payload = b"to be deleted";
    let bundle = bundle_for(payload, "d.bundle");
    let temp = stage(&store, &bundle, payload).await;
    let record = store.write(&bundle, &temp).await.unwrap();

    assert!(store.delete(&bundle.content_hash).await.unwrap());
    assert!(!store.exists(&bundle));
    assert!(!record.data_file_path.exists());

    // Deleting again reports that nothing was on disk.
    assert!(!store.delete(&bundle.content_hash).await.unwrap());
}

fn manifest_with(bundles: Vec<BundleDescriptor>) -> ManifestGraph {
    let header = ManifestHeader {
        format_version: FORMAT_VERSION_1_5.to_string(),
        addressable: false,
        extensionless_lookup: false,
        output_name_style: FileNameStyle::HashName,
        build_pipeline: "scriptable".to_string(),
        package_name: "demo".to_string(),
        package_version: "1".to_string(),
        package_note: String::new(),
    };
    let assets: Vec<AssetDescriptor> = Vec::new();
    let data = write_manifest(&header, &assets, &bundles).unwrap();
    parse_manifest(&data, None).unwrap()
}

#[tokio::test]
async fn clear_unused_keeps_manifest_referenced_bundles() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), CacheConfig::default())
        .await
        .unwrap();

    let kept_payload = b"still referenced";
    let kept = bundle_for(kept_payload, "kept.bundle");
    let stale_payload = b"no longer referenced";
    let stale = bundle_for(stale_payload, "stale.bundle");

    let temp = stage(&store, &kept, kept_payload).await;
    store.write(&kept, &temp).await.unwrap();
    let temp = stage(&store, &stale, stale_payload).await;
    store.write(&stale, &temp).await.unwrap();

    let manifest = manifest_with(vec![kept.clone()]);
    let cleared = store.clear_unused_bundles(&manifest).await.unwrap();
    assert_eq!(cleared, 1);
    assert!(store.exists(&kept));
    assert!(!store.exists(&stale));
}

#[tokio::test]
async fn clear_all_empties_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), CacheConfig::default())
        .await
        .unwrap();

    for name in ["a.bundle", "b.bundle"] {
        let payload = format!("payload {name}").into_bytes();
        let bundle = bundle_for(&payload, name);
        let temp = stage(&store, &bundle, &payload).await;
        store.write(&bundle, &temp).await.unwrap();
    }

    assert_eq!(store.clear_all_bundles().await.unwrap(), 2);
    assert_eq!(store.record_count(), 0);
}

struct XorDecrypt;

#[async_trait]
impl DecryptionService for XorDecrypt {
    async fn decrypt_file(&self, path: &Path, _expected_checksum: u32) -> Result<Vec<u8>> {
        let bytes = tokio::fs::read(path).await?;
        Ok(bytes.iter().map(|b| b ^ 0x5a).collect())
    }
}

#[tokio::test]
async fn encrypted_bundle_routes_through_decryption_service() {
    let dir = tempfile::tempdir().unwrap();

    let plain = b"secret bundle contents";
    let scrambled: Vec<u8> = plain.iter().map(|b| b ^ 0x5a).collect();
    let mut bundle = bundle_for(&scrambled, "enc.bundle");
    bundle.encrypted = true;

    // Without a service, reads of encrypted bundles are refused.
    let store = CacheStore::open(dir.path(), CacheConfig::default())
        .await
        .unwrap();
    let temp = stage(&store, &bundle, &scrambled).await;
    store.write(&bundle, &temp).await.unwrap();
    assert!(matches!(
        store.read_bundle_data(&bundle).await,
        Err(Error::NoDecryptionService { .. })
    ));

    let store = CacheStore::open(dir.path(), CacheConfig::default())
        .await
        .unwrap()
        .with_decryption(Arc::new(XorDecrypt));
    store.initialize().await.unwrap();
    let decrypted = store.read_bundle_data(&bundle).await.unwrap();
    assert_eq!(decrypted, plain);
}

#[tokio::test]
async fn plain_bundle_reads_directly() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), CacheConfig::default())
        .await
        .unwrap();

    let payload = b"plain contents";
    let bundle = bundle_for(payload, "p.bundle");
    assert!(matches!(
        store.read_bundle_data(&bundle).await,
        Err(Error::NotCached { .. })
    ));

    let temp = stage(&store, &bundle, payload).await;
    store.write(&bundle, &temp).await.unwrap();
    assert_eq!(store.read_bundle_data(&bundle).await.unwrap(), payload);
}

#[tokio::test]
async fn append_extension_toggle_names_data_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig {
        append_file_extension: true,
        ..CacheConfig::default()
    };
    let store = CacheStore::open(dir.path(), config).await.unwrap();

    let payload = b"with extension";
    let bundle = bundle_for(payload, "model.bundle");
    let temp = stage(&store, &bundle, payload).await;
    let record = store.write(&bundle, &temp).await.unwrap();
    assert!(record.data_file_path.ends_with("__data.bundle"));

    // The startup scan finds the extended name again.
    let rescanned = CacheStore::open(dir.path(), CacheConfig::default())
        .await
        .unwrap();
    assert_eq!(rescanned.initialize().await.unwrap(), 1);
}

#[tokio::test]
async fn manifest_files_roundtrip_and_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), CacheConfig::default())
        .await
        .unwrap();

    assert!(store.load_manifest("demo", "1").await.unwrap().is_none());

    store.save_manifest("demo", "1", b"old bytes").await.unwrap();
    store.save_package_hash("demo", "1", "aabbccdd").await.unwrap();
    store.save_manifest("demo", "2", b"new bytes").await.unwrap();
    store.save_package_hash("demo", "2", "ddccbbaa").await.unwrap();

    assert_eq!(
        store.load_manifest("demo", "2").await.unwrap().as_deref(),
        Some(&b"new bytes"[..])
    );
    assert_eq!(
        store.load_package_hash("demo", "2").await.unwrap().as_deref(),
        Some("ddccbbaa")
    );

    // Keep only the current version's files.
    let cleared = store.clear_manifest_files("demo", "2").await.unwrap();
    assert_eq!(cleared, 2);
    assert!(store.load_manifest("demo", "1").await.unwrap().is_none());
    assert!(store.load_manifest("demo", "2").await.unwrap().is_some());
}

#[tokio::test]
async fn clear_temp_files_sweeps_staging_dir() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path(), CacheConfig::default())
        .await
        .unwrap();

    tokio::fs::write(store.temp_file_path("abc123"), b"partial")
        .await
        .unwrap();
    tokio::fs::write(store.temp_file_path("def456"), b"partial")
        .await
        .unwrap();
    assert_eq!(store.clear_temp_files().await.unwrap(), 2);
    assert_eq!(store.clear_temp_files().await.unwrap(), 0);
}

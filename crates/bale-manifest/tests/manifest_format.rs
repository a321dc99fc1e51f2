//! Wire-format and graph-construction tests over in-memory fixtures

use bale_manifest::{
    md5_hex, parse_manifest, write_manifest, AssetDescriptor, BundleDescriptor, Error,
    FileNameStyle, ManifestHeader, ManifestTransform, Result, FORMAT_VERSION_1_4,
    FORMAT_VERSION_1_5,
};
use pretty_assertions::assert_eq;

fn header(version: &str) -> ManifestHeader {
    ManifestHeader {
        format_version: version.to_string(),
        addressable: false,
        extensionless_lookup: false,
        output_name_style: FileNameStyle::HashName,
        build_pipeline: "scriptable".to_string(),
        package_name: "demo".to_string(),
        package_version: "2026.1".to_string(),
        package_note: String::new(),
    }
}

fn bundle(name: &str, deps: &[u32]) -> BundleDescriptor {
    let payload = format!("payload of {name}");
    BundleDescriptor {
        bundle_name: name.to_string(),
        content_hash: md5_hex(payload.as_bytes()),
        file_checksum: 0x1234_5678,
        file_size: 64,
        encrypted: false,
        tags: Vec::new(),
        depend_bundle_ids: deps.to_vec(),
        reference_bundle_ids: Vec::new(),
        remote_file_name: String::new(),
    }
}

fn asset(path: &str, bundle_id: u32, deps: &[u32]) -> AssetDescriptor {
    AssetDescriptor {
        asset_path: path.to_string(),
        address: String::new(),
        tags: Vec::new(),
        bundle_id,
        depend_bundle_ids: deps.to_vec(),
    }
}

#[test]
fn roundtrip_preserves_descriptors() {
    let bundles = vec![bundle("main.bundle", &[1]), bundle("shared.bundle", &[])];
    let assets = vec![asset("ui/window.prefab", 0, &[1])];
    let data = write_manifest(&header(FORMAT_VERSION_1_5), &assets, &bundles).unwrap();

    let graph = parse_manifest(&data, None).unwrap();
    assert_eq!(graph.bundles().len(), 2);
    assert_eq!(graph.assets().len(), 1);
    assert_eq!(graph.header().package_name, "demo");

    let found = graph.asset("ui/window.prefab").unwrap();
    assert_eq!(found.bundle_id, 0);
    let owner = graph.bundle_for_asset(found).unwrap();
    assert_eq!(owner.bundle_name, "main.bundle");

    // HashName style: file name is the content hash plus extension.
    let expected_name = format!("{}.bundle", owner.content_hash);
    assert_eq!(owner.remote_file_name, expected_name);
    assert!(graph.find_bundle_by_file_name(&expected_name).is_some());
    assert!(graph.find_bundle_by_guid(&owner.content_hash).is_some());
}

#[test]
fn previous_format_version_still_parses() {
    let bundles = vec![bundle("a.bundle", &[])];
    let assets = vec![asset("a.txt", 0, &[])];
    let data = write_manifest(&header(FORMAT_VERSION_1_4), &assets, &bundles).unwrap();

    let graph = parse_manifest(&data, None).unwrap();
    assert_eq!(graph.header().format_version, FORMAT_VERSION_1_4);
    // The flag postdates 1.4.0 manifests and must default off.
    assert!(!graph.header().extensionless_lookup);
}

#[test]
fn unknown_version_rejected() {
    let data = write_manifest(&header(FORMAT_VERSION_1_5), &[], &[bundle("a", &[])]).unwrap();
    // Patch the version string in place: "1.5.0" -> "9.9.0".
    let mut patched = data;
    let pos = patched
        .windows(5)
        .position(|w| w == b"1.5.0")
        .expect("version string present");
    patched[pos..pos + 5].copy_from_slice(b"9.9.0");

    match parse_manifest(&patched, None) {
        Err(Error::UnsupportedVersion { version }) => assert_eq!(version, "9.9.0"),
        other => panic!("expected UnsupportedVersion, got {other:?}"),
    }
}

#[test]
fn bad_signature_rejected() {
    let mut data = write_manifest(&header(FORMAT_VERSION_1_5), &[], &[bundle("a", &[])]).unwrap();
    data[0] ^= 0xff;
    assert!(matches!(
        parse_manifest(&data, None),
        Err(Error::BadSignature)
    ));
}

#[test]
fn every_truncation_fails_without_panicking() {
    let bundles = vec![bundle("main.bundle", &[1]), bundle("shared.bundle", &[])];
    let assets = vec![asset("ui/window.prefab", 0, &[1])];
    let data = write_manifest(&header(FORMAT_VERSION_1_5), &assets, &bundles).unwrap();

    for len in 0..data.len() {
        assert!(
            parse_manifest(&data[..len], None).is_err(),
            "truncation at {len} bytes must fail"
        );
    }
}

#[test]
fn garbled_list_count_rejected() {
    let bundles = vec![bundle("a.bundle", &[])];
    let data = write_manifest(&header(FORMAT_VERSION_1_5), &[], &bundles).unwrap();
    // The asset list count sits right after the header; find the first
    // i32 zero (no assets) and blow it up.
    let note_end = data
        .windows(4)
        .position(|w| w == [0, 0, 0, 0])
        .expect("asset count present");
    let mut patched = data;
    patched[note_end..note_end + 4].copy_from_slice(&i32::MAX.to_le_bytes());

    match parse_manifest(&patched, None) {
        Err(Error::Corrupt { .. }) => {}
        other => panic!("expected Corrupt, got {other:?}"),
    }
}

#[test]
fn dependency_out_of_range_is_fatal() {
    let bundles = vec![bundle("a.bundle", &[7])];
    let data = write_manifest(&header(FORMAT_VERSION_1_5), &[], &bundles).unwrap();
    match parse_manifest(&data, None) {
        Err(Error::BundleNotFound { index, count }) => {
            assert_eq!(index, 7);
            assert_eq!(count, 1);
        }
        other => panic!("expected BundleNotFound, got {other:?}"),
    }
}

#[test]
fn asset_referencing_missing_bundle_is_fatal() {
    let bundles = vec![bundle("a.bundle", &[])];
    let assets = vec![asset("a.txt", 3, &[])];
    let data = write_manifest(&header(FORMAT_VERSION_1_5), &assets, &bundles).unwrap();
    assert!(matches!(
        parse_manifest(&data, None),
        Err(Error::BundleNotFound { index: 3, .. })
    ));
}

#[test]
fn cyclic_dependency_rejected_at_load() {
    // a -> b -> c -> a
    let bundles = vec![
        bundle("a.bundle", &[1]),
        bundle("b.bundle", &[2]),
        bundle("c.bundle", &[0]),
    ];
    let data = write_manifest(&header(FORMAT_VERSION_1_5), &[], &bundles).unwrap();
    assert!(matches!(
        parse_manifest(&data, None),
        Err(Error::CyclicDependency { .. })
    ));
}

#[test]
fn self_dependency_rejected_at_load() {
    let bundles = vec![bundle("a.bundle", &[0])];
    let data = write_manifest(&header(FORMAT_VERSION_1_5), &[], &bundles).unwrap();
    assert!(matches!(
        parse_manifest(&data, None),
        Err(Error::CyclicDependency { .. })
    ));
}

#[test]
fn duplicate_asset_path_rejected() {
    let bundles = vec![bundle("a.bundle", &[])];
    let assets = vec![asset("same.txt", 0, &[]), asset("same.txt", 0, &[])];
    let data = write_manifest(&header(FORMAT_VERSION_1_5), &assets, &bundles).unwrap();
    assert!(matches!(
        parse_manifest(&data, None),
        Err(Error::DuplicateAssetPath { .. })
    ));
}

#[test]
fn transitive_closure_is_complete_and_duplicate_free() {
    // Diamond: main -> {left, right}, left -> base, right -> base.
    let bundles = vec![
        bundle("main.bundle", &[1, 2]),
        bundle("left.bundle", &[3]),
        bundle("right.bundle", &[3]),
        bundle("base.bundle", &[]),
    ];
    let assets = vec![asset("hero.prefab", 0, &[1, 2])];
    let data = write_manifest(&header(FORMAT_VERSION_1_5), &assets, &bundles).unwrap();
    let graph = parse_manifest(&data, None).unwrap();

    let main = graph.bundle(0).unwrap();
    let closure: Vec<&str> = graph
        .all_dependencies_of_bundle(main)
        .iter()
        .map(|b| b.bundle_name.as_str())
        .collect();
    assert_eq!(closure, vec!["left.bundle", "right.bundle", "base.bundle"]);

    // A second run returns the same stable order.
    let closure_again: Vec<&str> = graph
        .all_dependencies_of_bundle(main)
        .iter()
        .map(|b| b.bundle_name.as_str())
        .collect();
    assert_eq!(closure, closure_again);

    let hero = graph.asset("hero.prefab").unwrap();
    let asset_closure: Vec<&str> = graph
        .all_dependencies_of_asset(hero)
        .iter()
        .map(|b| b.bundle_name.as_str())
        .collect();
    assert_eq!(
        asset_closure,
        vec!["left.bundle", "right.bundle", "base.bundle"]
    );
}

#[test]
fn reverse_references_populated() {
    let bundles = vec![
        bundle("main.bundle", &[1]),
        bundle("shared.bundle", &[]),
        bundle("other.bundle", &[1]),
    ];
    let data = write_manifest(&header(FORMAT_VERSION_1_5), &[], &bundles).unwrap();
    let graph = parse_manifest(&data, None).unwrap();

    let shared = graph.bundle(1).unwrap();
    assert_eq!(shared.reference_bundle_ids, vec![0, 2]);
    assert!(graph.bundle(0).unwrap().reference_bundle_ids.is_empty());
}

#[test]
fn addressable_and_extensionless_lookup() {
    let mut hdr = header(FORMAT_VERSION_1_5);
    hdr.addressable = true;
    hdr.extensionless_lookup = true;

    let bundles = vec![bundle("a.bundle", &[])];
    let mut a = asset("ui/window.prefab", 0, &[]);
    a.address = "Window".to_string();
    let data = write_manifest(&hdr, &[a], &bundles).unwrap();
    let graph = parse_manifest(&data, None).unwrap();

    assert!(graph.asset("ui/window.prefab").is_some());
    assert!(graph.asset("ui/window").is_some());
    assert!(graph.asset("Window").is_some());
    assert!(graph.asset("missing").is_none());
}

#[test]
fn tag_queries_filter_bundles() {
    let mut preload = bundle("preload.bundle", &[]);
    preload.tags = vec!["preload".to_string()];
    let plain = bundle("plain.bundle", &[]);
    let data = write_manifest(&header(FORMAT_VERSION_1_5), &[], &[preload, plain]).unwrap();
    let graph = parse_manifest(&data, None).unwrap();

    let tagged = graph.bundles_with_tags(&["preload"]);
    assert_eq!(tagged.len(), 1);
    assert_eq!(tagged[0].bundle_name, "preload.bundle");
    assert!(graph.bundles_with_tags(&["missing"]).is_empty());
}

struct XorTransform;

impl ManifestTransform for XorTransform {
    fn restore(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.iter().map(|b| b ^ 0x5a).collect())
    }
}

#[test]
fn transform_runs_before_parsing() {
    let bundles = vec![bundle("a.bundle", &[])];
    let plain = write_manifest(&header(FORMAT_VERSION_1_5), &[], &bundles).unwrap();
    let scrambled: Vec<u8> = plain.iter().map(|b| b ^ 0x5a).collect();

    assert!(parse_manifest(&scrambled, None).is_err());
    let graph = parse_manifest(&scrambled, Some(&XorTransform)).unwrap();
    assert_eq!(graph.bundles().len(), 1);
}

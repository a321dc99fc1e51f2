//! Binary manifest deserialization
//!
//! Parsing is defensive: a bad signature, an unknown version, a garbled
//! length prefix, or a truncated buffer all surface as structured errors.
//! A manifest that fails to parse is unusable as a whole; callers fall
//! back to re-fetching it rather than attempting partial repair.

use std::io::Cursor;

use tracing::debug;

use crate::graph::ManifestHeader;
use crate::ioutils::ReadWire;
use crate::{
    AssetDescriptor, BundleDescriptor, Error, FileNameStyle, ManifestGraph, Result,
    FORMAT_VERSION_1_4, FORMAT_VERSION_1_5, MANIFEST_SIGNATURE,
};

/// Injected transform applied to the raw manifest bytes before parsing,
/// typically a decryption pass. The engine never implements cipher logic
/// itself.
pub trait ManifestTransform: Send + Sync {
    /// Restore the manifest bytes to their plain form.
    fn restore(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Smallest possible asset record on the wire, used to bound list counts.
const MIN_ASSET_RECORD_LEN: u64 = 16;
/// Smallest possible bundle record on the wire, used to bound list counts.
const MIN_BUNDLE_RECORD_LEN: u64 = 25;

/// Parse a binary manifest into a validated [`ManifestGraph`].
///
/// When `transform` is given it runs over the raw bytes first.
pub fn parse_manifest(
    data: &[u8],
    transform: Option<&dyn ManifestTransform>,
) -> Result<ManifestGraph> {
    let restored;
    let data = match transform {
        Some(transform) => {
            restored = transform.restore(data)?;
            &restored[..]
        }
        None => data,
    };

    if data.is_empty() {
        return Err(Error::corrupt("manifest buffer is empty"));
    }

    let mut cursor = Cursor::new(data);

    let signature = wire(cursor.read_u32le(), "file signature")?;
    if signature != MANIFEST_SIGNATURE {
        return Err(Error::BadSignature);
    }

    let format_version = wire(cursor.read_utf8(), "format version")?;
    let has_extensionless_flag = match format_version.as_str() {
        FORMAT_VERSION_1_5 => true,
        FORMAT_VERSION_1_4 => false,
        _ => {
            return Err(Error::UnsupportedVersion {
                version: format_version,
            });
        }
    };

    let addressable = wire(cursor.read_bool(), "addressable flag")?;
    // The extensionless-lookup flag postdates 1.4.0 manifests.
    let extensionless_lookup = if has_extensionless_flag {
        wire(cursor.read_bool(), "extensionless lookup flag")?
    } else {
        false
    };
    let output_name_style = FileNameStyle::from_wire(wire(cursor.read_i32le(), "name style")?)?;
    let build_pipeline = wire(cursor.read_utf8(), "build pipeline")?;
    let package_name = wire(cursor.read_utf8(), "package name")?;
    let package_version = wire(cursor.read_utf8(), "package version")?;
    let package_note = wire(cursor.read_utf8(), "package note")?;

    let header = ManifestHeader {
        format_version,
        addressable,
        extensionless_lookup,
        output_name_style,
        build_pipeline,
        package_name,
        package_version,
        package_note,
    };

    let asset_count = read_list_count(&mut cursor, data.len(), MIN_ASSET_RECORD_LEN, "asset list")?;
    let mut assets = Vec::with_capacity(asset_count);
    for _ in 0..asset_count {
        assets.push(read_asset(&mut cursor)?);
    }

    let bundle_count = read_list_count(
        &mut cursor,
        data.len(),
        MIN_BUNDLE_RECORD_LEN,
        "bundle list",
    )?;
    let mut bundles = Vec::with_capacity(bundle_count);
    for _ in 0..bundle_count {
        bundles.push(read_bundle(&mut cursor)?);
    }

    debug!(
        package = header.package_name,
        version = header.package_version,
        format = header.format_version,
        "manifest deserialized"
    );

    ManifestGraph::build(header, bundles, assets)
}

fn read_asset(cursor: &mut Cursor<&[u8]>) -> Result<AssetDescriptor> {
    let asset_path = wire(cursor.read_utf8(), "asset path")?;
    let address = wire(cursor.read_utf8(), "asset address")?;
    let tags = wire(cursor.read_utf8_array(), "asset tags")?;
    let bundle_id = bundle_id(wire(cursor.read_i32le(), "asset bundle id")?)?;
    let depend_bundle_ids = bundle_ids(wire(cursor.read_i32_array(), "asset dependency ids")?)?;
    Ok(AssetDescriptor {
        asset_path,
        address,
        tags,
        bundle_id,
        depend_bundle_ids,
    })
}

fn read_bundle(cursor: &mut Cursor<&[u8]>) -> Result<BundleDescriptor> {
    let bundle_name = wire(cursor.read_utf8(), "bundle name")?;
    let content_hash = wire(cursor.read_utf8(), "bundle content hash")?;
    let file_checksum = wire(cursor.read_u32le(), "bundle checksum")?;
    let file_size = wire(cursor.read_u64le(), "bundle size")?;
    let encrypted = wire(cursor.read_bool(), "bundle encrypted flag")?;
    let tags = wire(cursor.read_utf8_array(), "bundle tags")?;
    let depend_bundle_ids = bundle_ids(wire(cursor.read_i32_array(), "bundle dependency ids")?)?;
    Ok(BundleDescriptor {
        bundle_name,
        content_hash,
        file_checksum,
        file_size,
        encrypted,
        tags,
        depend_bundle_ids,
        reference_bundle_ids: Vec::new(),
        remote_file_name: String::new(),
    })
}

/// Read a list count and bound it against the bytes actually left in the
/// buffer, so a garbled prefix fails fast instead of allocating wildly.
fn read_list_count(
    cursor: &mut Cursor<&[u8]>,
    total_len: usize,
    min_record_len: u64,
    what: &str,
) -> Result<usize> {
    let count = wire(cursor.read_i32le(), what)?;
    let count = usize::try_from(count)
        .map_err(|_| Error::corrupt(format!("negative count in {what}: {count}")))?;

    let remaining = (total_len as u64).saturating_sub(cursor.position());
    if count as u64 * min_record_len > remaining {
        return Err(Error::corrupt(format!(
            "{what} count {count} exceeds remaining buffer of {remaining} bytes"
        )));
    }
    Ok(count)
}

fn bundle_id(value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::corrupt(format!("negative bundle id: {value}")))
}

fn bundle_ids(values: Vec<i32>) -> Result<Vec<u32>> {
    values.into_iter().map(bundle_id).collect()
}

fn wire<T>(result: std::io::Result<T>, what: &str) -> Result<T> {
    result.map_err(|e| Error::corrupt(format!("failed to read {what}: {e}")))
}

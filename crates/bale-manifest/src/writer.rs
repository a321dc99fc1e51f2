//! Binary manifest serialization
//!
//! The writer exists for cache persistence and for producing test
//! fixtures; the build pipeline that creates production manifests is a
//! separate system.

use crate::graph::ManifestHeader;
use crate::ioutils::WriteWire;
use crate::{
    AssetDescriptor, BundleDescriptor, Error, ManifestGraph, Result, FORMAT_VERSION_1_4,
    FORMAT_VERSION_1_5, MANIFEST_SIGNATURE,
};

/// Serialize a manifest to its binary form.
///
/// The header's `format_version` selects the wire layout; only the
/// supported versions can be written.
pub fn write_manifest(
    header: &ManifestHeader,
    assets: &[AssetDescriptor],
    bundles: &[BundleDescriptor],
) -> Result<Vec<u8>> {
    let has_extensionless_flag = match header.format_version.as_str() {
        FORMAT_VERSION_1_5 => true,
        FORMAT_VERSION_1_4 => false,
        _ => {
            return Err(Error::UnsupportedVersion {
                version: header.format_version.clone(),
            });
        }
    };

    let mut out = Vec::new();
    out.write_u32le(MANIFEST_SIGNATURE)?;
    out.write_utf8(&header.format_version)?;
    out.write_bool(header.addressable)?;
    if has_extensionless_flag {
        out.write_bool(header.extensionless_lookup)?;
    }
    out.write_i32le(header.output_name_style.to_wire())?;
    out.write_utf8(&header.build_pipeline)?;
    out.write_utf8(&header.package_name)?;
    out.write_utf8(&header.package_version)?;
    out.write_utf8(&header.package_note)?;

    out.write_i32le(list_count(assets.len())?)?;
    for asset in assets {
        out.write_utf8(&asset.asset_path)?;
        out.write_utf8(&asset.address)?;
        out.write_utf8_array(&asset.tags)?;
        out.write_i32le(wire_id(asset.bundle_id)?)?;
        write_id_array(&mut out, &asset.depend_bundle_ids)?;
    }

    out.write_i32le(list_count(bundles.len())?)?;
    for bundle in bundles {
        out.write_utf8(&bundle.bundle_name)?;
        out.write_utf8(&bundle.content_hash)?;
        out.write_u32le(bundle.file_checksum)?;
        out.write_u64le(bundle.file_size)?;
        out.write_bool(bundle.encrypted)?;
        out.write_utf8_array(&bundle.tags)?;
        write_id_array(&mut out, &bundle.depend_bundle_ids)?;
    }

    Ok(out)
}

impl ManifestGraph {
    /// Serialize this graph back to its binary form.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        write_manifest(self.header(), self.assets(), self.bundles())
    }
}

fn write_id_array(out: &mut Vec<u8>, ids: &[u32]) -> Result<()> {
    out.write_i32le(list_count(ids.len())?)?;
    for id in ids {
        out.write_i32le(wire_id(*id)?)?;
    }
    Ok(())
}

fn wire_id(id: u32) -> Result<i32> {
    i32::try_from(id).map_err(|_| Error::corrupt(format!("bundle id too large: {id}")))
}

fn list_count(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| Error::corrupt(format!("list too long: {len} entries")))
}

//! Bundle and asset descriptors
//!
//! Both types are immutable after manifest load. The derived fields
//! (`reference_bundle_ids`, `remote_file_name`) are filled in by the
//! post-load pass in [`crate::ManifestGraph`].

use crate::{Error, Result};

/// Naming style used for a bundle's remote file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileNameStyle {
    /// `<content-hash><ext>`
    HashName,
    /// `<bundle-name>`
    BundleName,
    /// `<bundle-name-stem>_<content-hash><ext>`
    BundleNameHashName,
}

impl FileNameStyle {
    /// Decode the wire representation of a name style.
    pub fn from_wire(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Self::HashName),
            1 => Ok(Self::BundleName),
            2 => Ok(Self::BundleNameHashName),
            other => Err(Error::corrupt(format!("invalid file name style: {other}"))),
        }
    }

    /// Encode the wire representation of a name style.
    pub fn to_wire(self) -> i32 {
        match self {
            Self::HashName => 0,
            Self::BundleName => 1,
            Self::BundleNameHashName => 2,
        }
    }
}

/// Describes one content-addressed bundle in a manifest.
#[derive(Debug, Clone)]
pub struct BundleDescriptor {
    /// Logical bundle name, unique within the manifest
    pub bundle_name: String,
    /// Content hash of the bundle file, the bundle's identity (GUID)
    pub content_hash: String,
    /// CRC32 checksum of the bundle file
    pub file_checksum: u32,
    /// Declared size of the bundle file in bytes
    pub file_size: u64,
    /// Whether the bundle payload is encrypted
    pub encrypted: bool,
    /// Classification tags
    pub tags: Vec<String>,
    /// Indices of bundles this bundle depends on
    pub depend_bundle_ids: Vec<u32>,
    /// Indices of bundles that depend on this bundle (reverse edges,
    /// computed at load time)
    pub reference_bundle_ids: Vec<u32>,
    /// File name used on the remote server, computed at load time from the
    /// manifest's name style
    pub remote_file_name: String,
}

impl BundleDescriptor {
    /// File extension of the bundle name, including the leading dot.
    /// Empty when the bundle name has no extension.
    pub fn file_extension(&self) -> &str {
        match self.bundle_name.rfind('.') {
            Some(pos) => &self.bundle_name[pos..],
            None => "",
        }
    }

    /// Compute the remote file name for the given naming style.
    pub fn resolve_remote_file_name(&self, style: FileNameStyle) -> String {
        let extension = self.file_extension();
        match style {
            FileNameStyle::HashName => format!("{}{extension}", self.content_hash),
            FileNameStyle::BundleName => self.bundle_name.clone(),
            FileNameStyle::BundleNameHashName => {
                if extension.is_empty() {
                    format!("{}_{}", self.bundle_name, self.content_hash)
                } else {
                    let stem = &self.bundle_name[..self.bundle_name.len() - extension.len()];
                    format!("{stem}_{}{extension}", self.content_hash)
                }
            }
        }
    }

    /// Whether this bundle carries any of the given tags.
    pub fn has_tag(&self, tags: &[&str]) -> bool {
        if tags.is_empty() || self.tags.is_empty() {
            return false;
        }
        tags.iter().any(|tag| self.tags.iter().any(|t| t == tag))
    }

    /// Whether this bundle carries at least one tag.
    pub fn has_any_tags(&self) -> bool {
        !self.tags.is_empty()
    }
}

/// Describes one logical asset and the bundles needed to resolve it.
#[derive(Debug, Clone)]
pub struct AssetDescriptor {
    /// Logical asset path, unique within the manifest
    pub asset_path: String,
    /// Optional addressable alias for the asset, empty when unused
    pub address: String,
    /// Classification tags
    pub tags: Vec<String>,
    /// Index of the bundle that contains this asset
    pub bundle_id: u32,
    /// Indices of the bundles needed to resolve this asset, pre-flattened
    /// at build time
    pub depend_bundle_ids: Vec<u32>,
}

impl AssetDescriptor {
    /// Whether this asset carries any of the given tags.
    pub fn has_tag(&self, tags: &[&str]) -> bool {
        if tags.is_empty() || self.tags.is_empty() {
            return false;
        }
        tags.iter().any(|tag| self.tags.iter().any(|t| t == tag))
    }
}

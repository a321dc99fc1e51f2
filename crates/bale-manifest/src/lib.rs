//! Bundle manifest format and dependency graph
//!
//! A manifest describes every bundle and asset in a package and the
//! dependency edges between them. This crate deserializes the versioned
//! binary format into an immutable [`ManifestGraph`], validates every
//! dependency reference, rejects cyclic dependency data, and answers the
//! read-only queries the rest of the engine needs: asset lookup by
//! logical location, bundle lookup by file name or content hash, and
//! duplicate-free transitive dependency closures.

mod descriptor;
mod error;
mod graph;
mod ioutils;
mod reader;
mod verify;
mod writer;

pub use descriptor::{AssetDescriptor, BundleDescriptor, FileNameStyle};
pub use error::{Error, Result};
pub use graph::{ManifestGraph, ManifestHeader};
pub use ioutils::{ReadWire, WriteWire};
pub use reader::{parse_manifest, ManifestTransform};
pub use verify::{crc32, crc32_hex, md5_hex, verify_manifest_data};
pub use writer::write_manifest;

/// Fixed signature at the start of every manifest file.
pub const MANIFEST_SIGNATURE: u32 = 0x454C_4142;

/// Previous manifest format version. Predates the extensionless-lookup
/// header flag.
pub const FORMAT_VERSION_1_4: &str = "1.4.0";

/// Current manifest format version.
pub const FORMAT_VERSION_1_5: &str = "1.5.0";

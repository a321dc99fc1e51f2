//! Error types for manifest parsing and graph queries

use thiserror::Error;

/// Error types for manifest operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error while reading or writing manifest data
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The manifest binary data is malformed
    #[error("Manifest data is corrupt: {reason}")]
    Corrupt {
        /// What was wrong with the data
        reason: String,
    },

    /// The manifest file signature did not match
    #[error("Manifest has incorrect signature - possibly wrong file format")]
    BadSignature,

    /// The manifest format version is not supported
    #[error("Unsupported manifest format version: {version}")]
    UnsupportedVersion {
        /// The version string found in the file
        version: String,
    },

    /// A descriptor referenced a bundle index outside the bundle list
    #[error("Bundle index {index} is out of range, must be less than {count}")]
    BundleNotFound {
        /// The out-of-range bundle index
        index: i64,
        /// Number of bundles in the manifest
        count: usize,
    },

    /// The bundle dependency data contains a cycle
    #[error("Cyclic bundle dependency detected at '{bundle_name}'")]
    CyclicDependency {
        /// Name of a bundle on the cycle
        bundle_name: String,
    },

    /// Two assets declared the same logical path
    #[error("Duplicate asset path: {path}")]
    DuplicateAssetPath {
        /// The duplicated path
        path: String,
    },

    /// Two bundles resolved to the same remote file name
    #[error("Duplicate bundle file name: {file_name}")]
    DuplicateBundleFileName {
        /// The duplicated file name
        file_name: String,
    },

    /// The recorded manifest hash did not match the manifest bytes
    #[error("Manifest hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// Hash recorded alongside the manifest
        expected: String,
        /// Hash computed from the manifest bytes
        actual: String,
    },
}

impl Error {
    /// Create a corrupt-data error
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::Corrupt {
            reason: reason.into(),
        }
    }
}

/// Result type for manifest operations
pub type Result<T> = std::result::Result<T, Error>;

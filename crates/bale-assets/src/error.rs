//! Error types for asset resolution

use thiserror::Error;

/// Error types for asset requests and package operations
#[derive(Error, Debug)]
pub enum Error {
    /// Manifest parsing or graph query failure
    #[error("Manifest error: {0}")]
    Manifest(#[from] bale_manifest::Error),

    /// Cache store failure
    #[error("Cache error: {0}")]
    Cache(#[from] bale_cache::Error),

    /// Download failure
    #[error("Fetch error: {0}")]
    Fetch(#[from] bale_fetch::Error),

    /// No asset exists at the requested location
    #[error("Asset not found: {location}")]
    AssetNotFound {
        /// The requested logical location
        location: String,
    },

    /// An asset referenced a bundle the manifest does not contain
    #[error("Bundle missing in graph for asset '{asset_path}'")]
    BundleMissingInGraph {
        /// Path of the asset whose bundle is missing
        asset_path: String,
    },

    /// The bundle's packed directory does not contain the requested item
    #[error("Item '{item}' not found in bundle '{bundle}'")]
    ItemNotFound {
        /// The packed item path that was requested
        item: String,
        /// Name of the bundle that was searched
        bundle: String,
    },

    /// The bundle's packed directory data is malformed
    #[error("Packed bundle directory is corrupt: {reason}")]
    PackCorrupt {
        /// What was wrong with the data
        reason: String,
    },

    /// A request arrived while the manager is locked for teardown
    #[error("Request rejected: resource manager is locked")]
    Locked,

    /// The request was cancelled before it completed
    #[error("Request aborted")]
    UserAborted,
}

impl Error {
    /// Create a corrupt-pack error
    pub fn pack_corrupt(reason: impl Into<String>) -> Self {
        Self::PackCorrupt {
            reason: reason.into(),
        }
    }
}

/// Result type for asset operations
pub type Result<T> = std::result::Result<T, Error>;

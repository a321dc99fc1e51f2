//! Asset resolution over versioned bundle packages
//!
//! The request-facing layer of the bale bundle delivery engine. A
//! [`Package`] composes one manifest graph, one cache store, and one
//! download scheduler; callers ask it for assets by logical location and
//! get back reference-counted [`Handle`]s. Under the hood every distinct
//! (request kind, asset) pair resolves through exactly one provider, and
//! every bundle loads through exactly one in-memory loader, no matter
//! how many concurrent requests need them.
//!
//! Everything is driven by [`Package::update`] on the caller's polling
//! cadence; byte transfers and file reads run on spawned tokio tasks
//! underneath.

mod error;
mod handle;
mod loader;
mod manager;
mod pack;
mod package;
mod provider;
mod services;

pub use error::{Error, Result};
pub use handle::{AssetResult, Handle, ProviderKey, RequestKind};
pub use loader::{BundleLoader, BundlePayload};
pub use manager::{DownloadStatus, ResourceManager};
pub use pack::{write_pack, PackDirectory, PackEntry, PACK_SIGNATURE, PACK_VERSION};
pub use package::{Package, PackageBuilder};
pub use services::{RemoteEndpoints, RemoteServices};

//! Resumable, deduplicated bundle downloading
//!
//! The [`DownloadScheduler`] turns "this bundle must be present in the
//! cache" into at most one transfer per bundle content hash, shared by
//! every concurrent requester through a reference count. Transfers stage
//! into private temp files, resume large files with byte-range requests,
//! abort themselves when byte progress stalls, and commit verified files
//! through [`bale_cache::CacheStore::write`].
//!
//! Nothing here retries: a failed task stays failed until the layer that
//! owns user-visible intent asks again.

mod client;
mod config;
mod error;
mod scheduler;
mod source;
mod task;

pub use client::{FetchClient, FetchClientBuilder, HeadInfo};
pub use config::{
    FetchConfig, DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_STARTS_PER_TICK,
    DEFAULT_RESUME_INVALIDATING_CODES, DEFAULT_RESUME_MIN_SIZE, DEFAULT_WATCHDOG_INTERVAL,
};
pub use error::{Error, Result};
pub use scheduler::DownloadScheduler;
pub use source::{CopyLocalFileService, DownloadSource};
pub use task::DownloadTask;

//! Content-addressed on-disk bundle cache
//!
//! A [`CacheStore`] holds verified bundle files under a sharded directory
//! layout, staged through private temp files so a crash mid-write can never
//! produce a cache entry that lies about its contents. Presence in the
//! in-memory record table is the engine's definition of "cached locally".
//!
//! Decryption of encrypted bundles is delegated to an injected
//! [`DecryptionService`]; this crate contains no cipher logic.

mod config;
mod decrypt;
mod error;
mod record;
mod store;
mod verify;

pub use config::{CacheConfig, DEFAULT_VERIFY_CONCURRENCY};
pub use decrypt::DecryptionService;
pub use error::{Error, Result};
pub use record::CacheRecord;
pub use store::{CacheStore, DATA_FILE_NAME, INFO_FILE_NAME};
pub use verify::{crc32_of_file, verify_file, VerifyLevel, VerifyOutcome};

//! Cache store configuration

use crate::VerifyLevel;

/// Default bound on concurrent file verifications during the startup scan.
pub const DEFAULT_VERIFY_CONCURRENCY: usize = 32;

/// Runtime configuration for a [`crate::CacheStore`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Verification level applied when re-admitting entries during the
    /// startup scan
    pub verify_level: VerifyLevel,
    /// Maximum concurrent file verifications during the startup scan
    pub verify_concurrency: usize,
    /// Whether cached data files keep the bundle's file extension
    pub append_file_extension: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            verify_level: VerifyLevel::Medium,
            verify_concurrency: DEFAULT_VERIFY_CONCURRENCY,
            append_file_extension: false,
        }
    }
}

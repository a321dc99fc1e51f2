//! Error types for cache store operations

use thiserror::Error;

/// Error types for cache operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error while reading or writing cache files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A cached or freshly downloaded file failed verification
    #[error("Cache verification failed for {guid}: {outcome:?}")]
    VerificationFailed {
        /// Content hash of the bundle
        guid: String,
        /// Which check failed
        outcome: crate::VerifyOutcome,
    },

    /// A cache record already exists for the bundle
    #[error("Cache record already exists for {guid}")]
    RecordExists {
        /// Content hash of the bundle
        guid: String,
    },

    /// The bundle has no cache record
    #[error("Bundle is not cached: {guid}")]
    NotCached {
        /// Content hash of the bundle
        guid: String,
    },

    /// The bundle's info file is malformed
    #[error("Cache info file is corrupt: {path}")]
    InfoFileCorrupt {
        /// Path of the offending info file
        path: String,
    },

    /// The injected decryption service failed
    #[error("Decryption failed for {guid}: {reason}")]
    DecryptFailed {
        /// Content hash of the bundle
        guid: String,
        /// Failure description from the service
        reason: String,
    },

    /// A bundle is marked encrypted but no decryption service was injected
    #[error("Bundle {guid} is encrypted but no decryption service is configured")]
    NoDecryptionService {
        /// Content hash of the bundle
        guid: String,
    },
}

impl Error {
    /// Create a decryption failure error
    pub fn decrypt_failed(guid: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DecryptFailed {
            guid: guid.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;

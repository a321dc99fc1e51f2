//! Error types for download tasks and the scheduler

use thiserror::Error;

/// Error types for fetch operations
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP transport error from the underlying client
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The URL could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The server answered with a non-success status
    #[error("Network error {status} fetching {url}")]
    Network {
        /// HTTP status code returned by the server
        status: u16,
        /// The requested URL
        url: String,
    },

    /// The downloaded file failed checksum or size verification
    #[error("Downloaded file failed verification for {guid}: {outcome:?}")]
    Verification {
        /// Content hash of the bundle
        guid: String,
        /// Which check failed
        outcome: bale_cache::VerifyOutcome,
    },

    /// The task made no byte progress within the watchdog interval
    #[error("Download stalled: no progress for {seconds} seconds")]
    WatchdogAborted {
        /// The configured watchdog interval in seconds
        seconds: u64,
    },

    /// The task was cancelled by its owner
    #[error("Download aborted by caller")]
    UserAborted,

    /// Cache store failure while committing the downloaded file
    #[error("Cache error: {0}")]
    Cache(#[from] bale_cache::Error),

    /// IO error while staging the file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for fetch operations
pub type Result<T> = std::result::Result<T, Error>;

//! Download scheduler configuration

use std::time::Duration;

/// Default bound on concurrently transferring tasks.
pub const DEFAULT_MAX_CONCURRENT: usize = 10;

/// Default bound on tasks newly started per scheduler tick.
pub const DEFAULT_MAX_STARTS_PER_TICK: usize = 5;

/// Default stall watchdog interval.
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(30);

/// Default minimum declared file size before a download uses resume mode.
pub const DEFAULT_RESUME_MIN_SIZE: u64 = 100 * 1024 * 1024;

/// Default set of response codes that invalidate a resumed partial file.
///
/// Some servers answer a range request for these cases with a full-content
/// error body; appending those bytes would corrupt the partial file, so it
/// is deleted before any retry.
pub const DEFAULT_RESUME_INVALIDATING_CODES: &[u16] = &[400, 404, 416];

/// Runtime configuration for a [`crate::DownloadScheduler`].
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Maximum number of tasks transferring at the same time
    pub max_concurrent: usize,
    /// Maximum number of queued tasks started per tick
    pub max_starts_per_tick: usize,
    /// A task that makes no byte progress for this long aborts itself
    pub watchdog_interval: Duration,
    /// Bundles at least this large download in resume mode
    pub resume_min_size: u64,
    /// Response codes that delete the partial temp file in resume mode
    pub resume_invalidating_codes: Vec<u16>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_starts_per_tick: DEFAULT_MAX_STARTS_PER_TICK,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
            resume_min_size: DEFAULT_RESUME_MIN_SIZE,
            resume_invalidating_codes: DEFAULT_RESUME_INVALIDATING_CODES.to_vec(),
        }
    }
}

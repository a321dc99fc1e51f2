//! Injected collaborators for locating bundle bytes

use std::path::PathBuf;

use bale_fetch::DownloadSource;
use bale_manifest::BundleDescriptor;

/// Resolves where a bundle's bytes live.
///
/// The engine asks for the main URL on a bundle's first fetch and the
/// fallback URL on explicit retries after a failure. A `Some` from
/// [`RemoteServices::local_source`] short-circuits the network entirely
/// and imports the file from disk.
pub trait RemoteServices: Send + Sync {
    /// Primary download URL for a bundle's remote file name.
    fn remote_url(&self, file_name: &str) -> String;

    /// Fallback download URL, used when a previous fetch of the same
    /// bundle failed. Defaults to the primary URL.
    fn fallback_url(&self, file_name: &str) -> String {
        self.remote_url(file_name)
    }

    /// Local file to import instead of downloading, if one exists.
    fn local_source(&self, _bundle: &BundleDescriptor) -> Option<PathBuf> {
        None
    }
}

/// Plain main/fallback endpoint pair.
#[derive(Debug, Clone)]
pub struct RemoteEndpoints {
    /// Base URL joined with each bundle's remote file name
    pub base_url: String,
    /// Base URL used for explicit retries, when different
    pub fallback_base_url: Option<String>,
}

impl RemoteEndpoints {
    /// Endpoints with only a primary base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            fallback_base_url: None,
        }
    }

    /// Set a distinct fallback base URL.
    #[must_use]
    pub fn with_fallback(mut self, fallback_base_url: impl Into<String>) -> Self {
        self.fallback_base_url = Some(fallback_base_url.into());
        self
    }
}

impl RemoteServices for RemoteEndpoints {
    fn remote_url(&self, file_name: &str) -> String {
        format!("{}/{file_name}", self.base_url.trim_end_matches('/'))
    }

    fn fallback_url(&self, file_name: &str) -> String {
        match &self.fallback_base_url {
            Some(base) => format!("{}/{file_name}", base.trim_end_matches('/')),
            None => self.remote_url(file_name),
        }
    }
}

/// Pick the download source for one fetch attempt of a bundle.
pub(crate) fn source_for_attempt(
    services: &dyn RemoteServices,
    bundle: &BundleDescriptor,
    attempt: u32,
) -> DownloadSource {
    if let Some(path) = services.local_source(bundle) {
        return DownloadSource::Local { path };
    }
    let url = if attempt == 0 {
        services.remote_url(&bundle.remote_file_name)
    } else {
        services.fallback_url(&bundle.remote_file_name)
    };
    DownloadSource::Remote { url }
}

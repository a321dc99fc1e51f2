//! Where a bundle's bytes come from

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::Result;

/// The source a download task pulls a bundle from.
#[derive(Debug, Clone)]
pub enum DownloadSource {
    /// Fetch from a remote server over HTTP
    Remote {
        /// Full URL of the bundle file
        url: String,
    },
    /// Import from a file already on the local machine, skipping the
    /// network entirely
    Local {
        /// Path of the source file
        path: PathBuf,
    },
}

/// Injected collaborator for copying local bundle files into the staging
/// area. When absent, a plain filesystem copy is used.
#[async_trait]
pub trait CopyLocalFileService: Send + Sync {
    /// Copy `source` to `dest`, replacing any existing file.
    async fn copy_file(&self, source: &Path, dest: &Path) -> Result<()>;
}

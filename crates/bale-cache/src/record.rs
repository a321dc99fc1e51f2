//! Cache records and the on-disk info file
//!
//! The info file sits next to each cached data file and holds the two
//! values needed to re-admit the entry on a later run: the declared CRC32
//! and the declared size, written as two little-endian primitives.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Exact size of an info file on disk: `u32` checksum + `u64` size.
pub(crate) const INFO_FILE_LEN: u64 = 12;

/// Per-bundle cache metadata. A record in the store's table is a promise
/// that the data file exists on disk and passed verification.
#[derive(Debug, Clone)]
pub struct CacheRecord {
    /// Absolute path of the cached data file
    pub data_file_path: PathBuf,
    /// Absolute path of the sibling info file
    pub info_file_path: PathBuf,
    /// Declared CRC32 of the data file
    pub file_checksum: u32,
    /// Declared size of the data file in bytes
    pub file_size: u64,
}

/// Write an info file for a cached bundle.
pub(crate) async fn write_info_file(path: &Path, checksum: u32, size: u64) -> Result<()> {
    let mut data = Vec::with_capacity(INFO_FILE_LEN as usize);
    data.extend_from_slice(&checksum.to_le_bytes());
    data.extend_from_slice(&size.to_le_bytes());
    tokio::fs::write(path, data).await?;
    Ok(())
}

/// Read an info file back into its `(checksum, size)` pair.
pub(crate) async fn read_info_file(path: &Path) -> Result<(u32, u64)> {
    let data = tokio::fs::read(path).await?;
    if data.len() != INFO_FILE_LEN as usize {
        return Err(Error::InfoFileCorrupt {
            path: path.display().to_string(),
        });
    }
    let checksum = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let size = u64::from_le_bytes([
        data[4], data[5], data[6], data[7], data[8], data[9], data[10], data[11],
    ]);
    Ok((checksum, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn info_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("__info");
        write_info_file(&path, 0xdead_beef, 1_234_567).await.unwrap();
        let (checksum, size) = read_info_file(&path).await.unwrap();
        assert_eq!(checksum, 0xdead_beef);
        assert_eq!(size, 1_234_567);
    }

    #[tokio::test]
    async fn short_info_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("__info");
        tokio::fs::write(&path, [1, 2, 3]).await.unwrap();
        assert!(matches!(
            read_info_file(&path).await,
            Err(Error::InfoFileCorrupt { .. })
        ));
    }
}

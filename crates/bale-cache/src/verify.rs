//! Cache file verification

use std::io::ErrorKind;
use std::path::Path;

use tokio::io::AsyncReadExt as _;

/// How thoroughly a cached file is checked.
///
/// Bulk verification of a large cache defaults to a cheap level; the
/// strict level is reserved for individual bundles right after download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyLevel {
    /// Check only that the data file exists
    Low,
    /// Check existence and file size
    #[default]
    Medium,
    /// Check existence, file size, and recompute the checksum
    High,
}

/// Outcome of verifying one cached file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The file passed every check at the requested level
    Ok,
    /// The data file does not exist
    CacheMissing,
    /// The file size does not match the declared size
    SizeMismatch {
        /// Declared size in bytes
        expected: u64,
        /// Size found on disk
        actual: u64,
    },
    /// The recomputed checksum does not match the declared checksum
    ChecksumMismatch {
        /// Declared CRC32
        expected: u32,
        /// CRC32 computed from the file
        actual: u32,
    },
}

impl VerifyOutcome {
    /// Whether the file passed verification.
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Verify a file against its declared size and checksum at the given
/// level.
pub async fn verify_file(
    path: &Path,
    expected_size: u64,
    expected_checksum: u32,
    level: VerifyLevel,
) -> std::io::Result<VerifyOutcome> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(VerifyOutcome::CacheMissing),
        Err(e) => return Err(e),
    };

    if level == VerifyLevel::Low {
        return Ok(VerifyOutcome::Ok);
    }

    let actual_size = metadata.len();
    if actual_size != expected_size {
        return Ok(VerifyOutcome::SizeMismatch {
            expected: expected_size,
            actual: actual_size,
        });
    }

    if level == VerifyLevel::Medium {
        return Ok(VerifyOutcome::Ok);
    }

    let actual_checksum = crc32_of_file(path).await?;
    if actual_checksum != expected_checksum {
        return Ok(VerifyOutcome::ChecksumMismatch {
            expected: expected_checksum,
            actual: actual_checksum,
        });
    }

    Ok(VerifyOutcome::Ok)
}

/// Streaming CRC32 of a file's contents.
pub async fn crc32_of_file(path: &Path) -> std::io::Result<u32> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut crc = flate2::Crc::new();
    let mut buf = vec![0u8; 64 << 10];
    loop {
        let len = file.read(&mut buf).await?;
        if len == 0 {
            break;
        }
        crc.update(&buf[..len]);
    }
    Ok(crc.sum())
}

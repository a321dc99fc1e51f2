//! Manifest data hashing and verification helpers

use crate::{Error, Result};

/// Hex-encoded md5 of the given bytes, the format used for bundle content
/// hashes and package hash files.
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(md5::compute(data).0)
}

/// CRC32 checksum of the given bytes.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(data);
    crc.sum()
}

/// Hex-encoded CRC32 of the given bytes.
pub fn crc32_hex(data: &[u8]) -> String {
    format!("{:08x}", crc32(data))
}

/// Verify manifest bytes against a recorded hash string.
///
/// Both recording schemes are supported: a 32-character value is an md5
/// hex digest, anything else is a CRC32 hex value.
pub fn verify_manifest_data(data: &[u8], recorded_hash: &str) -> Result<()> {
    if data.is_empty() {
        return Err(Error::corrupt("manifest buffer is empty"));
    }
    if recorded_hash.is_empty() {
        return Err(Error::corrupt("recorded manifest hash is empty"));
    }

    let actual = if recorded_hash.len() == 32 {
        md5_hex(data)
    } else {
        crc32_hex(data)
    };

    if actual.eq_ignore_ascii_case(recorded_hash) {
        Ok(())
    } else {
        Err(Error::HashMismatch {
            expected: recorded_hash.to_string(),
            actual,
        })
    }
}

//! Delegated bundle decryption
//!
//! The cache never implements cipher logic. When a bundle is marked
//! encrypted, reads route through an injected service that receives the
//! cached file path and the expected checksum and returns plain bytes.

use std::path::Path;

use async_trait::async_trait;

use crate::Result;

/// Injected decryption collaborator for encrypted bundles.
#[async_trait]
pub trait DecryptionService: Send + Sync {
    /// Decrypt the file at `path` and return the plain bundle bytes.
    ///
    /// `expected_checksum` is the CRC32 recorded for the encrypted file,
    /// available to implementations that bind their keys to it.
    async fn decrypt_file(&self, path: &Path, expected_checksum: u32) -> Result<Vec<u8>>;
}

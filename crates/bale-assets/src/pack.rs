//! Packed-bundle directory format
//!
//! A bundle's payload starts with a directory of the items packed inside
//! it, followed by the item bytes inline:
//!
//! ```text
//! [u32 signature][u16 version][u32 item count]
//! per item: [utf8 path][u32 byte length][bytes]
//! ```
//!
//! This crate only consumes the format; the build pipeline that produces
//! packed bundles is a separate system.

use std::collections::HashMap;
use std::io::Cursor;

use bale_manifest::{ReadWire as _, WriteWire as _};

use crate::{Error, Result};

/// Fixed signature at the start of every packed bundle.
pub const PACK_SIGNATURE: u32 = 0x4B41_5042;

/// Current packed-bundle format version.
pub const PACK_VERSION: u16 = 1;

/// One packed item: its path and where its bytes sit in the payload.
#[derive(Debug, Clone)]
pub struct PackEntry {
    /// Item path, unique within the bundle
    pub path: String,
    /// Byte offset of the item within the bundle payload
    pub offset: usize,
    /// Byte length of the item
    pub len: usize,
}

/// Parsed directory of one packed bundle.
#[derive(Debug)]
pub struct PackDirectory {
    entries: Vec<PackEntry>,
    index: HashMap<String, usize>,
}

impl PackDirectory {
    /// Parse the directory out of a bundle payload.
    ///
    /// Defensive like the manifest reader: truncation, a bad signature,
    /// an unknown version, or item lengths pointing past the payload all
    /// fail with a structured error.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let signature = wire(cursor.read_u32le(), "pack signature")?;
        if signature != PACK_SIGNATURE {
            return Err(Error::pack_corrupt(format!(
                "bad signature: {signature:#010x}"
            )));
        }
        let version = wire(cursor.read_u16le(), "pack version")?;
        if version != PACK_VERSION {
            return Err(Error::pack_corrupt(format!(
                "unsupported pack version: {version}"
            )));
        }

        let count = wire(cursor.read_u32le(), "item count")? as usize;
        let mut entries = Vec::new();
        let mut index = HashMap::new();
        for _ in 0..count {
            let path = wire(cursor.read_utf8(), "item path")?;
            let len = wire(cursor.read_u32le(), "item length")? as usize;
            let offset = cursor.position() as usize;
            if offset + len > data.len() {
                return Err(Error::pack_corrupt(format!(
                    "item '{path}' ({len} bytes at {offset}) exceeds payload of {} bytes",
                    data.len()
                )));
            }
            cursor.set_position((offset + len) as u64);

            if index.insert(path.clone(), entries.len()).is_some() {
                return Err(Error::pack_corrupt(format!("duplicate item path: {path}")));
            }
            entries.push(PackEntry { path, offset, len });
        }

        Ok(Self { entries, index })
    }

    /// Number of items packed in the bundle.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bundle packs no items.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All packed entries, in pack order.
    pub fn entries(&self) -> &[PackEntry] {
        &self.entries
    }

    /// Slice one item's bytes out of the bundle payload this directory
    /// was parsed from.
    pub fn read<'a>(&self, payload: &'a [u8], path: &str) -> Option<&'a [u8]> {
        let entry = &self.entries[*self.index.get(path)?];
        payload.get(entry.offset..entry.offset + entry.len)
    }
}

/// Serialize a packed bundle from items. Exists for fixtures and tests.
pub fn write_pack(items: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    wire(out.write_u32le(PACK_SIGNATURE), "pack signature")?;
    wire(out.write_u16le(PACK_VERSION), "pack version")?;
    let count = u32::try_from(items.len())
        .map_err(|_| Error::pack_corrupt(format!("too many items: {}", items.len())))?;
    wire(out.write_u32le(count), "item count")?;
    for (path, bytes) in items {
        wire(out.write_utf8(path), "item path")?;
        let len = u32::try_from(bytes.len())
            .map_err(|_| Error::pack_corrupt(format!("item too large: {path}")))?;
        wire(out.write_u32le(len), "item length")?;
        out.extend_from_slice(bytes);
    }
    Ok(out)
}

fn wire<T>(result: std::io::Result<T>, what: &str) -> Result<T> {
    result.map_err(|e| Error::pack_corrupt(format!("failed to read {what}: {e}")))
}

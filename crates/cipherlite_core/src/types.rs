//! Core type definitions for CipherLite.

use std::fmt;

/// Row identifier of a table entry (the `rowid` / `docid` column).
pub type RowId = i64;

/// Identifier of a connection, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// Encodes a row id as an order-preserving 8-byte B-tree key.
#[must_use]
pub fn rowid_key(rowid: RowId) -> [u8; 8] {
    ((rowid as u64) ^ (1 << 63)).to_be_bytes()
}

/// Decodes a key produced by [`rowid_key`].
#[must_use]
pub fn rowid_from_key(key: &[u8]) -> Option<RowId> {
    let bytes: [u8; 8] = key.try_into().ok()?;
    Some((u64::from_be_bytes(bytes) ^ (1 << 63)) as i64)
}

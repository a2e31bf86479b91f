//! Node encoding.
//!
//! Nodes are decoded and re-encoded as whole pages.
//!
//! ```text
//! leaf     := 0x01 | count u16 | leaf_cell*
//! interior := 0x02 | count u16 | child0 u32 | (key_len u16 | key | child u32)*
//!
//! leaf_cell := key_len u16 | key | 0x00 | len u16 | value
//!            | key_len u16 | key | 0x01 | total_len u32 | first_overflow u32
//! ```
//!
//! An interior node with `n` keys has `n + 1` children. Every key in
//! `children[i]` is `< keys[i]`, every key in `children[i + 1]` is `>= keys[i]`.

use crate::error::{DbError, DbResult};
use crate::pager::USABLE_SIZE;

const LEAF: u8 = 1;
const INTERIOR: u8 = 2;
const HEADER_LEN: usize = 3;

/// Longest key a tree accepts.
pub const MAX_KEY_LEN: usize = 512;
/// Values longer than this spill to overflow pages.
pub const MAX_INLINE_VALUE: usize = USABLE_SIZE / 4;
/// Nodes encoded smaller than this try to merge with a sibling.
pub const MIN_FILL: usize = USABLE_SIZE / 4;

/// Value stored in a leaf cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValue {
    /// Value stored in the cell.
    Inline(Vec<u8>),
    /// Value stored on an overflow chain.
    Overflow {
        /// Total value length.
        len: u32,
        /// First page of the chain.
        first: u32,
    },
}

/// Key/value entry of a leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafCell {
    /// Entry key.
    pub key: Vec<u8>,
    /// Entry value.
    pub value: CellValue,
}

impl LeafCell {
    fn encoded_len(&self) -> usize {
        2 + self.key.len()
            + 1
            + match &self.value {
                CellValue::Inline(v) => 2 + v.len(),
                CellValue::Overflow { .. } => 8,
            }
    }
}

/// Decoded tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Leaf holding entries in key order.
    Leaf {
        /// Entries in key order.
        cells: Vec<LeafCell>,
    },
    /// Interior node routing to children.
    Interior {
        /// Separator keys.
        keys: Vec<Vec<u8>>,
        /// Child pages; one more than `keys`.
        children: Vec<u32>,
    },
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn bytes(&mut self, len: usize) -> DbResult<&'a [u8]> {
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(DbError::malformed("b-tree cell runs past end of page"));
        }
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> DbResult<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> DbResult<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> DbResult<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

impl Node {
    /// An empty leaf.
    #[must_use]
    pub fn empty_leaf() -> Self {
        Self::Leaf { cells: Vec::new() }
    }

    /// Decodes a page.
    pub fn decode(page: &[u8]) -> DbResult<Self> {
        let mut r = Reader { data: page, pos: 0 };
        let kind = r.u8()?;
        let count = r.u16()? as usize;
        match kind {
            LEAF => {
                let mut cells = Vec::with_capacity(count);
                for _ in 0..count {
                    let key_len = r.u16()? as usize;
                    let key = r.bytes(key_len)?.to_vec();
                    let value = match r.u8()? {
                        0 => {
                            let len = r.u16()? as usize;
                            CellValue::Inline(r.bytes(len)?.to_vec())
                        }
                        1 => CellValue::Overflow {
                            len: r.u32()?,
                            first: r.u32()?,
                        },
                        other => {
                            return Err(DbError::malformed(format!("bad cell value kind {other}")))
                        }
                    };
                    cells.push(LeafCell { key, value });
                }
                Ok(Self::Leaf { cells })
            }
            INTERIOR => {
                let mut keys = Vec::with_capacity(count);
                let mut children = Vec::with_capacity(count + 1);
                children.push(r.u32()?);
                for _ in 0..count {
                    let key_len = r.u16()? as usize;
                    keys.push(r.bytes(key_len)?.to_vec());
                    children.push(r.u32()?);
                }
                Ok(Self::Interior { keys, children })
            }
            other => Err(DbError::malformed(format!("bad b-tree node type {other}"))),
        }
    }

    /// Size of the encoded node.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Leaf { cells } => HEADER_LEN + cells.iter().map(LeafCell::encoded_len).sum::<usize>(),
            Self::Interior { keys, .. } => {
                HEADER_LEN + 4 + keys.iter().map(|k| 2 + k.len() + 4).sum::<usize>()
            }
        }
    }

    /// Returns true if the node fits on one page.
    #[must_use]
    pub fn fits(&self) -> bool {
        self.encoded_len() <= USABLE_SIZE
    }

    /// Encodes into a page buffer of `USABLE_SIZE` bytes.
    pub fn encode_into(&self, page: &mut [u8]) -> DbResult<()> {
        if !self.fits() || page.len() < USABLE_SIZE {
            return Err(DbError::runtime("b-tree node does not fit on a page"));
        }
        let mut buf = Vec::with_capacity(self.encoded_len());
        match self {
            Self::Leaf { cells } => {
                buf.push(LEAF);
                buf.extend_from_slice(&(cells.len() as u16).to_be_bytes());
                for cell in cells {
                    buf.extend_from_slice(&(cell.key.len() as u16).to_be_bytes());
                    buf.extend_from_slice(&cell.key);
                    match &cell.value {
                        CellValue::Inline(v) => {
                            buf.push(0);
                            buf.extend_from_slice(&(v.len() as u16).to_be_bytes());
                            buf.extend_from_slice(v);
                        }
                        CellValue::Overflow { len, first } => {
                            buf.push(1);
                            buf.extend_from_slice(&len.to_be_bytes());
                            buf.extend_from_slice(&first.to_be_bytes());
                        }
                    }
                }
            }
            Self::Interior { keys, children } => {
                buf.push(INTERIOR);
                buf.extend_from_slice(&(keys.len() as u16).to_be_bytes());
                buf.extend_from_slice(&children[0].to_be_bytes());
                for (key, child) in keys.iter().zip(&children[1..]) {
                    buf.extend_from_slice(&(key.len() as u16).to_be_bytes());
                    buf.extend_from_slice(key);
                    buf.extend_from_slice(&child.to_be_bytes());
                }
            }
        }
        page[..buf.len()].copy_from_slice(&buf);
        page[buf.len()..].fill(0);
        Ok(())
    }

    /// Splits an overfull node into two, returning the right half and the
    /// separator key that routes to it.
    pub fn split(&mut self) -> (Vec<u8>, Node) {
        match self {
            Self::Leaf { cells } => {
                let at = split_point(cells.iter().map(LeafCell::encoded_len), cells.len());
                let right = cells.split_off(at);
                let separator = right[0].key.clone();
                (separator, Self::Leaf { cells: right })
            }
            Self::Interior { keys, children } => {
                let at = split_point(keys.iter().map(|k| 2 + k.len() + 4), keys.len());
                // keys[at] moves up; it routes between the halves.
                let mut right_keys = keys.split_off(at);
                let separator = right_keys.remove(0);
                let right_children = children.split_off(at + 1);
                (
                    separator,
                    Self::Interior {
                        keys: right_keys,
                        children: right_children,
                    },
                )
            }
        }
    }
}

/// Index that divides items into two halves of roughly equal encoded size,
/// leaving at least one item on each side.
fn split_point(sizes: impl Iterator<Item = usize>, count: usize) -> usize {
    let sizes: Vec<usize> = sizes.collect();
    let total: usize = sizes.iter().sum();
    let mut acc = 0;
    for (i, size) in sizes.iter().enumerate() {
        if acc + size > total / 2 && i > 0 {
            return i.min(count - 1);
        }
        acc += size;
    }
    count / 2
}

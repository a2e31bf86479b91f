//! Overflow page chains for large values.
//!
//! ```text
//! overflow page := next u32 (0 = last) | data
//! ```

use crate::error::{DbError, DbResult};
use crate::pager::{PageRead, PageWrite, USABLE_SIZE};

const DATA_PER_PAGE: usize = USABLE_SIZE - 4;

/// Writes `value` to a new chain and returns its first page.
pub fn write_chain<W: PageWrite + ?Sized>(tx: &mut W, value: &[u8]) -> DbResult<u32> {
    let chunks: Vec<&[u8]> = value.chunks(DATA_PER_PAGE).collect();
    let mut pages = Vec::with_capacity(chunks.len());
    for _ in &chunks {
        pages.push(tx.allocate()?);
    }
    for (i, chunk) in chunks.iter().enumerate() {
        let next = pages.get(i + 1).copied().unwrap_or(0);
        let page = tx.page_mut(pages[i])?;
        page[..4].copy_from_slice(&next.to_be_bytes());
        page[4..4 + chunk.len()].copy_from_slice(chunk);
    }
    pages
        .first()
        .copied()
        .ok_or_else(|| DbError::runtime("empty overflow value"))
}

/// Reads `len` bytes from the chain starting at `first`.
pub fn read_chain<P: PageRead + ?Sized>(view: &P, first: u32, len: usize) -> DbResult<Vec<u8>> {
    let mut value = Vec::with_capacity(len);
    let mut page = first;
    while value.len() < len {
        if page == 0 {
            return Err(DbError::malformed("overflow chain ends early"));
        }
        let content = view.page(page)?;
        let take = (len - value.len()).min(DATA_PER_PAGE);
        value.extend_from_slice(&content[4..4 + take]);
        page = u32::from_be_bytes([content[0], content[1], content[2], content[3]]);
    }
    Ok(value)
}

/// Pages of the chain starting at `first`, in order.
pub fn chain_pages<P: PageRead + ?Sized>(view: &P, first: u32, len: usize) -> DbResult<Vec<u32>> {
    let mut pages = Vec::new();
    let mut page = first;
    let mut remaining = len;
    while remaining > 0 {
        if page == 0 {
            return Err(DbError::malformed("overflow chain ends early"));
        }
        pages.push(page);
        let content = view.page(page)?;
        remaining = remaining.saturating_sub(DATA_PER_PAGE);
        page = u32::from_be_bytes([content[0], content[1], content[2], content[3]]);
    }
    Ok(pages)
}

/// Frees every page of the chain starting at `first`.
pub fn free_chain<W: PageWrite + ?Sized>(tx: &mut W, first: u32, len: usize) -> DbResult<()> {
    let mut page = first;
    let mut remaining = len;
    while remaining > 0 && page != 0 {
        let content = tx.page(page)?;
        let next = u32::from_be_bytes([content[0], content[1], content[2], content[3]]);
        tx.free(page)?;
        remaining = remaining.saturating_sub(DATA_PER_PAGE);
        page = next;
    }
    Ok(())
}

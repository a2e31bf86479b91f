//! Transaction-scoped views over the page store.

use super::cache::PageRef;
use super::format::{Header, USABLE_SIZE};
use super::Pager;
use crate::error::{DbError, DbResult};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Read access to pages as of some snapshot.
pub trait PageRead {
    /// Returns the content of a data page.
    fn page(&self, page: u32) -> DbResult<PageRef>;

    /// Returns the header as of the snapshot.
    fn header(&self) -> &Header;
}

/// Write access for the single writer.
pub trait PageWrite: PageRead {
    /// Returns a mutable copy of a page, marking it dirty.
    fn page_mut(&mut self, page: u32) -> DbResult<&mut Vec<u8>>;

    /// Takes a page off the free list or extends the file. The page is zeroed.
    fn allocate(&mut self) -> DbResult<u32>;

    /// Returns a page to the free list.
    fn free(&mut self, page: u32) -> DbResult<()>;

    /// Returns the working header.
    fn header_mut(&mut self) -> &mut Header;
}

/// Consistent read snapshot.
///
/// In WAL mode the snapshot covers the frames committed when it was taken;
/// later commits stay invisible. In rollback mode the lock manager keeps
/// writers out for the snapshot's lifetime.
pub struct ReadView {
    pager: Arc<Pager>,
    header: Header,
    max_frame: u64,
}

impl ReadView {
    pub(crate) fn new(pager: Arc<Pager>, header: Header, max_frame: u64) -> Self {
        Self {
            pager,
            header,
            max_frame,
        }
    }
}

impl PageRead for ReadView {
    fn page(&self, page: u32) -> DbResult<PageRef> {
        if page == 0 || page >= self.header.page_count {
            return Err(DbError::malformed(format!(
                "page {page} out of range (page count {})",
                self.header.page_count
            )));
        }
        self.pager.read_committed(page, self.max_frame)
    }

    fn header(&self) -> &Header {
        &self.header
    }
}

/// Copy of a write transaction's state, for statement-level undo.
#[derive(Clone)]
pub struct Savepoint {
    header: Header,
    dirty: BTreeMap<u32, PageRef>,
}

/// Pending changes of the single writer.
///
/// Changed pages live in memory until commit. Page content is shared with
/// the snapshot until first modified, so savepoints are cheap to take.
pub struct WriteTxn {
    base: ReadView,
    header: Header,
    dirty: BTreeMap<u32, PageRef>,
}

impl WriteTxn {
    pub(crate) fn new(base: ReadView) -> Self {
        Self {
            header: base.header,
            base,
            dirty: BTreeMap::new(),
        }
    }

    /// Captures the current state.
    #[must_use]
    pub fn savepoint(&self) -> Savepoint {
        Savepoint {
            header: self.header,
            dirty: self.dirty.clone(),
        }
    }

    /// Discards everything done since `savepoint`.
    pub fn restore(&mut self, savepoint: Savepoint) {
        self.header = savepoint.header;
        self.dirty = savepoint.dirty;
    }

    /// Returns true if the transaction changed anything.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty() || self.header != self.base.header
    }

    pub(crate) fn into_parts(self) -> (ReadView, Header, BTreeMap<u32, PageRef>) {
        (self.base, self.header, self.dirty)
    }
}

impl PageRead for WriteTxn {
    fn page(&self, page: u32) -> DbResult<PageRef> {
        if let Some(content) = self.dirty.get(&page) {
            return Ok(Arc::clone(content));
        }
        if page == 0 || page >= self.header.page_count {
            return Err(DbError::malformed(format!(
                "page {page} out of range (page count {})",
                self.header.page_count
            )));
        }
        self.base.page(page)
    }

    fn header(&self) -> &Header {
        &self.header
    }
}

impl PageWrite for WriteTxn {
    fn page_mut(&mut self, page: u32) -> DbResult<&mut Vec<u8>> {
        if !self.dirty.contains_key(&page) {
            let content = self.page(page)?;
            self.dirty.insert(page, content);
        }
        let entry = self
            .dirty
            .get_mut(&page)
            .ok_or_else(|| DbError::malformed(format!("page {page} vanished from write set")))?;
        Ok(Arc::make_mut(entry))
    }

    fn allocate(&mut self) -> DbResult<u32> {
        let head = self.header.freelist_head;
        let page = if head != 0 {
            let content = self.page(head)?;
            self.header.freelist_head =
                u32::from_be_bytes([content[0], content[1], content[2], content[3]]);
            self.header.freelist_count = self.header.freelist_count.saturating_sub(1);
            head
        } else {
            let page = self.header.page_count;
            self.header.page_count = page
                .checked_add(1)
                .ok_or_else(|| DbError::runtime("database is full"))?;
            page
        };
        self.dirty.insert(page, Arc::new(vec![0u8; USABLE_SIZE]));
        Ok(page)
    }

    fn free(&mut self, page: u32) -> DbResult<()> {
        if page == 0 || page >= self.header.page_count {
            return Err(DbError::malformed(format!("cannot free page {page}")));
        }
        let mut content = vec![0u8; USABLE_SIZE];
        content[..4].copy_from_slice(&self.header.freelist_head.to_be_bytes());
        self.dirty.insert(page, Arc::new(content));
        self.header.freelist_head = page;
        self.header.freelist_count += 1;
        Ok(())
    }

    fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }
}

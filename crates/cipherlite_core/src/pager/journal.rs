//! Rollback journal.
//!
//! Before a rollback-mode commit touches the database file, the original
//! images of every page it will overwrite are written to `<db>-journal` and
//! synced. If the process dies mid-commit, the next open finds the journal
//! ("hot") and copies the images back.
//!
//! ```text
//! header := magic (8) | page_count (4) | record_count (4) | crc32 (4)
//! record := page_no (4) | crc32(page_no | image) (4) | image (PAGE_SIZE)
//! ```
//!
//! A journal whose header or any record fails its checksum was never fully
//! written, which means the database file was never touched; it is discarded.

use super::format::PAGE_SIZE;
use crate::checksum::{crc32, Crc32};
use crate::error::DbResult;
use cipherlite_storage::StorageBackend;
use tracing::{debug, warn};

const JOURNAL_MAGIC: &[u8; 8] = b"CLJRNL01";
const HEADER_LEN: usize = 20;
const RECORD_HEADER_LEN: usize = 8;

/// Contents of a complete journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Journal {
    /// Page count of the database before the interrupted commit.
    pub page_count: u32,
    /// Original physical images keyed by page number.
    pub images: Vec<(u32, Vec<u8>)>,
}

fn record_crc(page: u32, image: &[u8]) -> u32 {
    let mut crc = Crc32::new();
    crc.update(&page.to_be_bytes());
    crc.update(image);
    crc.finish()
}

impl Journal {
    /// Writes the journal to `backend`, replacing any previous contents.
    pub fn write(&self, backend: &mut dyn StorageBackend, sync: bool) -> DbResult<()> {
        let mut buf =
            Vec::with_capacity(HEADER_LEN + self.images.len() * (RECORD_HEADER_LEN + PAGE_SIZE));
        buf.extend_from_slice(JOURNAL_MAGIC);
        buf.extend_from_slice(&self.page_count.to_be_bytes());
        buf.extend_from_slice(&(self.images.len() as u32).to_be_bytes());
        let crc = crc32(&buf);
        buf.extend_from_slice(&crc.to_be_bytes());
        for (page, image) in &self.images {
            buf.extend_from_slice(&page.to_be_bytes());
            buf.extend_from_slice(&record_crc(*page, image).to_be_bytes());
            buf.extend_from_slice(image);
        }
        backend.truncate(0)?;
        backend.write_at(0, &buf)?;
        if sync {
            backend.sync()?;
        } else {
            backend.flush()?;
        }
        debug!(pages = self.images.len(), "journal written");
        Ok(())
    }

    /// Reads a journal, returning `None` if it is incomplete or damaged.
    pub fn read(backend: &dyn StorageBackend) -> DbResult<Option<Self>> {
        let size = backend.size()?;
        if size < HEADER_LEN as u64 {
            return Ok(None);
        }
        let header = backend.read_at(0, HEADER_LEN)?;
        if &header[..8] != JOURNAL_MAGIC
            || crc32(&header[..16]) != u32::from_be_bytes([header[16], header[17], header[18], header[19]])
        {
            return Ok(None);
        }
        let page_count = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
        let records = u32::from_be_bytes([header[12], header[13], header[14], header[15]]) as u64;
        let needed = HEADER_LEN as u64 + records * (RECORD_HEADER_LEN + PAGE_SIZE) as u64;
        if size < needed {
            return Ok(None);
        }

        let mut images = Vec::with_capacity(records as usize);
        let mut offset = HEADER_LEN as u64;
        for _ in 0..records {
            let record = backend.read_at(offset, RECORD_HEADER_LEN + PAGE_SIZE)?;
            let page = u32::from_be_bytes([record[0], record[1], record[2], record[3]]);
            let stored = u32::from_be_bytes([record[4], record[5], record[6], record[7]]);
            let image = record[RECORD_HEADER_LEN..].to_vec();
            if record_crc(page, &image) != stored {
                return Ok(None);
            }
            images.push((page, image));
            offset += (RECORD_HEADER_LEN + PAGE_SIZE) as u64;
        }
        Ok(Some(Self { page_count, images }))
    }

    /// Copies the original images back and truncates the file to its
    /// original length.
    pub fn play_back(&self, main: &mut dyn StorageBackend) -> DbResult<()> {
        warn!(
            pages = self.images.len(),
            page_count = self.page_count,
            "rolling back hot journal"
        );
        for (page, image) in &self.images {
            main.write_at(u64::from(*page) * PAGE_SIZE as u64, image)?;
        }
        let original_len = u64::from(self.page_count) * PAGE_SIZE as u64;
        if main.size()? > original_len {
            main.truncate(original_len)?;
        }
        main.sync()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cipherlite_storage::InMemoryBackend;

    fn journal() -> Journal {
        Journal {
            page_count: 2,
            images: vec![(0, vec![0xAA; PAGE_SIZE]), (1, vec![0xBB; PAGE_SIZE])],
        }
    }

    #[test]
    fn complete_journal_reads_back() {
        let mut backend = InMemoryBackend::new();
        journal().write(&mut backend, true).unwrap();
        assert_eq!(Journal::read(&backend).unwrap(), Some(journal()));
    }

    #[test]
    fn torn_journal_is_ignored() {
        let mut backend = InMemoryBackend::new();
        journal().write(&mut backend, true).unwrap();
        let size = backend.size().unwrap();
        backend.truncate(size - 10).unwrap();
        assert_eq!(Journal::read(&backend).unwrap(), None);

        let mut flipped = InMemoryBackend::new();
        journal().write(&mut flipped, true).unwrap();
        flipped.write_at(HEADER_LEN as u64 + 100, &[0]).unwrap();
        assert_eq!(Journal::read(&flipped).unwrap(), None);
    }

    #[test]
    fn play_back_restores_and_truncates() {
        let mut main = InMemoryBackend::new();
        main.write_at(0, &vec![0x11; PAGE_SIZE * 4]).unwrap();
        journal().play_back(&mut main).unwrap();
        assert_eq!(main.size().unwrap(), (PAGE_SIZE * 2) as u64);
        assert_eq!(main.read_at(0, 4).unwrap(), vec![0xAA; 4]);
        assert_eq!(main.read_at(PAGE_SIZE as u64, 4).unwrap(), vec![0xBB; 4]);
    }

    #[test]
    fn empty_file_is_not_hot() {
        assert_eq!(Journal::read(&InMemoryBackend::new()).unwrap(), None);
    }
}

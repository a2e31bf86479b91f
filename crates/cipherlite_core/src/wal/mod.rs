//! Write-ahead log.
//!
//! In WAL mode a commit appends the physical images of every changed page to
//! `<db>-wal` instead of overwriting the database file. The last frame of a
//! transaction carries the database page count and marks the commit point.
//! Readers pin the number of committed frames when they start and resolve
//! each page to the newest frame inside that snapshot, falling back to the
//! database file. A checkpoint copies the newest image of every page back
//! into the database file and resets the log.
//!
//! ## File Format
//!
//! ```text
//! header := magic (16) | page_size (4) | generation (4) | reserved (4) | crc32 (4)
//! frame  := page (4) | commit_page_count (4) | generation (4) | crc32 (4) | image
//! ```
//!
//! ## Recovery Policy
//!
//! Frames are scanned from the start. The scan stops at the first frame that
//! is short, has a stale generation, or fails its checksum. Frames after the
//! last commit frame belong to a transaction that never committed and are
//! discarded; the file is truncated back to the last commit.

mod frame;
mod index;

pub use frame::{FrameHeader, FRAME_HEADER_LEN, FRAME_SIZE};
pub use index::WalIndex;

use crate::checksum::crc32;
use crate::error::{DbError, DbResult};
use crate::pager::{PageRef, PAGE_SIZE};
use cipherlite_storage::StorageBackend;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Size of the WAL file header.
pub const WAL_HEADER_LEN: usize = 32;
const WAL_MAGIC: &[u8; 16] = b"cipherlite-wal\0\x01";

/// An open write-ahead log.
pub struct Wal {
    backend: Box<dyn StorageBackend>,
    generation: u32,
    index: WalIndex,
    committed: u64,
    decoded: HashMap<u64, PageRef>,
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("generation", &self.generation)
            .field("committed", &self.committed)
            .finish_non_exhaustive()
    }
}

fn encode_wal_header(generation: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(WAL_HEADER_LEN);
    buf.extend_from_slice(WAL_MAGIC);
    buf.extend_from_slice(&(PAGE_SIZE as u32).to_be_bytes());
    buf.extend_from_slice(&generation.to_be_bytes());
    buf.extend_from_slice(&[0u8; 4]);
    let crc = crc32(&buf);
    buf.extend_from_slice(&crc.to_be_bytes());
    buf
}

fn decode_wal_header(buf: &[u8]) -> Option<u32> {
    if buf.len() != WAL_HEADER_LEN || &buf[..16] != WAL_MAGIC {
        return None;
    }
    let word = |at: usize| u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
    if word(16) as usize != PAGE_SIZE || crc32(&buf[..28]) != word(28) {
        return None;
    }
    Some(word(20))
}

fn frame_offset(frame: u64) -> u64 {
    WAL_HEADER_LEN as u64 + (frame - 1) * FRAME_SIZE as u64
}

impl Wal {
    /// Creates an empty log on `backend`, discarding its contents.
    pub fn create(backend: Box<dyn StorageBackend>) -> DbResult<Self> {
        let mut wal = Self {
            backend,
            generation: 0,
            index: WalIndex::new(),
            committed: 0,
            decoded: HashMap::new(),
        };
        wal.reset()?;
        Ok(wal)
    }

    /// Opens an existing log and recovers its committed frames.
    pub fn open(backend: Box<dyn StorageBackend>) -> DbResult<Self> {
        let size = backend.size()?;
        let generation = if size >= WAL_HEADER_LEN as u64 {
            decode_wal_header(&backend.read_at(0, WAL_HEADER_LEN)?)
        } else {
            None
        };
        let Some(generation) = generation else {
            if size > 0 {
                warn!(size, "discarding WAL with invalid header");
            }
            return Self::create(backend);
        };

        let mut wal = Self {
            backend,
            generation,
            index: WalIndex::new(),
            committed: 0,
            decoded: HashMap::new(),
        };
        wal.recover(size)?;
        Ok(wal)
    }

    fn recover(&mut self, size: u64) -> DbResult<()> {
        let mut pending = Vec::new();
        let mut frame_no = 1u64;
        while frame_offset(frame_no) + FRAME_SIZE as u64 <= size {
            let raw = self.backend.read_at(frame_offset(frame_no), FRAME_SIZE)?;
            let Some(header) = FrameHeader::decode(&raw, self.generation) else {
                break;
            };
            pending.push((header.page, frame_no));
            if header.is_commit() {
                for (page, frame) in pending.drain(..) {
                    self.index.insert(page, frame);
                }
                self.committed = frame_no;
            }
            frame_no += 1;
        }

        let committed_end = frame_offset(self.committed + 1);
        if size > committed_end {
            debug!(
                discarded_bytes = size - committed_end,
                "truncating uncommitted WAL tail"
            );
            self.backend.truncate(committed_end)?;
        }
        info!(
            frames = self.committed,
            pages = self.index.page_count(),
            generation = self.generation,
            "WAL recovered"
        );
        Ok(())
    }

    /// Number of committed frames.
    #[must_use]
    pub fn committed_frames(&self) -> u64 {
        self.committed
    }

    /// Newest frame holding `page` within a snapshot of `max_frame` frames.
    #[must_use]
    pub fn lookup(&self, page: u32, max_frame: u64) -> Option<u64> {
        self.index.lookup(page, max_frame)
    }

    /// Reads the physical page image stored in `frame`.
    pub fn read_image(&self, frame: u64) -> DbResult<Vec<u8>> {
        if frame == 0 || frame > self.committed {
            return Err(DbError::malformed(format!("WAL frame {frame} is not committed")));
        }
        let mut raw = self.backend.read_at(frame_offset(frame), FRAME_SIZE)?;
        Ok(raw.split_off(FRAME_HEADER_LEN))
    }

    /// Returns decoded content previously remembered for `frame`.
    #[must_use]
    pub fn cached(&self, frame: u64) -> Option<PageRef> {
        self.decoded.get(&frame).cloned()
    }

    /// Remembers decoded content for `frame`.
    pub fn remember(&mut self, frame: u64, content: PageRef) {
        self.decoded.insert(frame, content);
    }

    /// Appends one transaction and makes it visible to new readers.
    ///
    /// The last image is written as the commit frame carrying `page_count`.
    pub fn append_commit(
        &mut self,
        images: &[(u32, Vec<u8>)],
        page_count: u32,
        sync: bool,
    ) -> DbResult<u64> {
        if images.is_empty() {
            return Ok(self.committed);
        }
        let mut buf = Vec::with_capacity(images.len() * FRAME_SIZE);
        for (i, (page, image)) in images.iter().enumerate() {
            let header = FrameHeader {
                page: *page,
                commit_page_count: if i + 1 == images.len() { page_count } else { 0 },
                generation: self.generation,
            };
            buf.extend_from_slice(&header.encode(image));
        }
        self.backend.write_at(frame_offset(self.committed + 1), &buf)?;
        if sync {
            self.backend.sync()?;
        } else {
            self.backend.flush()?;
        }
        for (page, _) in images {
            self.committed += 1;
            self.index.insert(*page, self.committed);
        }
        debug!(frames = images.len(), total = self.committed, "WAL commit appended");
        Ok(self.committed)
    }

    /// Newest frame of every page, for checkpointing.
    #[must_use]
    pub fn latest_frames(&self) -> Vec<(u32, u64)> {
        self.index.latest()
    }

    /// Empties the log and starts a new generation.
    pub fn reset(&mut self) -> DbResult<()> {
        self.generation = self.generation.wrapping_add(1).max(1);
        self.backend.truncate(0)?;
        self.backend.write_at(0, &encode_wal_header(self.generation))?;
        self.backend.sync()?;
        self.index.clear();
        self.decoded.clear();
        self.committed = 0;
        Ok(())
    }
}

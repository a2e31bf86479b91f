//! WAL frame encoding.

use crate::checksum::Crc32;
use crate::pager::PAGE_SIZE;

/// Size of the per-frame header.
pub const FRAME_HEADER_LEN: usize = 16;
/// Size of a whole frame on disk.
pub const FRAME_SIZE: usize = FRAME_HEADER_LEN + PAGE_SIZE;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Page whose image the frame carries.
    pub page: u32,
    /// Database page count after the transaction for commit frames, 0 otherwise.
    pub commit_page_count: u32,
    /// WAL generation the frame was written under.
    pub generation: u32,
}

impl FrameHeader {
    /// Returns true for the last frame of a transaction.
    #[must_use]
    pub const fn is_commit(&self) -> bool {
        self.commit_page_count != 0
    }

    fn checksum(prefix: &[u8], image: &[u8]) -> u32 {
        let mut crc = Crc32::new();
        crc.update(prefix);
        crc.update(image);
        crc.finish()
    }

    /// Serializes the header followed by `image`.
    #[must_use]
    pub fn encode(&self, image: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + image.len());
        buf.extend_from_slice(&self.page.to_be_bytes());
        buf.extend_from_slice(&self.commit_page_count.to_be_bytes());
        buf.extend_from_slice(&self.generation.to_be_bytes());
        let crc = Self::checksum(&buf, image);
        buf.extend_from_slice(&crc.to_be_bytes());
        buf.extend_from_slice(image);
        buf
    }

    /// Parses a whole frame, returning `None` if it is not a valid frame of
    /// `generation`.
    #[must_use]
    pub fn decode(frame: &[u8], generation: u32) -> Option<Self> {
        if frame.len() != FRAME_SIZE {
            return None;
        }
        let word = |at: usize| u32::from_be_bytes([frame[at], frame[at + 1], frame[at + 2], frame[at + 3]]);
        let header = Self {
            page: word(0),
            commit_page_count: word(4),
            generation: word(8),
        };
        if header.generation != generation
            || Self::checksum(&frame[..12], &frame[FRAME_HEADER_LEN..]) != word(12)
        {
            return None;
        }
        Some(header)
    }
}

//! In-memory map from pages to the WAL frames holding their images.

use std::collections::HashMap;

/// Page-to-frame index over the committed part of the WAL.
#[derive(Debug, Default, Clone)]
pub struct WalIndex {
    frames: HashMap<u32, Vec<u64>>,
}

impl WalIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `frame` holds an image of `page`. Frames must be added in
    /// ascending order.
    pub fn insert(&mut self, page: u32, frame: u64) {
        self.frames.entry(page).or_default().push(frame);
    }

    /// Returns the newest frame for `page` that is visible to a reader whose
    /// snapshot ends at `max_frame`.
    #[must_use]
    pub fn lookup(&self, page: u32, max_frame: u64) -> Option<u64> {
        let frames = self.frames.get(&page)?;
        let visible = frames.partition_point(|f| *f <= max_frame);
        visible.checked_sub(1).map(|i| frames[i])
    }

    /// Returns the newest frame of every page, sorted by page number.
    #[must_use]
    pub fn latest(&self) -> Vec<(u32, u64)> {
        let mut latest: Vec<_> = self
            .frames
            .iter()
            .filter_map(|(page, frames)| frames.last().map(|f| (*page, *f)))
            .collect();
        latest.sort_unstable();
        latest
    }

    /// Number of distinct pages in the WAL.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.frames.len()
    }

    /// Forgets all frames.
    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_respects_snapshot() {
        let mut index = WalIndex::new();
        index.insert(3, 1);
        index.insert(5, 2);
        index.insert(3, 4);

        assert_eq!(index.lookup(3, 0), None);
        assert_eq!(index.lookup(3, 1), Some(1));
        assert_eq!(index.lookup(3, 3), Some(1));
        assert_eq!(index.lookup(3, 4), Some(4));
        assert_eq!(index.lookup(9, 4), None);
    }

    #[test]
    fn latest_is_sorted() {
        let mut index = WalIndex::new();
        index.insert(8, 1);
        index.insert(2, 2);
        index.insert(8, 3);
        assert_eq!(index.latest(), vec![(2, 2), (8, 3)]);
        assert_eq!(index.page_count(), 2);
    }
}

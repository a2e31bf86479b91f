//! Shared cache of decoded main-file pages.

use std::collections::HashMap;
use std::sync::Arc;

/// Decoded page content shared between views.
pub type PageRef = Arc<Vec<u8>>;

/// Bounded map from page number to decoded content.
///
/// Entries mirror the main database file only; pages that live in the WAL
/// are never cached here. When full, an arbitrary entry is evicted.
#[derive(Debug)]
pub struct PageCache {
    pages: HashMap<u32, PageRef>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl PageCache {
    /// Creates a cache holding at most `capacity` pages.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            pages: HashMap::new(),
            capacity,
            hits: 0,
            misses: 0,
        }
    }

    /// Looks up a page.
    pub fn get(&mut self, page: u32) -> Option<PageRef> {
        let found = self.pages.get(&page).cloned();
        if found.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        found
    }

    /// Inserts or replaces a page.
    pub fn insert(&mut self, page: u32, content: PageRef) {
        if self.capacity == 0 {
            return;
        }
        if self.pages.len() >= self.capacity && !self.pages.contains_key(&page) {
            if let Some(victim) = self.pages.keys().next().copied() {
                self.pages.remove(&victim);
            }
        }
        self.pages.insert(page, content);
    }

    /// Drops one page.
    pub fn invalidate(&mut self, page: u32) {
        self.pages.remove(&page);
    }

    /// Drops every page.
    pub fn clear(&mut self) {
        self.pages.clear();
    }

    /// Number of cached pages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Returns `(hits, misses)` since creation.
    #[must_use]
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_respected() {
        let mut cache = PageCache::new(2);
        for page in 1..=5 {
            cache.insert(page, Arc::new(vec![page as u8]));
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(5).is_some());
    }

    #[test]
    fn invalidate_and_stats() {
        let mut cache = PageCache::new(8);
        cache.insert(1, Arc::new(vec![1]));
        assert!(cache.get(1).is_some());
        cache.invalidate(1);
        assert!(cache.get(1).is_none());
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn zero_capacity_disables_caching() {
        let mut cache = PageCache::new(0);
        cache.insert(1, Arc::new(vec![1]));
        assert!(cache.get(1).is_none());
    }
}

//! Per-request redirect counting for the HTTPS loop guard.

use std::sync::Mutex;

use crate::cache::RecentlyUsedCache;

/// Rewrites performed per request id, bounded by least-recently-touched
/// eviction.
#[derive(Debug)]
pub struct RedirectCounter {
    table: Mutex<RecentlyUsedCache<u64, u32>>,
}

impl RedirectCounter {
    pub fn new(capacity: usize) -> Self {
        Self {
            table: Mutex::new(RecentlyUsedCache::new(capacity)),
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, RecentlyUsedCache<u64, u32>> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn redirects(&self, request_id: u64) -> u32 {
        self.table().get(&request_id).copied().unwrap_or(0)
    }

    /// Count one more rewrite for `request_id`.
    pub fn record(&self, request_id: u64) -> u32 {
        let mut table = self.table();
        let count = table.get(&request_id).copied().unwrap_or(0) + 1;
        table.insert(request_id, count);
        count
    }

    /// Count a rewrite only while the request is still below `max`.
    /// Returns false when the guard has tripped.
    pub fn record_if_below(&self, request_id: u64, max: u32) -> bool {
        let mut table = self.table();
        let count = table.get(&request_id).copied().unwrap_or(0);
        if count >= max {
            return false;
        }
        table.insert(request_id, count + 1);
        true
    }

    /// Drop the entry of a finished request.
    pub fn forget(&self, request_id: u64) {
        self.table().remove(&request_id);
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_forget() {
        let counter = RedirectCounter::new(8);
        assert_eq!(counter.redirects(1), 0);
        assert_eq!(counter.record(1), 1);
        assert_eq!(counter.record(1), 2);
        assert_eq!(counter.redirects(1), 2);
        assert_eq!(counter.redirects(2), 0);

        counter.forget(1);
        assert_eq!(counter.redirects(1), 0);
        assert!(counter.is_empty());
    }

    #[test]
    fn test_record_if_below() {
        let counter = RedirectCounter::new(8);
        assert!(counter.record_if_below(5, 2));
        assert!(counter.record_if_below(5, 2));
        assert!(!counter.record_if_below(5, 2));
        assert_eq!(counter.redirects(5), 2);
    }

    #[test]
    fn test_evicts_at_capacity() {
        let counter = RedirectCounter::new(2);
        counter.record(1);
        counter.record(2);
        counter.record(1);
        counter.record(3);
        assert_eq!(counter.len(), 2);
        assert_eq!(counter.redirects(2), 0);
        assert_eq!(counter.redirects(1), 2);
        assert_eq!(counter.redirects(3), 1);
    }
}

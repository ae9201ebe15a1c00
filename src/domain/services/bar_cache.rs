use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

use crate::domain::entities::bar::Bar;
use crate::domain::value_objects::time::MicroSec;

pub const DEFAULT_BAR_CACHE_CAPACITY: usize = 256;

/// Memo key: the query exactly as asked, zeros included
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BarKey {
    pub start: MicroSec,
    pub end: MicroSec,
    pub window_sec: i64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    bars: Arc<Vec<Bar>>,
    /// Resolved trade range the bars were computed from
    covered: (MicroSec, MicroSec),
    materialized_at: MicroSec,
    stale: bool,
}

/// Memoized bar sets, stale until explicitly refreshed
///
/// A hit is returned as-is even after new trades land in its range; the
/// store only flags such entries as stale. Recomputation happens when a
/// caller asks for it by inserting a fresh result over the key.
pub struct BarCache {
    entries: LruCache<BarKey, CacheEntry>,
    hits: u64,
    misses: u64,
}

impl BarCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, key: &BarKey) -> Option<Arc<Vec<Bar>>> {
        match self.entries.get(key) {
            Some(entry) => {
                self.hits += 1;
                if entry.stale {
                    debug!(
                        "Serving stale bars for {:?} (materialized at {})",
                        key, entry.materialized_at
                    );
                }
                Some(entry.bars.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(
        &mut self,
        key: BarKey,
        bars: Vec<Bar>,
        covered: (MicroSec, MicroSec),
        now: MicroSec,
    ) -> Arc<Vec<Bar>> {
        let bars = Arc::new(bars);
        self.entries.put(
            key,
            CacheEntry {
                bars: bars.clone(),
                covered,
                materialized_at: now,
                stale: false,
            },
        );
        bars
    }

    /// Flag entries overlapping `[start, end)` as stale. Returns how many
    /// entries were flagged.
    pub fn mark_stale(&mut self, start: MicroSec, end: MicroSec) -> usize {
        let mut flagged = 0;
        for (_, entry) in self.entries.iter_mut() {
            let (covered_start, covered_end) = entry.covered;
            if !entry.stale && covered_start < end && start < covered_end {
                entry.stale = true;
                flagged += 1;
            }
        }
        flagged
    }

    /// `None` when the key is not cached.
    pub fn is_stale(&self, key: &BarKey) -> Option<bool> {
        self.entries.peek(key).map(|e| e.stale)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl Default for BarCache {
    fn default() -> Self {
        Self::new(DEFAULT_BAR_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(start: MicroSec) -> Bar {
        Bar {
            window_start: start,
            window_end: start + 60,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
            buy_volume: 1.0,
            sell_volume: 0.0,
            trade_count: 1,
            provisional: false,
        }
    }

    #[test]
    fn test_hit_returns_memoized_even_when_stale() {
        let mut cache = BarCache::new(4);
        let key = BarKey {
            start: 0,
            end: 120,
            window_sec: 60,
        };
        cache.insert(key, vec![bar(0)], (0, 120), 1);

        assert_eq!(cache.mark_stale(100, 200), 1);
        assert_eq!(cache.is_stale(&key), Some(true));
        assert_eq!(cache.get(&key).unwrap().len(), 1);

        cache.insert(key, vec![bar(0), bar(60)], (0, 120), 2);
        assert_eq!(cache.is_stale(&key), Some(false));
        assert_eq!(cache.get(&key).unwrap().len(), 2);
    }

    #[test]
    fn test_mark_stale_ignores_disjoint_ranges() {
        let mut cache = BarCache::new(4);
        let key = BarKey {
            start: 0,
            end: 120,
            window_sec: 60,
        };
        cache.insert(key, vec![bar(0)], (0, 120), 1);
        assert_eq!(cache.mark_stale(120, 240), 0);
        assert_eq!(cache.is_stale(&key), Some(false));
    }

    #[test]
    fn test_capacity_evicts_lru() {
        let mut cache = BarCache::new(1);
        let a = BarKey {
            start: 0,
            end: 60,
            window_sec: 60,
        };
        let b = BarKey {
            start: 60,
            end: 120,
            window_sec: 60,
        };
        cache.insert(a, vec![bar(0)], (0, 60), 1);
        cache.insert(b, vec![bar(60)], (60, 120), 1);

        assert!(cache.get(&a).is_none());
        assert!(cache.get(&b).is_some());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.hit_rate(), 0.5);
    }
}

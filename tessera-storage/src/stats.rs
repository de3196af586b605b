//! Cache usage statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of reads that found an entry.
    pub hits: u64,
    /// Number of reads that found nothing.
    pub misses: u64,
    /// Number of applied puts.
    pub puts: u64,
    /// Number of applied removals.
    pub removals: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    removals: AtomicU64,
}

impl StatsCounters {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Default::default()
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn record_read(&self, hit: bool) {
        if !self.enabled {
            return;
        }
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_put(&self) {
        if self.enabled {
            self.puts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_removal(&self) {
        if self.enabled {
            self.removals.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self, entry_count: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            entry_count: entry_count as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);

        let empty_stats = CacheStats::default();
        assert!((empty_stats.hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_disabled_counters_stay_zero() {
        let counters = StatsCounters::new(false);
        counters.record_read(true);
        counters.record_put();
        counters.record_removal();
        assert_eq!(counters.snapshot(3), CacheStats {
            entry_count: 3,
            ..Default::default()
        });
    }

    #[test]
    fn test_enabled_counters() {
        let counters = StatsCounters::new(true);
        counters.record_read(true);
        counters.record_read(false);
        counters.record_put();
        let stats = counters.snapshot(1);
        assert_eq!((stats.hits, stats.misses, stats.puts), (1, 1, 1));
    }
}

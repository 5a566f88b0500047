//! Reusable event records
//!
//! Records are boxed so a warm pool hands out the same allocations over and
//! over. An empty pool falls back to a fresh allocation; an event is never
//! refused for lack of a record.

use crate::config::PoolConfig;
use crate::keyboard::KeyEventRecord;
use log::debug;
use serde::Serialize;
use std::time::Instant;

/// Pool usage counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Records served from the free list
    pub hits: u64,
    /// Records allocated because the free list was empty
    pub fallbacks: u64,
    /// Records taken back into the free list
    pub returned: u64,
    /// Records freed because the free list was full
    pub discarded: u64,
}

/// Free list of event records
pub struct EventPool {
    free: Vec<Box<KeyEventRecord>>,
    capacity: usize,
    epoch: Instant,
    stats: PoolStats,
}

impl EventPool {
    pub fn new(config: &PoolConfig) -> Self {
        Self::with_capacity(config.capacity)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            free: Vec::with_capacity(capacity),
            capacity,
            epoch: Instant::now(),
            stats: PoolStats::default(),
        }
    }

    /// Pre-allocate up to `count` records
    pub fn warmup(&mut self, count: usize) {
        let target = count.min(self.capacity);
        while self.free.len() < target {
            self.free.push(Box::new(KeyEventRecord::blank(self.epoch)));
        }
    }

    /// Take a record. Its contents are unspecified; the caller fills it.
    pub fn acquire(&mut self) -> Box<KeyEventRecord> {
        match self.free.pop() {
            Some(record) => {
                self.stats.hits += 1;
                record
            }
            None => {
                self.stats.fallbacks += 1;
                if self.stats.fallbacks.is_power_of_two() {
                    debug!(
                        "event pool empty, {} unpooled allocation(s) so far",
                        self.stats.fallbacks
                    );
                }
                Box::new(KeyEventRecord::blank(self.epoch))
            }
        }
    }

    /// Hand a record back for reuse
    pub fn release(&mut self, record: Box<KeyEventRecord>) {
        if self.free.len() < self.capacity {
            self.free.push(record);
            self.stats.returned += 1;
        } else {
            self.stats.discarded += 1;
        }
    }

    /// Free every idle record
    pub fn cleanup(&mut self) {
        self.free.clear();
        self.free.shrink_to_fit();
    }

    /// Records currently waiting for reuse
    pub fn idle(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}

impl Default for EventPool {
    fn default() -> Self {
        Self::new(&PoolConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warmup_is_capped_by_capacity() {
        let mut pool = EventPool::with_capacity(4);
        pool.warmup(10);
        assert_eq!(pool.idle(), 4);
    }

    #[test]
    fn acquire_reuses_released_records() {
        let mut pool = EventPool::with_capacity(2);
        pool.warmup(1);
        let record = pool.acquire();
        assert_eq!(pool.idle(), 0);
        pool.release(record);
        let _again = pool.acquire();
        assert_eq!(pool.stats().hits, 2);
        assert_eq!(pool.stats().fallbacks, 0);
    }

    #[test]
    fn exhausted_pool_falls_back_to_allocation() {
        let mut pool = EventPool::with_capacity(1);
        pool.warmup(1);
        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(pool.stats().fallbacks, 1);

        pool.release(a);
        pool.release(b);
        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.stats().discarded, 1);
    }

    #[test]
    fn cleanup_discards_idle_records() {
        let mut pool = EventPool::with_capacity(8);
        pool.warmup(8);
        let outstanding = pool.acquire();
        pool.cleanup();
        assert_eq!(pool.idle(), 0);
        // Outstanding records need not come back
        drop(outstanding);
    }
}

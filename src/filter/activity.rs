//! Per-key activity history for the fast path
//!
//! A key qualifies for the fast path after a run of accepted presses that
//! were all spaced well above its threshold. Any drop ends the run.

use crate::config::ActivityConfig;
use crate::keyboard::{DeviceId, KeyIdentity};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct ActivityRecord {
    last: Instant,
    clean_run: u32,
    threshold: Duration,
}

/// Recent press history per key
#[derive(Debug, Clone)]
pub struct ActivityProfile {
    keys: HashMap<KeyIdentity, ActivityRecord>,
    min_events: u32,
    margin: u32,
}

impl ActivityProfile {
    pub fn new(config: &ActivityConfig) -> Self {
        Self {
            keys: HashMap::new(),
            min_events: config.fast_path_min_events.max(1),
            margin: config.fast_path_margin.max(1),
        }
    }

    /// Apply new settings and forget every qualification
    pub fn reconfigure(&mut self, config: &ActivityConfig) {
        self.min_events = config.fast_path_min_events.max(1);
        self.margin = config.fast_path_margin.max(1);
        self.keys.clear();
    }

    /// Record an accepted press compared against `threshold`
    pub fn record_activity(&mut self, key: KeyIdentity, timestamp: Instant, threshold: Duration) {
        let clean_gap = threshold * self.margin;
        match self.keys.get_mut(&key) {
            Some(record) => {
                let clean = timestamp
                    .checked_duration_since(record.last)
                    .is_some_and(|gap| gap >= clean_gap);
                record.clean_run = if clean && record.threshold == threshold {
                    record.clean_run.saturating_add(1)
                } else {
                    0
                };
                record.last = record.last.max(timestamp);
                record.threshold = threshold;
            }
            None => {
                self.keys.insert(
                    key,
                    ActivityRecord {
                        last: timestamp,
                        clean_run: 0,
                        threshold,
                    },
                );
            }
        }
    }

    /// A dropped event ends the key's clean run
    pub fn record_drop(&mut self, key: KeyIdentity) {
        if let Some(record) = self.keys.get_mut(&key) {
            record.clean_run = 0;
        }
    }

    /// Whether the key has earned the fast path
    pub fn should_fast_path_skip(&self, key: KeyIdentity) -> bool {
        self.keys
            .get(&key)
            .is_some_and(|r| r.clean_run >= self.min_events)
    }

    /// Gap a press needs to stay on the fast path, if the key qualifies
    pub fn fast_path_gap(&self, key: KeyIdentity) -> Option<Duration> {
        self.keys
            .get(&key)
            .filter(|r| r.clean_run >= self.min_events)
            .map(|r| r.threshold * self.margin)
    }

    /// Threshold recorded for the key's clean run
    pub fn recorded_threshold(&self, key: KeyIdentity) -> Option<Duration> {
        self.keys.get(&key).map(|r| r.threshold)
    }

    pub fn forget(&mut self, key: &KeyIdentity) {
        self.keys.remove(key);
    }

    pub fn forget_device(&mut self, device: DeviceId) {
        self.keys.retain(|key, _| key.device != device);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }
}

impl Default for ActivityProfile {
    fn default() -> Self {
        Self::new(&ActivityConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::test_helpers::ms;

    fn profile(min_events: u32) -> ActivityProfile {
        ActivityProfile::new(&ActivityConfig {
            fast_path_min_events: min_events,
            fast_path_margin: 3,
        })
    }

    fn key() -> KeyIdentity {
        KeyIdentity::new(1u64, 30u16)
    }

    #[test]
    fn qualifies_after_clean_run() {
        let mut p = profile(3);
        let base = Instant::now();
        for i in 0..3 {
            p.record_activity(key(), base + ms(i * 200), ms(40));
            assert!(!p.should_fast_path_skip(key()));
        }
        p.record_activity(key(), base + ms(600), ms(40));
        assert!(p.should_fast_path_skip(key()));
        assert_eq!(p.fast_path_gap(key()), Some(ms(120)));
    }

    #[test]
    fn tight_gap_breaks_the_run() {
        let mut p = profile(2);
        let base = Instant::now();
        p.record_activity(key(), base, ms(40));
        p.record_activity(key(), base + ms(200), ms(40));
        p.record_activity(key(), base + ms(400), ms(40));
        assert!(p.should_fast_path_skip(key()));

        // Accepted, but under 3x threshold
        p.record_activity(key(), base + ms(460), ms(40));
        assert!(!p.should_fast_path_skip(key()));
    }

    #[test]
    fn drop_resets_qualification() {
        let mut p = profile(1);
        let base = Instant::now();
        p.record_activity(key(), base, ms(40));
        p.record_activity(key(), base + ms(500), ms(40));
        assert!(p.should_fast_path_skip(key()));
        p.record_drop(key());
        assert!(!p.should_fast_path_skip(key()));
    }

    #[test]
    fn threshold_change_restarts_run() {
        let mut p = profile(1);
        let base = Instant::now();
        p.record_activity(key(), base, ms(40));
        p.record_activity(key(), base + ms(500), ms(60));
        assert!(!p.should_fast_path_skip(key()));
        assert_eq!(p.recorded_threshold(key()), Some(ms(60)));
    }

    #[test]
    fn keys_are_independent() {
        let mut p = profile(1);
        let other = KeyIdentity::new(1u64, 31u16);
        let base = Instant::now();
        p.record_activity(key(), base, ms(40));
        p.record_activity(key(), base + ms(500), ms(40));
        p.record_drop(other);
        assert!(p.should_fast_path_skip(key()));
        assert!(!p.should_fast_path_skip(other));

        p.forget_device(DeviceId(1));
        assert!(p.is_empty());
    }
}

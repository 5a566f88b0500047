//! Per-key filter state tracking

use super::{DeviceId, KeyEventType, KeyIdentity};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Depth of the per-key recency ring
pub const RECENT_DEPTH: usize = 4;

/// Upper bound for the diagnostic suppression streak
pub const MAX_SUPPRESSION_STREAK: u32 = 1_000;

/// Fixed-size ring of the most recent event timestamps for one key.
///
/// Every event is recorded here, accepted or not, so the ring shows whether
/// a key is in the middle of a burst.
#[derive(Debug, Clone, Default)]
pub struct RecentRing {
    slots: [Option<Instant>; RECENT_DEPTH],
    head: usize,
}

impl RecentRing {
    pub fn push(&mut self, timestamp: Instant) {
        self.slots[self.head] = Some(timestamp);
        self.head = (self.head + 1) % RECENT_DEPTH;
    }

    /// Most recently pushed timestamp
    pub fn latest(&self) -> Option<Instant> {
        let idx = (self.head + RECENT_DEPTH - 1) % RECENT_DEPTH;
        self.slots[idx]
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// True when every recorded timestamp is strictly before `cutoff`
    pub fn all_before(&self, cutoff: Instant) -> bool {
        self.slots.iter().flatten().all(|ts| *ts < cutoff)
    }
}

/// Filter state of a single physical key
#[derive(Debug, Clone, Default)]
pub struct PerKeyState {
    /// Last accepted timestamp, indexed by event kind
    last_accepted: [Option<Instant>; 2],
    /// Recent event timestamps (accepted and dropped)
    recent: RecentRing,
    /// Consecutive drops since the last accept
    suppression_streak: u32,
}

impl PerKeyState {
    /// When an event of this kind was last accepted
    pub fn last_accepted(&self, kind: KeyEventType) -> Option<Instant> {
        self.last_accepted[kind.index()]
    }

    pub fn suppression_streak(&self) -> u32 {
        self.suppression_streak
    }

    pub fn recent(&self) -> &RecentRing {
        &self.recent
    }

    pub(crate) fn note_seen(&mut self, timestamp: Instant) {
        self.recent.push(timestamp);
    }

    /// Record an accepted event. The slot never moves backwards.
    pub(crate) fn record_accept(&mut self, kind: KeyEventType, timestamp: Instant) {
        let slot = &mut self.last_accepted[kind.index()];
        if slot.map_or(true, |prev| timestamp > prev) {
            *slot = Some(timestamp);
        }
        self.suppression_streak = 0;
    }

    pub(crate) fn record_suppression(&mut self) {
        self.suppression_streak = (self.suppression_streak + 1).min(MAX_SUPPRESSION_STREAK);
    }
}

/// Table of per-key state, created lazily on first sighting
#[derive(Debug, Default)]
pub struct KeyStateTable {
    keys: HashMap<KeyIdentity, PerKeyState>,
}

impl KeyStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the state for a key, creating it if this is the first sighting.
    ///
    /// The flag is `true` when the state was just created.
    pub fn entry(&mut self, key: KeyIdentity) -> (&mut PerKeyState, bool) {
        let mut created = false;
        let state = self.keys.entry(key).or_insert_with(|| {
            created = true;
            PerKeyState::default()
        });
        (state, created)
    }

    /// Get state for a specific key
    pub fn get(&self, key: &KeyIdentity) -> Option<&PerKeyState> {
        self.keys.get(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&KeyIdentity, &PerKeyState)> {
        self.keys.iter()
    }

    /// Remove keys idle for longer than `horizon`.
    ///
    /// A key is only evicted when its whole recency ring is older than the
    /// horizon, so a key in the middle of a burst always survives.
    pub fn evict_idle(&mut self, now: Instant, horizon: Duration) -> Vec<KeyIdentity> {
        let Some(cutoff) = now.checked_sub(horizon) else {
            return Vec::new();
        };
        let stale: Vec<KeyIdentity> = self
            .keys
            .iter()
            .filter(|(_, state)| state.recent.all_before(cutoff))
            .map(|(key, _)| *key)
            .collect();
        for key in &stale {
            self.keys.remove(key);
        }
        stale
    }

    /// Drop all state belonging to one device
    pub fn forget_device(&mut self, device: DeviceId) -> usize {
        let before = self.keys.len();
        self.keys.retain(|key, _| key.device != device);
        before - self.keys.len()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }
}

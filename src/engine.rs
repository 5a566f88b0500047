//! The event-path entry point
//!
//! [`DechatterEngine`] ties the pieces together for an interception
//! collaborator: classify the device, try the fast path, evaluate, and do
//! whatever bookkeeping the current load allows. Every collaborator service
//! (clock, classifier, load monitor) is passed in at construction; the
//! engine holds no global state.
//!
//! ## Example
//!
//! ```
//! use keyboard_dechatter::config::{Config, ThresholdConfig};
//! use keyboard_dechatter::device::{DeviceClass, KeyboardClassifier, StaticProbe};
//! use keyboard_dechatter::engine::DechatterEngine;
//! use keyboard_dechatter::keyboard::{KeyEventType, Verdict};
//! use keyboard_dechatter::timing::{LoadMonitor, ManualClock};
//! use std::time::Duration;
//!
//! let config = Config {
//!     thresholds: ThresholdConfig::uniform(35),
//!     ..Config::default()
//! };
//! let clock = ManualClock::new();
//! let classifier = KeyboardClassifier::new(StaticProbe::new().with(1u64, DeviceClass::ExternalWired));
//! let load = LoadMonitor::new(&config.load);
//! let mut engine = DechatterEngine::new(Some(config), clock.clone(), classifier, load);
//!
//! assert_eq!(engine.on_hardware_event(1u64, 30u16, KeyEventType::Press, false), Verdict::Accept);
//! clock.advance(Duration::from_millis(10));
//! assert_eq!(engine.on_hardware_event(1u64, 30u16, KeyEventType::Press, false), Verdict::Drop);
//! ```

use crate::config::{Config, ConfigError, ConfigSnapshot};
use crate::device::{DeviceClass, KeyboardClassifier};
use crate::filter::{ActivityProfile, ChatterFilter, Reason};
use crate::keyboard::{
    DeviceId, HardwareEvent, KeyCode, KeyEventType, KeyIdentity, KeyStateTable, PerKeyState, Verdict,
};
use crate::pool::{EventPool, PoolStats};
use crate::stats::ChatterStats;
use crate::timing::{LoadMonitor, SystemClock, TimestampSource};
use log::{debug, info, warn};
use serde::Serialize;
use std::time::Instant;

/// Event counters kept by the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineCounters {
    /// Events handed to the engine
    pub events: u64,
    pub accepted: u64,
    pub dropped: u64,
    /// Accepted without filtering because the device is out of scope
    pub unmonitored: u64,
    /// OS auto-repeats passed through
    pub repeats: u64,
    /// Accepted on the fast path
    pub fast_path: u64,
    /// Accepted despite a timestamp running backwards
    pub clock_regressions: u64,
    /// Per-key states evicted after going idle
    pub evicted: u64,
}

/// Chatter filter engine for one serialized event stream
pub struct DechatterEngine {
    config: ConfigSnapshot,
    clock: Box<dyn TimestampSource + Send>,
    classifier: KeyboardClassifier,
    load: LoadMonitor,
    filter: ChatterFilter,
    activity: ActivityProfile,
    keys: KeyStateTable,
    pool: EventPool,
    stats: ChatterStats,
    counters: EngineCounters,
    reducing: bool,
    since_sweep: u64,
}

impl DechatterEngine {
    /// Build an engine. `config` of `None` starts on the conservative
    /// default until a snapshot arrives, as does a config whose thresholds
    /// are finer than `clock` can resolve.
    pub fn new(
        config: Option<Config>,
        clock: impl TimestampSource + Send + 'static,
        classifier: KeyboardClassifier,
        load: LoadMonitor,
    ) -> Self {
        let staleness = clock.max_staleness();
        let config = config.and_then(|c| match c.check_staleness(staleness) {
            Ok(()) => Some(c),
            Err(e) => {
                warn!("rejecting initial config for this clock: {}", e);
                None
            }
        });
        let config = ConfigSnapshot::new(config);
        let current = config.current().clone();
        if let Err(e) = current.check_staleness(staleness) {
            warn!("default thresholds too fine for this clock: {}", e);
        }
        load.reconfigure(&current.load);
        let mut pool = EventPool::new(&current.pool);
        pool.warmup(current.pool.warmup);

        Self {
            activity: ActivityProfile::new(&current.activity),
            config,
            clock: Box::new(clock),
            classifier,
            load,
            filter: ChatterFilter::new(),
            keys: KeyStateTable::new(),
            pool,
            stats: ChatterStats::new(),
            counters: EngineCounters::default(),
            reducing: false,
            since_sweep: 0,
        }
    }

    /// Engine on the system clock with an idle load monitor
    pub fn with_classifier(config: Option<Config>, classifier: KeyboardClassifier) -> Self {
        let load = LoadMonitor::new(&config.clone().unwrap_or_default().load);
        Self::new(config, SystemClock, classifier, load)
    }

    /// Decide an event stamped by the engine's clock
    pub fn on_hardware_event(
        &mut self,
        device: impl Into<DeviceId>,
        key: impl Into<KeyCode>,
        kind: KeyEventType,
        is_synthetic_repeat: bool,
    ) -> Verdict {
        let now = self.clock.now();
        self.on_hardware_event_at(device, key, kind, is_synthetic_repeat, now)
    }

    /// Decide an event the collaborator already timestamped
    pub fn on_hardware_event_at(
        &mut self,
        device: impl Into<DeviceId>,
        key: impl Into<KeyCode>,
        kind: KeyEventType,
        is_synthetic_repeat: bool,
        timestamp: Instant,
    ) -> Verdict {
        let identity = KeyIdentity::new(device, key);
        let verdict = self.decide(identity, kind, is_synthetic_repeat, timestamp);
        match verdict {
            Verdict::Accept => self.counters.accepted += 1,
            Verdict::Drop => self.counters.dropped += 1,
        }
        self.maybe_sweep(timestamp);
        verdict
    }

    /// Decide an event read from a collaborator's queue
    pub fn on_event(&mut self, event: &HardwareEvent) -> Verdict {
        let timestamp = match event.timestamp {
            Some(ts) => ts,
            None => self.clock.now(),
        };
        self.on_hardware_event_at(
            event.device,
            event.key,
            event.event_type,
            event.synthetic_repeat,
            timestamp,
        )
    }

    fn decide(&mut self, identity: KeyIdentity, kind: KeyEventType, repeat: bool, now: Instant) -> Verdict {
        self.counters.events += 1;

        if repeat {
            self.counters.repeats += 1;
            return Verdict::Accept;
        }

        let reducing = self.load.should_reduce_processing_at(now);
        if reducing != self.reducing {
            self.reducing = reducing;
            if reducing {
                // Runs recorded before shedding would go stale meanwhile
                self.activity.clear();
            }
        }

        if !reducing && kind == KeyEventType::Press && self.try_fast_path(identity, now) {
            return Verdict::Accept;
        }

        let class = self.classifier.classify(identity.device).class;
        let config = self.config.current().clone();
        if !KeyboardClassifier::should_monitor(class, &config.scope) {
            self.counters.unmonitored += 1;
            return Verdict::Accept;
        }

        let mut record = self.pool.acquire();
        record.identity = identity;
        record.event_type = kind;
        record.timestamp = now;
        record.device_class = class;
        record.synthetic_repeat = false;

        let (state, created) = self.keys.entry(identity);
        if created {
            debug!("tracking new key {}", identity);
        }
        let eval = self.filter.evaluate_detailed(&record, &config, state);
        self.pool.release(record);

        match eval.reason {
            Reason::ClockRegression => self.counters.clock_regressions += 1,
            Reason::Chatter => {
                self.activity.record_drop(identity);
                let gap = if reducing { None } else { eval.gap };
                self.stats.record_dismiss(identity.key, gap, now);
            }
            _ => {}
        }
        if !reducing && eval.verdict.is_accept() && kind == KeyEventType::Press {
            self.activity.record_activity(identity, now, eval.threshold);
        }
        eval.verdict
    }

    /// Accept a press from a key with a clean history without classifying
    /// or resolving thresholds. Only taken when the full evaluation would
    /// accept as well; anything else falls back to it.
    fn try_fast_path(&mut self, identity: KeyIdentity, now: Instant) -> bool {
        let Some(clean_gap) = self.activity.fast_path_gap(identity) else {
            return false;
        };
        let Some(threshold) = self.activity.recorded_threshold(identity) else {
            return false;
        };
        let (state, _) = self.keys.entry(identity);
        let Some(last) = state.last_accepted(KeyEventType::Press) else {
            return false;
        };
        match now.checked_duration_since(last) {
            Some(gap) if gap >= clean_gap => {
                state.note_seen(now);
                state.record_accept(KeyEventType::Press, now);
                self.activity.record_activity(identity, now, threshold);
                self.counters.fast_path += 1;
                true
            }
            _ => false,
        }
    }

    fn maybe_sweep(&mut self, now: Instant) {
        self.since_sweep += 1;
        let eviction = &self.config.current().eviction;
        if eviction.check_every_events == 0 || self.since_sweep < eviction.check_every_events {
            return;
        }
        self.since_sweep = 0;
        let horizon = eviction.idle_horizon();
        self.evict_idle(now, horizon);
    }

    /// Forget keys idle for longer than `horizon`. Returns how many went.
    pub fn evict_idle(&mut self, now: Instant, horizon: std::time::Duration) -> usize {
        let evicted = self.keys.evict_idle(now, horizon);
        for key in &evicted {
            self.activity.forget(key);
        }
        if !evicted.is_empty() {
            debug!("evicted {} idle key state(s)", evicted.len());
        }
        self.counters.evicted += evicted.len() as u64;
        evicted.len()
    }

    /// Hot-plug notification: classifications are recomputed on demand
    pub fn notify_device_list_changed(&mut self) {
        self.classifier.invalidate();
        // Fast-path runs carry class-derived thresholds
        self.activity.clear();
    }

    /// Forget a device that went away, along with its key state
    pub fn forget_device(&mut self, device: impl Into<DeviceId>) {
        let device = device.into();
        self.classifier.invalidate_device(device);
        self.activity.forget_device(device);
        let removed = self.keys.forget_device(device);
        debug!("forgot {} with {} key state(s)", device, removed);
    }

    /// Install a new configuration snapshot, keeping the previous one if
    /// the update is missing or invalid, or has a threshold the engine's
    /// clock cannot resolve
    pub fn update_config(&mut self, update: Result<Config, ConfigError>) -> Result<(), ConfigError> {
        let staleness = self.clock.max_staleness();
        self.config
            .apply(update.and_then(|c| c.check_staleness(staleness).map(|_| c)))?;
        let current = self.config.current().clone();
        self.activity.reconfigure(&current.activity);
        self.load.reconfigure(&current.load);
        info!(
            "config updated: thresholds {}/{}/{} ms, ignore internal={}, ignore external={}",
            current.thresholds.internal_ms,
            current.thresholds.external_wired_ms,
            current.thresholds.external_wireless_ms,
            current.scope.ignore_internal,
            current.scope.ignore_external
        );
        Ok(())
    }

    pub fn config(&self) -> &Config {
        self.config.current()
    }

    /// True while running on the built-in default configuration
    pub fn is_config_fallback(&self) -> bool {
        self.config.is_fallback()
    }

    /// Class of a device, classifying it if needed
    pub fn classify(&mut self, device: impl Into<DeviceId>) -> DeviceClass {
        self.classifier.classify(device.into()).class
    }

    pub fn counters(&self) -> EngineCounters {
        self.counters
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn stats(&self) -> &ChatterStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut ChatterStats {
        &mut self.stats
    }

    /// Replace the statistics, e.g. with counts loaded from disk
    pub fn set_stats(&mut self, stats: ChatterStats) {
        self.stats = stats;
    }

    pub fn key_state(&self, key: &KeyIdentity) -> Option<&PerKeyState> {
        self.keys.get(key)
    }

    pub fn tracked_keys(&self) -> usize {
        self.keys.len()
    }

    pub fn activity(&self) -> &ActivityProfile {
        &self.activity
    }

    pub fn load_monitor(&self) -> &LoadMonitor {
        &self.load
    }

    /// Release pooled records and hand back the statistics
    pub fn shutdown(mut self) -> ChatterStats {
        self.pool.cleanup();
        info!(
            "shutting down after {} event(s): {}",
            self.counters.events,
            self.stats.summary()
        );
        self.stats
    }
}

//! Chatter decision for a single event

use crate::config::Config;
use crate::device::KeyboardClassifier;
use crate::keyboard::{KeyEventRecord, PerKeyState, Verdict};
use std::time::Duration;

/// Why the filter reached its verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// OS auto-repeat, never chatter
    Repeat,
    /// Device class outside the monitoring scope
    Unmonitored,
    /// No earlier accepted event of this kind
    FirstSighting,
    /// Timestamp earlier than the last accepted one
    ClockRegression,
    /// Gap at or above the threshold
    Spaced,
    /// Gap below the threshold
    Chatter,
}

/// Full result of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub reason: Reason,
    /// Gap to the last accepted event of the same kind
    pub gap: Option<Duration>,
    /// Threshold the gap was compared against
    pub threshold: Duration,
}

impl Evaluation {
    fn accept(reason: Reason, gap: Option<Duration>, threshold: Duration) -> Self {
        Self {
            verdict: Verdict::Accept,
            reason,
            gap,
            threshold,
        }
    }
}

/// Per-key debounce filter.
///
/// Press and release events are tracked in separate slots, so a quick
/// press/release pair is never compared across kinds.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatterFilter;

impl ChatterFilter {
    pub fn new() -> Self {
        Self
    }

    /// Accept or drop `record`, updating the key's state
    pub fn evaluate(&self, record: &KeyEventRecord, config: &Config, state: &mut PerKeyState) -> Verdict {
        self.evaluate_detailed(record, config, state).verdict
    }

    pub fn evaluate_detailed(
        &self,
        record: &KeyEventRecord,
        config: &Config,
        state: &mut PerKeyState,
    ) -> Evaluation {
        let threshold = config
            .thresholds
            .for_key(record.device_class, record.identity.key);

        if record.synthetic_repeat {
            return Evaluation::accept(Reason::Repeat, None, threshold);
        }
        if !KeyboardClassifier::should_monitor(record.device_class, &config.scope) {
            return Evaluation::accept(Reason::Unmonitored, None, threshold);
        }

        let kind = record.event_type;
        let now = record.timestamp;
        state.note_seen(now);

        let Some(last) = state.last_accepted(kind) else {
            state.record_accept(kind, now);
            return Evaluation::accept(Reason::FirstSighting, None, threshold);
        };

        match now.checked_duration_since(last) {
            None => {
                state.record_accept(kind, now);
                Evaluation::accept(Reason::ClockRegression, None, threshold)
            }
            Some(gap) if gap < threshold => {
                state.record_suppression();
                Evaluation {
                    verdict: Verdict::Drop,
                    reason: Reason::Chatter,
                    gap: Some(gap),
                    threshold,
                }
            }
            Some(gap) => {
                state.record_accept(kind, now);
                Evaluation::accept(Reason::Spaced, Some(gap), threshold)
            }
        }
    }
}

//! Shared test utilities for the filter modules
//!
//! Provides constructors for records at explicit timestamps.

use crate::device::DeviceClass;
use crate::keyboard::{KeyCode, KeyEventRecord, KeyEventType, KeyIdentity};
use std::time::{Duration, Instant};

/// Default device used in tests
pub const DEFAULT_DEVICE: u64 = 1;

/// Default key code used in tests (KeyCode 30 = 'A')
pub const DEFAULT_KEY: KeyCode = KeyCode(30);

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Creates a record with full control over all parameters.
pub fn make_record(
    key: KeyCode,
    event_type: KeyEventType,
    class: DeviceClass,
    timestamp: Instant,
) -> KeyEventRecord {
    KeyEventRecord::new(KeyIdentity::new(DEFAULT_DEVICE, key), event_type, timestamp, class)
}

/// Press on an external wired keyboard
pub fn press_at(key: KeyCode, timestamp: Instant) -> KeyEventRecord {
    make_record(key, KeyEventType::Press, DeviceClass::ExternalWired, timestamp)
}

/// Release on an external wired keyboard
pub fn release_at(key: KeyCode, timestamp: Instant) -> KeyEventRecord {
    make_record(key, KeyEventType::Release, DeviceClass::ExternalWired, timestamp)
}

/// OS auto-repeat press
pub fn repeat_at(key: KeyCode, timestamp: Instant) -> KeyEventRecord {
    press_at(key, timestamp).repeat()
}

/// Press on a keyboard of the given class
pub fn press_on(key: KeyCode, class: DeviceClass, timestamp: Instant) -> KeyEventRecord {
    make_record(key, KeyEventType::Press, class, timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn press_at_uses_provided_timestamp() {
        let ts = Instant::now();
        let record = press_at(KeyCode(30), ts);
        assert_eq!(record.timestamp, ts);
        assert_eq!(record.event_type, KeyEventType::Press);
        assert!(!record.synthetic_repeat);
    }

    #[test]
    fn repeat_at_sets_flag() {
        let record = repeat_at(KeyCode(31), Instant::now());
        assert!(record.synthetic_repeat);
        assert_eq!(record.identity.key, KeyCode(31));
    }
}

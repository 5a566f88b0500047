//! Keyboard event types consumed by the chatter filter

use super::KeyCode;
use crate::device::DeviceClass;
use std::fmt;
use std::time::Instant;

/// Opaque identifier of the keyboard that produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u64);

impl From<u64> for DeviceId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev#{}", self.0)
    }
}

/// A physical key on a specific keyboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyIdentity {
    pub device: DeviceId,
    pub key: KeyCode,
}

impl KeyIdentity {
    pub fn new(device: impl Into<DeviceId>, key: impl Into<KeyCode>) -> Self {
        Self {
            device: device.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for KeyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.key)
    }
}

/// Type of keyboard event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyEventType {
    /// Key was pressed down
    Press,
    /// Key was released
    Release,
}

impl KeyEventType {
    /// Slot index for per-kind bookkeeping
    pub(crate) fn index(self) -> usize {
        match self {
            KeyEventType::Press => 0,
            KeyEventType::Release => 1,
        }
    }
}

/// A keyboard event as seen by the filter.
///
/// Records are short-lived: filled from a hardware event, evaluated, then
/// handed back to the [`EventPool`](crate::pool::EventPool).
#[derive(Debug, Clone)]
pub struct KeyEventRecord {
    /// The physical key
    pub identity: KeyIdentity,
    /// Type of event (press/release)
    pub event_type: KeyEventType,
    /// When the event occurred
    pub timestamp: Instant,
    /// Class of the originating keyboard
    pub device_class: DeviceClass,
    /// OS auto-repeat while the key is held
    pub synthetic_repeat: bool,
}

impl KeyEventRecord {
    pub fn new(
        identity: KeyIdentity,
        event_type: KeyEventType,
        timestamp: Instant,
        device_class: DeviceClass,
    ) -> Self {
        Self {
            identity,
            event_type,
            timestamp,
            device_class,
            synthetic_repeat: false,
        }
    }

    /// Mark the record as an OS auto-repeat
    pub fn repeat(mut self) -> Self {
        self.synthetic_repeat = true;
        self
    }

    /// Empty record used to seed pooled buffers
    pub(crate) fn blank(epoch: Instant) -> Self {
        Self::new(
            KeyIdentity::new(0u64, 0u16),
            KeyEventType::Press,
            epoch,
            DeviceClass::ExternalWired,
        )
    }
}

/// An event as delivered by an interception collaborator.
///
/// Collaborators reading several devices funnel these through a single
/// channel so events of the same key keep their order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareEvent {
    pub device: DeviceId,
    pub key: KeyCode,
    pub event_type: KeyEventType,
    pub synthetic_repeat: bool,
    /// Hardware timestamp, if the source provides one
    pub timestamp: Option<Instant>,
}

impl HardwareEvent {
    pub fn new(device: impl Into<DeviceId>, key: impl Into<KeyCode>, event_type: KeyEventType) -> Self {
        Self {
            device: device.into(),
            key: key.into(),
            event_type,
            synthetic_repeat: false,
            timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: Instant) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn repeat(mut self) -> Self {
        self.synthetic_repeat = true;
        self
    }

    pub fn identity(&self) -> KeyIdentity {
        KeyIdentity {
            device: self.device,
            key: self.key,
        }
    }
}

/// Decision for a single event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Forward the event unchanged
    Accept,
    /// Discard the event as chatter
    Drop,
}

impl Verdict {
    pub fn is_accept(self) -> bool {
        self == Verdict::Accept
    }

    pub fn is_drop(self) -> bool {
        self == Verdict::Drop
    }
}

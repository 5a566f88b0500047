//! Keyboard event types, key names and per-key state

mod event;
mod state;
pub mod keymap;

#[cfg(target_os = "linux")]
mod evdev_listener;

pub use event::{DeviceId, HardwareEvent, KeyEventRecord, KeyEventType, KeyIdentity, Verdict};
pub use keymap::{key_name, KeyCode};
pub use state::{KeyStateTable, PerKeyState, RecentRing, MAX_SUPPRESSION_STREAK, RECENT_DEPTH};

#[cfg(target_os = "linux")]
pub use evdev_listener::{evdev_status, EvdevListener, ListenerError};

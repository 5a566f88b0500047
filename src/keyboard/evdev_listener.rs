//! Raw evdev keyboard reader for Linux
//!
//! Reads key events straight from `/dev/input/event*` and forwards them as
//! [`HardwareEvent`]s over a channel, so events from every keyboard reach
//! the engine through one ordered queue. Kernel timestamps are kept: the
//! filter needs the time the switch fired, not the time we got around to
//! reading it.

use super::{DeviceId, HardwareEvent, KeyCode, KeyEventType};
use log::warn;
use nix::libc;
use std::fs::{self, File};
use std::io::{self, Read};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Error type for evdev operations
#[derive(Debug, Error)]
pub enum ListenerError {
    /// No keyboard devices found
    #[error("No keyboard devices found")]
    NoDevices,
    /// Permission denied accessing device
    #[error("Permission denied accessing {0}")]
    PermissionDenied(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Device enumeration failed
    #[error("Device enumeration failed: {0}")]
    EnumerationFailed(String),
}

/// A raw input event from the kernel
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct InputEvent {
    tv_sec: i64,
    tv_usec: i64,
    event_type: u16,
    code: u16,
    value: i32,
}

const EV_KEY: u16 = 0x01;
const INPUT_EVENT_SIZE: usize = std::mem::size_of::<InputEvent>();

/// Re-anchor when kernel and monotonic time disagree by more than this
const MAX_CLOCK_SKEW: Duration = Duration::from_secs(1);

/// Event node number of `/dev/input/eventN`
fn device_id_of(path: &Path) -> Option<DeviceId> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix("event"))
        .and_then(|n| n.parse().ok())
        .map(DeviceId)
}

/// Find all keyboard input devices
fn find_keyboard_devices() -> Result<Vec<PathBuf>, ListenerError> {
    let input_dir = PathBuf::from("/dev/input");
    if !input_dir.exists() {
        return Err(ListenerError::EnumerationFailed(
            "/dev/input does not exist".to_string(),
        ));
    }

    let mut keyboards: Vec<PathBuf> = fs::read_dir(&input_dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| device_id_of(path).is_some() && is_keyboard_device(path))
        .collect();
    keyboards.sort();

    if keyboards.is_empty() {
        return Err(ListenerError::NoDevices);
    }

    Ok(keyboards)
}

/// Check if a device is a keyboard by examining /sys/class/input
fn is_keyboard_device(device_path: &Path) -> bool {
    let Some(name) = device_path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };

    // Key capability bitmap: a keyboard reports most of the alphanumeric block
    let caps_path = format!("/sys/class/input/{}/device/capabilities/key", name);
    if let Ok(caps) = fs::read_to_string(&caps_path) {
        let total_bits: u32 = caps
            .split_whitespace()
            .filter_map(|hex| u64::from_str_radix(hex, 16).ok())
            .map(|n| n.count_ones())
            .sum();
        return total_bits > 50;
    }

    let name_path = format!("/sys/class/input/{}/device/name", name);
    if let Ok(dev_name) = fs::read_to_string(&name_path) {
        let lower = dev_name.to_lowercase();
        return lower.contains("keyboard") || lower.contains("kbd");
    }
    false
}

/// Maps kernel event times onto `Instant`
#[derive(Debug, Default)]
struct KernelClock {
    anchor: Option<(i64, Instant)>,
}

impl KernelClock {
    fn to_instant(&mut self, kernel_us: i64, now: Instant) -> Instant {
        if let Some((anchor_us, anchor)) = self.anchor {
            let mapped = if kernel_us >= anchor_us {
                anchor.checked_add(Duration::from_micros((kernel_us - anchor_us) as u64))
            } else {
                anchor.checked_sub(Duration::from_micros((anchor_us - kernel_us) as u64))
            };
            if let Some(ts) = mapped {
                let skew = if ts > now {
                    ts.duration_since(now)
                } else {
                    now.duration_since(ts)
                };
                if skew <= MAX_CLOCK_SKEW {
                    return ts;
                }
            }
        }
        // First event, or the wall clock jumped: re-anchor on this event
        self.anchor = Some((kernel_us, now));
        now
    }
}

/// Evdev-based keyboard reader
pub struct EvdevListener {
    devices: Vec<(DeviceId, File)>,
    device_paths: Vec<PathBuf>,
    event_tx: mpsc::Sender<HardwareEvent>,
    buffer: Vec<u8>,
    clock: KernelClock,
}

/// Switch a device file to non-blocking reads
fn set_nonblocking(file: &File) -> io::Result<()> {
    let fd = file.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn open_devices(paths: &[PathBuf]) -> Result<Vec<(DeviceId, File)>, ListenerError> {
    let mut devices = Vec::new();
    for path in paths {
        let Some(id) = device_id_of(path) else {
            continue;
        };
        match File::open(path) {
            Ok(file) => {
                // A blocking fd would stall the poll loop
                if let Err(e) = set_nonblocking(&file) {
                    warn!("skipping {}: {}", path.display(), e);
                    continue;
                }
                devices.push((id, file));
            }
            // Skip devices we can't access
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => continue,
            Err(e) => return Err(ListenerError::Io(e)),
        }
    }

    if devices.is_empty() {
        return Err(ListenerError::PermissionDenied(
            "Cannot access any keyboard devices. Try running with sudo or add user to 'input' group.".to_string(),
        ));
    }
    Ok(devices)
}

impl EvdevListener {
    /// Create a new evdev listener
    pub fn new(event_tx: mpsc::Sender<HardwareEvent>) -> Result<Self, ListenerError> {
        let device_paths = find_keyboard_devices()?;
        let devices = open_devices(&device_paths)?;

        Ok(Self {
            devices,
            device_paths,
            event_tx,
            buffer: vec![0u8; INPUT_EVENT_SIZE * 64],
            clock: KernelClock::default(),
        })
    }

    /// Try to create an evdev listener, return None if not available
    pub fn try_new(event_tx: mpsc::Sender<HardwareEvent>) -> Option<Self> {
        Self::new(event_tx).ok()
    }

    /// Ids of the opened devices
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.iter().map(|(id, _)| *id).collect()
    }

    pub fn device_paths(&self) -> &[PathBuf] {
        &self.device_paths
    }

    /// Re-enumerate keyboards. Returns `true` when the set changed.
    pub fn rescan(&mut self) -> Result<bool, ListenerError> {
        let paths = match find_keyboard_devices() {
            Ok(paths) => paths,
            Err(ListenerError::NoDevices) => Vec::new(),
            Err(e) => return Err(e),
        };
        if paths == self.device_paths {
            return Ok(false);
        }
        self.devices = if paths.is_empty() {
            Vec::new()
        } else {
            open_devices(&paths)?
        };
        self.device_paths = paths;
        Ok(true)
    }

    /// Drain pending events from every device.
    /// Returns the number of events forwarded.
    pub fn poll(&mut self) -> usize {
        let now = Instant::now();
        let mut event_count = 0;

        for (device, file) in &mut self.devices {
            loop {
                match file.read(&mut self.buffer) {
                    Ok(bytes_read) if bytes_read >= INPUT_EVENT_SIZE => {
                        for chunk in self.buffer[..bytes_read].chunks_exact(INPUT_EVENT_SIZE) {
                            let input_event: InputEvent =
                                unsafe { std::ptr::read_unaligned(chunk.as_ptr() as *const InputEvent) };

                            if input_event.event_type != EV_KEY {
                                continue;
                            }

                            // 0 = release, 1 = press, 2 = auto-repeat
                            let (event_type, repeat) = match input_event.value {
                                0 => (KeyEventType::Release, false),
                                1 => (KeyEventType::Press, false),
                                2 => (KeyEventType::Press, true),
                                _ => continue,
                            };

                            let kernel_us = input_event.tv_sec * 1_000_000 + input_event.tv_usec;
                            let mut event =
                                HardwareEvent::new(*device, KeyCode::new(input_event.code), event_type)
                                    .at(self.clock.to_instant(kernel_us, now));
                            if repeat {
                                event = event.repeat();
                            }
                            if self.event_tx.send(event).is_ok() {
                                event_count += 1;
                            }
                        }
                    }
                    Ok(_) => break,
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    // Device unplugged or unreadable; rescan picks it up
                    Err(_) => break,
                }
            }
        }

        event_count
    }
}

/// Get a status message about evdev availability
pub fn evdev_status() -> String {
    match find_keyboard_devices() {
        Ok(devices) => format!("{} keyboard device(s) found", devices.len()),
        Err(ListenerError::NoDevices) => "No keyboard devices found".to_string(),
        Err(ListenerError::PermissionDenied(_)) => {
            "Permission denied - run with sudo or add user to 'input' group".to_string()
        }
        Err(e) => format!("Error: {}", e),
    }
}

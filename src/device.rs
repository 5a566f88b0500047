//! Keyboard device classification
//!
//! Decides which class a keyboard belongs to (built-in, wired, wireless)
//! and whether the filter should watch it at all. Classifications are
//! cached per device and dropped whenever the device list changes.

use crate::config::ScopeConfig;
use crate::keyboard::DeviceId;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Class of keyboard that produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceClass {
    /// Built-in laptop keyboard
    Internal,
    /// External keyboard on a cable (USB, PS/2 adapter)
    ExternalWired,
    /// External keyboard over Bluetooth or a radio receiver
    ExternalWireless,
    /// Not a physical keyboard we filter (virtual/injected devices)
    Unsupported,
}

impl DeviceClass {
    pub fn all() -> &'static [DeviceClass] {
        &[
            DeviceClass::Internal,
            DeviceClass::ExternalWired,
            DeviceClass::ExternalWireless,
            DeviceClass::Unsupported,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeviceClass::Internal => "internal",
            DeviceClass::ExternalWired => "external-wired",
            DeviceClass::ExternalWireless => "external-wireless",
            DeviceClass::Unsupported => "unsupported",
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, DeviceClass::ExternalWired | DeviceClass::ExternalWireless)
    }
}

/// Cached classification of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceClassification {
    pub device: DeviceId,
    pub class: DeviceClass,
    /// The probe could not tell; `class` is the fallback
    pub assumed: bool,
}

/// Source of truth for what kind of keyboard a device is.
///
/// Returns `None` when the device cannot be identified.
pub trait DeviceProbe {
    fn probe(&self, device: DeviceId) -> Option<DeviceClass>;
}

/// Probe backed by a fixed table, for collaborators that already know
/// their devices (and for tests)
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    table: HashMap<DeviceId, DeviceClass>,
}

impl StaticProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, device: impl Into<DeviceId>, class: DeviceClass) -> Self {
        self.table.insert(device.into(), class);
        self
    }

    pub fn insert(&mut self, device: impl Into<DeviceId>, class: DeviceClass) {
        self.table.insert(device.into(), class);
    }
}

impl DeviceProbe for StaticProbe {
    fn probe(&self, device: DeviceId) -> Option<DeviceClass> {
        self.table.get(&device).copied()
    }
}

// Linux input bus types (linux/input.h)
const BUS_USB: u16 = 0x03;
const BUS_BLUETOOTH: u16 = 0x05;
const BUS_VIRTUAL: u16 = 0x06;
const BUS_I8042: u16 = 0x11;
const BUS_I2C: u16 = 0x18;
const BUS_HOST: u16 = 0x19;
const BUS_SPI: u16 = 0x1C;

/// Probe reading `/sys/class/input/event<N>/device`.
///
/// `DeviceId(N)` maps to the evdev node `event<N>`.
#[derive(Debug, Clone)]
pub struct SysfsProbe {
    root: PathBuf,
}

impl Default for SysfsProbe {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/sys/class/input"),
        }
    }
}

impl SysfsProbe {
    /// Use a different sysfs root (tests, containers)
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_attr(&self, device: DeviceId, attr: &str) -> Option<String> {
        let path = self
            .root
            .join(format!("event{}", device.0))
            .join("device")
            .join(attr);
        fs::read_to_string(path).ok().map(|s| s.trim().to_string())
    }
}

impl DeviceProbe for SysfsProbe {
    fn probe(&self, device: DeviceId) -> Option<DeviceClass> {
        let bustype = self.read_attr(device, "id/bustype")?;
        let bus = u16::from_str_radix(&bustype, 16).ok()?;
        let name = self.read_attr(device, "name").unwrap_or_default();
        classify_bus(bus, &name)
    }
}

/// Map a bus type and device name to a keyboard class
pub fn classify_bus(bus: u16, name: &str) -> Option<DeviceClass> {
    match bus {
        BUS_I8042 | BUS_I2C | BUS_HOST | BUS_SPI => Some(DeviceClass::Internal),
        BUS_BLUETOOTH => Some(DeviceClass::ExternalWireless),
        // Unifying-style receivers enumerate as USB
        BUS_USB if is_wireless_name(name) => Some(DeviceClass::ExternalWireless),
        BUS_USB => Some(DeviceClass::ExternalWired),
        BUS_VIRTUAL => Some(DeviceClass::Unsupported),
        _ => None,
    }
}

fn is_wireless_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    ["wireless", "receiver", "unifying", "dongle", "2.4g"]
        .iter()
        .any(|hint| lower.contains(hint))
}

/// Classifies devices and caches the result until the device list changes
pub struct KeyboardClassifier {
    probe: Box<dyn DeviceProbe + Send>,
    cache: HashMap<DeviceId, DeviceClassification>,
    generation: u64,
}

impl KeyboardClassifier {
    pub fn new(probe: impl DeviceProbe + Send + 'static) -> Self {
        Self {
            probe: Box::new(probe),
            cache: HashMap::new(),
            generation: 0,
        }
    }

    /// Classify a device, consulting the probe only on a cache miss.
    ///
    /// Devices the probe cannot identify are treated as external wired
    /// keyboards so filtering stays active.
    pub fn classify(&mut self, device: DeviceId) -> DeviceClassification {
        if let Some(cached) = self.cache.get(&device) {
            return *cached;
        }

        let classification = match self.probe.probe(device) {
            Some(class) => DeviceClassification {
                device,
                class,
                assumed: false,
            },
            None => {
                debug!("unknown keyboard {}, assuming external-wired", device);
                DeviceClassification {
                    device,
                    class: DeviceClass::ExternalWired,
                    assumed: true,
                }
            }
        };
        self.cache.insert(device, classification);
        classification
    }

    /// Whether events from this class go through the filter
    pub fn should_monitor(class: DeviceClass, scope: &ScopeConfig) -> bool {
        match class {
            DeviceClass::Internal => !scope.ignore_internal,
            DeviceClass::ExternalWired | DeviceClass::ExternalWireless => !scope.ignore_external,
            DeviceClass::Unsupported => false,
        }
    }

    /// Forget every cached classification (hot-plug)
    pub fn invalidate(&mut self) {
        if !self.cache.is_empty() {
            info!(
                "device list changed, dropping {} cached classification(s)",
                self.cache.len()
            );
        }
        self.cache.clear();
        self.generation += 1;
    }

    /// Forget one device's classification
    pub fn invalidate_device(&mut self, device: DeviceId) {
        self.cache.remove(&device);
    }

    /// Number of times the cache has been invalidated
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cached(&self) -> impl Iterator<Item = &DeviceClassification> {
        self.cache.values()
    }
}

impl Default for KeyboardClassifier {
    fn default() -> Self {
        Self::new(StaticProbe::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn scope(ignore_internal: bool, ignore_external: bool) -> ScopeConfig {
        ScopeConfig {
            ignore_internal,
            ignore_external,
        }
    }

    #[test]
    fn bus_types_map_to_classes() {
        assert_eq!(classify_bus(0x11, "AT Translated Set 2 keyboard"), Some(DeviceClass::Internal));
        assert_eq!(classify_bus(0x03, "Keychron K2"), Some(DeviceClass::ExternalWired));
        assert_eq!(classify_bus(0x05, "MX Keys"), Some(DeviceClass::ExternalWireless));
        assert_eq!(
            classify_bus(0x03, "Logitech USB Receiver"),
            Some(DeviceClass::ExternalWireless)
        );
        assert_eq!(classify_bus(0x06, "uinput"), Some(DeviceClass::Unsupported));
        assert_eq!(classify_bus(0x42, "mystery"), None);
    }

    #[test]
    fn unknown_device_defaults_to_wired_and_monitored() {
        let mut classifier = KeyboardClassifier::default();
        let c = classifier.classify(DeviceId(9));
        assert_eq!(c.class, DeviceClass::ExternalWired);
        assert!(c.assumed);
        assert!(KeyboardClassifier::should_monitor(c.class, &ScopeConfig::default()));
    }

    #[test]
    fn classification_is_cached_until_invalidated() {
        let probe = StaticProbe::new().with(1u64, DeviceClass::Internal);
        let mut classifier = KeyboardClassifier::new(probe);
        assert_eq!(classifier.classify(DeviceId(1)).class, DeviceClass::Internal);
        assert_eq!(classifier.cached().count(), 1);

        classifier.invalidate();
        assert_eq!(classifier.cached().count(), 0);
        assert_eq!(classifier.generation(), 1);
    }

    #[test]
    fn monitoring_scope_flags() {
        use DeviceClass::*;
        assert!(KeyboardClassifier::should_monitor(Internal, &scope(false, false)));
        assert!(!KeyboardClassifier::should_monitor(Internal, &scope(true, false)));
        assert!(KeyboardClassifier::should_monitor(ExternalWired, &scope(true, false)));
        assert!(!KeyboardClassifier::should_monitor(ExternalWireless, &scope(false, true)));
        assert!(!KeyboardClassifier::should_monitor(Unsupported, &scope(false, false)));
    }

    #[test]
    fn sysfs_probe_reads_bustype() {
        let root = env::temp_dir().join(format!("dechatter-sysfs-{}", std::process::id()));
        let dev = root.join("event3").join("device");
        fs::create_dir_all(dev.join("id")).unwrap();
        fs::write(dev.join("id").join("bustype"), "0005\n").unwrap();
        fs::write(dev.join("name"), "Magic Keyboard\n").unwrap();

        let probe = SysfsProbe::with_root(&root);
        assert_eq!(probe.probe(DeviceId(3)), Some(DeviceClass::ExternalWireless));
        assert_eq!(probe.probe(DeviceId(4)), None);

        let _ = fs::remove_dir_all(&root);
    }
}

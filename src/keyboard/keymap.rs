//! Key code definitions and human-readable key names

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// Represents a physical key code (Linux evdev scancode numbering)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyCode(pub u16);

impl KeyCode {
    pub fn new(code: u16) -> Self {
        Self(code)
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Display name of the key, or "Unknown"
    pub fn name(&self) -> &'static str {
        key_name(*self)
    }
}

impl From<u16> for KeyCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

/// Names for the standard US layout, used in reports and log lines
static KEY_NAMES: LazyLock<HashMap<u16, &'static str>> = LazyLock::new(|| {
    let entries: &[(u16, &'static str)] = &[
        // Function row
        (1, "Escape"),
        (59, "F1"),
        (60, "F2"),
        (61, "F3"),
        (62, "F4"),
        (63, "F5"),
        (64, "F6"),
        (65, "F7"),
        (66, "F8"),
        (67, "F9"),
        (68, "F10"),
        (87, "F11"),
        (88, "F12"),
        // Number row
        (41, "Grave"),
        (2, "1"),
        (3, "2"),
        (4, "3"),
        (5, "4"),
        (6, "5"),
        (7, "6"),
        (8, "7"),
        (9, "8"),
        (10, "9"),
        (11, "0"),
        (12, "Minus"),
        (13, "Equals"),
        (14, "Backspace"),
        // Letter rows
        (15, "Tab"),
        (16, "Q"),
        (17, "W"),
        (18, "E"),
        (19, "R"),
        (20, "T"),
        (21, "Y"),
        (22, "U"),
        (23, "I"),
        (24, "O"),
        (25, "P"),
        (26, "LeftBracket"),
        (27, "RightBracket"),
        (43, "Backslash"),
        (58, "CapsLock"),
        (30, "A"),
        (31, "S"),
        (32, "D"),
        (33, "F"),
        (34, "G"),
        (35, "H"),
        (36, "J"),
        (37, "K"),
        (38, "L"),
        (39, "Semicolon"),
        (40, "Apostrophe"),
        (28, "Enter"),
        (42, "LeftShift"),
        (44, "Z"),
        (45, "X"),
        (46, "C"),
        (47, "V"),
        (48, "B"),
        (49, "N"),
        (50, "M"),
        (51, "Comma"),
        (52, "Period"),
        (53, "Slash"),
        (54, "RightShift"),
        // Modifiers and space
        (29, "LeftCtrl"),
        (125, "LeftMeta"),
        (56, "LeftAlt"),
        (57, "Space"),
        (100, "RightAlt"),
        (126, "RightMeta"),
        (127, "Menu"),
        (97, "RightCtrl"),
        // Navigation
        (103, "Up"),
        (105, "Left"),
        (108, "Down"),
        (106, "Right"),
        (110, "Insert"),
        (102, "Home"),
        (104, "PageUp"),
        (111, "Delete"),
        (107, "End"),
        (109, "PageDown"),
        // Numpad
        (82, "Numpad0"),
        (79, "Numpad1"),
        (80, "Numpad2"),
        (81, "Numpad3"),
        (75, "Numpad4"),
        (76, "Numpad5"),
        (77, "Numpad6"),
        (71, "Numpad7"),
        (72, "Numpad8"),
        (73, "Numpad9"),
        (74, "NumpadSubtract"),
        (78, "NumpadAdd"),
        (98, "NumpadDivide"),
        (55, "NumpadMultiply"),
        (96, "NumpadEnter"),
    ];
    entries.iter().copied().collect()
});

/// Get the display name of a key code
pub fn key_name(code: KeyCode) -> &'static str {
    KEY_NAMES.get(&code.0).copied().unwrap_or("Unknown")
}

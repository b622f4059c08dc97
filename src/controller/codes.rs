//! Raw input encodings shared by every event source.
//!
//! Source flags, key codes and axis ids follow the mobile input stack's
//! integer encodings, so events from the device's own input stack and from an
//! externally attached controller (see [`crate::platform::desktop`]) share one
//! representation before classification.

use std::fmt;

/// Bitmask describing which input capabilities produced an event or a device.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SourceFlags(pub u32);

impl SourceFlags {
    pub const NONE: SourceFlags = SourceFlags(0);
    pub const KEYBOARD: SourceFlags = SourceFlags(0x0000_0101);
    pub const DPAD: SourceFlags = SourceFlags(0x0000_0201);
    pub const GAMEPAD: SourceFlags = SourceFlags(0x0000_0401);
    pub const JOYSTICK: SourceFlags = SourceFlags(0x0100_0010);

    /// True when every bit of `capability` is set. Capabilities share class
    /// bits, so a partial overlap is not enough.
    pub fn has(self, capability: SourceFlags) -> bool {
        self.0 & capability.0 == capability.0
    }

    pub fn union(self, other: SourceFlags) -> SourceFlags {
        SourceFlags(self.0 | other.0)
    }
}

impl std::ops::BitOr for SourceFlags {
    type Output = SourceFlags;

    fn bitor(self, rhs: SourceFlags) -> SourceFlags {
        self.union(rhs)
    }
}

impl fmt::Debug for SourceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceFlags({:#010x})", self.0)
    }
}

/// Platform key code of a key event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyCode(pub i32);

impl KeyCode {
    pub const DPAD_UP: KeyCode = KeyCode(19);
    pub const DPAD_DOWN: KeyCode = KeyCode(20);
    pub const DPAD_LEFT: KeyCode = KeyCode(21);
    pub const DPAD_RIGHT: KeyCode = KeyCode(22);
    pub const DPAD_CENTER: KeyCode = KeyCode(23);
    pub const BUTTON_A: KeyCode = KeyCode(96);
    pub const BUTTON_B: KeyCode = KeyCode(97);
    pub const BUTTON_C: KeyCode = KeyCode(98);
    pub const BUTTON_X: KeyCode = KeyCode(99);
    pub const BUTTON_Y: KeyCode = KeyCode(100);
    pub const BUTTON_Z: KeyCode = KeyCode(101);
    pub const BUTTON_L1: KeyCode = KeyCode(102);
    pub const BUTTON_R1: KeyCode = KeyCode(103);
    pub const BUTTON_L2: KeyCode = KeyCode(104);
    pub const BUTTON_R2: KeyCode = KeyCode(105);
    pub const BUTTON_THUMBL: KeyCode = KeyCode(106);
    pub const BUTTON_THUMBR: KeyCode = KeyCode(107);
    pub const BUTTON_START: KeyCode = KeyCode(108);
    pub const BUTTON_SELECT: KeyCode = KeyCode(109);
    pub const BUTTON_MODE: KeyCode = KeyCode(110);
    pub const BUTTON_1: KeyCode = KeyCode(188);
    pub const BUTTON_16: KeyCode = KeyCode(203);

    /// Face, shoulder, thumb, menu and generic numbered gamepad buttons.
    pub fn is_gamepad_button(self) -> bool {
        (Self::BUTTON_A.0..=Self::BUTTON_MODE.0).contains(&self.0)
            || (Self::BUTTON_1.0..=Self::BUTTON_16.0).contains(&self.0)
    }

    pub fn is_dpad(self) -> bool {
        (Self::DPAD_UP.0..=Self::DPAD_CENTER.0).contains(&self.0)
    }
}

/// Axis id of a motion event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AxisCode(pub u16);

impl AxisCode {
    pub const X: AxisCode = AxisCode(0);
    pub const Y: AxisCode = AxisCode(1);
    pub const Z: AxisCode = AxisCode(11);
    pub const RZ: AxisCode = AxisCode(14);
    pub const HAT_X: AxisCode = AxisCode(15);
    pub const HAT_Y: AxisCode = AxisCode(16);
    pub const LTRIGGER: AxisCode = AxisCode(17);
    pub const RTRIGGER: AxisCode = AxisCode(18);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyAction {
    Down,
    Up,
}

/// A motion sample: every axis the device reported for this event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawMotionEvent {
    pub source: SourceFlags,
    pub device_id: i32,
    pub axes: Vec<(AxisCode, f32)>,
}

impl RawMotionEvent {
    pub fn new(source: SourceFlags, device_id: i32) -> Self {
        Self {
            source,
            device_id,
            axes: Vec::new(),
        }
    }

    pub fn with_axis(mut self, axis: AxisCode, value: f32) -> Self {
        self.set_axis(axis, value);
        self
    }

    pub fn set_axis(&mut self, axis: AxisCode, value: f32) {
        match self.axes.iter_mut().find(|(code, _)| *code == axis) {
            Some(slot) => slot.1 = value,
            None => self.axes.push((axis, value)),
        }
    }

    /// Axes the device did not report read as centered.
    pub fn axis_value(&self, axis: AxisCode) -> f32 {
        self.axes
            .iter()
            .find(|(code, _)| *code == axis)
            .map(|(_, value)| *value)
            .unwrap_or(0.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RawKeyEvent {
    pub source: SourceFlags,
    pub device_id: i32,
    pub key_code: KeyCode,
    pub action: KeyAction,
    /// Auto-repeat counter of a held key; 0 for the physical transition.
    pub repeat_count: u32,
}

impl RawKeyEvent {
    pub fn down(source: SourceFlags, device_id: i32, key_code: KeyCode) -> Self {
        Self {
            source,
            device_id,
            key_code,
            action: KeyAction::Down,
            repeat_count: 0,
        }
    }

    pub fn up(source: SourceFlags, device_id: i32, key_code: KeyCode) -> Self {
        Self {
            action: KeyAction::Up,
            ..Self::down(source, device_id, key_code)
        }
    }

    pub fn is_repeat(&self) -> bool {
        self.repeat_count > 0
    }
}

/// Anything the platform's input-delivery path hands to a capture session.
#[derive(Clone, Debug, PartialEq)]
pub enum RawInputEvent {
    Motion(RawMotionEvent),
    Key(RawKeyEvent),
}

impl RawInputEvent {
    pub fn source(&self) -> SourceFlags {
        match self {
            RawInputEvent::Motion(motion) => motion.source,
            RawInputEvent::Key(key) => key.source,
        }
    }

    pub fn device_id(&self) -> i32 {
        match self {
            RawInputEvent::Motion(motion) => motion.device_id,
            RawInputEvent::Key(key) => key.device_id,
        }
    }
}

//! Event Normalizer
//!
//! Turns classified raw events into the canonical message schema: a complete
//! [`AnalogFrame`] for every gamepad motion event and one [`ButtonEvent`] per
//! recognized key transition.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::controller::classifier::{classify, InputClass};
use crate::controller::codes::{AxisCode, KeyCode, RawMotionEvent, SourceFlags};

/// Stick and hat values with magnitude at or below this are reported as 0.0.
pub const DEFAULT_DEADZONE: f32 = 0.1;

// Named gamepad buttons with their stable wire names
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GamepadButton {
    #[serde(rename = "BUTTON_A")]
    A,
    #[serde(rename = "BUTTON_B")]
    B,
    #[serde(rename = "BUTTON_X")]
    X,
    #[serde(rename = "BUTTON_Y")]
    Y,
    #[serde(rename = "BUTTON_L1")]
    L1,
    #[serde(rename = "BUTTON_R1")]
    R1,
    #[serde(rename = "BUTTON_L2")]
    L2,
    #[serde(rename = "BUTTON_R2")]
    R2,
    #[serde(rename = "BUTTON_LEFT_STICK")]
    LeftStick,
    #[serde(rename = "BUTTON_RIGHT_STICK")]
    RightStick,
    #[serde(rename = "BUTTON_START")]
    Start,
    #[serde(rename = "BUTTON_SELECT")]
    Select,
    #[serde(rename = "DPAD_UP")]
    DpadUp,
    #[serde(rename = "DPAD_DOWN")]
    DpadDown,
    #[serde(rename = "DPAD_LEFT")]
    DpadLeft,
    #[serde(rename = "DPAD_RIGHT")]
    DpadRight,
}

impl GamepadButton {
    pub const ALL: [GamepadButton; 16] = [
        GamepadButton::A,
        GamepadButton::B,
        GamepadButton::X,
        GamepadButton::Y,
        GamepadButton::L1,
        GamepadButton::R1,
        GamepadButton::L2,
        GamepadButton::R2,
        GamepadButton::LeftStick,
        GamepadButton::RightStick,
        GamepadButton::Start,
        GamepadButton::Select,
        GamepadButton::DpadUp,
        GamepadButton::DpadDown,
        GamepadButton::DpadLeft,
        GamepadButton::DpadRight,
    ];

    pub fn from_key_code(code: KeyCode) -> Option<GamepadButton> {
        let button = match code {
            KeyCode::BUTTON_A => GamepadButton::A,
            KeyCode::BUTTON_B => GamepadButton::B,
            KeyCode::BUTTON_X => GamepadButton::X,
            KeyCode::BUTTON_Y => GamepadButton::Y,
            KeyCode::BUTTON_L1 => GamepadButton::L1,
            KeyCode::BUTTON_R1 => GamepadButton::R1,
            KeyCode::BUTTON_L2 => GamepadButton::L2,
            KeyCode::BUTTON_R2 => GamepadButton::R2,
            KeyCode::BUTTON_THUMBL => GamepadButton::LeftStick,
            KeyCode::BUTTON_THUMBR => GamepadButton::RightStick,
            KeyCode::BUTTON_START => GamepadButton::Start,
            KeyCode::BUTTON_SELECT => GamepadButton::Select,
            KeyCode::DPAD_UP => GamepadButton::DpadUp,
            KeyCode::DPAD_DOWN => GamepadButton::DpadDown,
            KeyCode::DPAD_LEFT => GamepadButton::DpadLeft,
            KeyCode::DPAD_RIGHT => GamepadButton::DpadRight,
            _ => return None,
        };
        Some(button)
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            GamepadButton::A => "BUTTON_A",
            GamepadButton::B => "BUTTON_B",
            GamepadButton::X => "BUTTON_X",
            GamepadButton::Y => "BUTTON_Y",
            GamepadButton::L1 => "BUTTON_L1",
            GamepadButton::R1 => "BUTTON_R1",
            GamepadButton::L2 => "BUTTON_L2",
            GamepadButton::R2 => "BUTTON_R2",
            GamepadButton::LeftStick => "BUTTON_LEFT_STICK",
            GamepadButton::RightStick => "BUTTON_RIGHT_STICK",
            GamepadButton::Start => "BUTTON_START",
            GamepadButton::Select => "BUTTON_SELECT",
            GamepadButton::DpadUp => "DPAD_UP",
            GamepadButton::DpadDown => "DPAD_DOWN",
            GamepadButton::DpadLeft => "DPAD_LEFT",
            GamepadButton::DpadRight => "DPAD_RIGHT",
        }
    }
}

/// Full analog state of one motion event. All eight axes are always present.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalogFrame {
    pub left_x: f32,
    pub left_y: f32,
    pub right_x: f32,
    pub right_y: f32,
    pub left_trigger: f32,
    pub right_trigger: f32,
    pub dpad_x: f32,
    pub dpad_y: f32,
}

/// One physical press or release.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ButtonEvent {
    pub button: GamepadButton,
    pub pressed: bool,
}

/// Payload of `on_gamepad_input`: either half may be absent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GamepadInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analog: Option<AnalogFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buttons: Option<BTreeMap<GamepadButton, bool>>,
}

impl GamepadInput {
    pub fn analog(frame: AnalogFrame) -> Self {
        Self {
            analog: Some(frame),
            buttons: None,
        }
    }

    pub fn button(event: ButtonEvent) -> Self {
        Self {
            analog: None,
            buttons: Some(BTreeMap::from([(event.button, event.pressed)])),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Axis {axis:?} reported a non-finite value: {value}")]
    NonFiniteAxis { axis: AxisCode, value: f32 },

    #[error("Event source {0:?} is not a gamepad or joystick")]
    NotGamepadMotion(SourceFlags),
}

/// Clamps `value` to exactly 0.0 when it lies within `[-deadzone, deadzone]`.
pub fn apply_deadzone(value: f32, deadzone: f32) -> f32 {
    if value.abs() <= deadzone {
        0.0
    } else {
        value
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Normalizer {
    deadzone: f32,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            deadzone: DEFAULT_DEADZONE,
        }
    }
}

impl Normalizer {
    pub fn new(deadzone: f32) -> Self {
        Self { deadzone }
    }

    pub fn deadzone(&self) -> f32 {
        self.deadzone
    }

    /// Reads the eight fixed axes. Sticks and hat get the deadzone, triggers
    /// pass through raw.
    pub fn normalize_motion(&self, event: &RawMotionEvent) -> Result<AnalogFrame, NormalizeError> {
        if classify(event.source, None) != InputClass::Motion {
            return Err(NormalizeError::NotGamepadMotion(event.source));
        }

        let read = |axis: AxisCode| -> Result<f32, NormalizeError> {
            let value = event.axis_value(axis);
            if value.is_finite() {
                Ok(value)
            } else {
                Err(NormalizeError::NonFiniteAxis { axis, value })
            }
        };
        let centered = |axis: AxisCode| read(axis).map(|v| apply_deadzone(v, self.deadzone));

        Ok(AnalogFrame {
            left_x: centered(AxisCode::X)?,
            left_y: centered(AxisCode::Y)?,
            right_x: centered(AxisCode::Z)?,
            right_y: centered(AxisCode::RZ)?,
            left_trigger: read(AxisCode::LTRIGGER)?,
            right_trigger: read(AxisCode::RTRIGGER)?,
            dpad_x: centered(AxisCode::HAT_X)?,
            dpad_y: centered(AxisCode::HAT_Y)?,
        })
    }

    /// `None` unless the classifier recognizes the key and it has a wire name.
    pub fn normalize_button(
        &self,
        source: SourceFlags,
        key_code: KeyCode,
        pressed: bool,
    ) -> Option<ButtonEvent> {
        match classify(source, Some(key_code)) {
            InputClass::Button(code) => {
                let button = GamepadButton::from_key_code(code);
                if button.is_none() {
                    debug!("Gamepad key {:?} has no named button, ignoring", code);
                }
                button.map(|button| ButtonEvent { button, pressed })
            }
            InputClass::Motion | InputClass::None => None,
        }
    }
}

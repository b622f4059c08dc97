//! Device Classifier
//!
//! Pure mapping from a raw source bitmask (and key code, for key events) to
//! the semantic category the rest of the pipeline works with.

use crate::controller::codes::{KeyCode, SourceFlags};

/// Semantic category of a raw input event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputClass {
    /// Analog motion from a gamepad or joystick.
    Motion,
    /// A recognized gamepad or D-pad key.
    Button(KeyCode),
    /// Not gamepad input; belongs to the surrounding input system.
    None,
}

/// Classifies a raw event. `key_code` is `None` for motion events.
///
/// Total: every input maps to exactly one [`InputClass`].
pub fn classify(source: SourceFlags, key_code: Option<KeyCode>) -> InputClass {
    match key_code {
        None if is_gamepad_motion_source(source) => InputClass::Motion,
        None => InputClass::None,
        Some(code) if is_gamepad_key_source(source) && is_gamepad_key(code) => {
            InputClass::Button(code)
        }
        Some(_) => InputClass::None,
    }
}

pub fn is_gamepad_motion_source(source: SourceFlags) -> bool {
    source.has(SourceFlags::JOYSTICK) || source.has(SourceFlags::GAMEPAD)
}

pub fn is_gamepad_key_source(source: SourceFlags) -> bool {
    source.has(SourceFlags::GAMEPAD) || source.has(SourceFlags::DPAD)
}

pub fn is_gamepad_key(code: KeyCode) -> bool {
    code.is_gamepad_button() || code.is_dpad()
}

/// Whether a device's sources make it an external controller worth reporting.
pub fn is_gamepad_device(sources: SourceFlags) -> bool {
    sources.has(SourceFlags::GAMEPAD) || sources.has(SourceFlags::JOYSTICK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn motion_needs_joystick_or_gamepad_source() {
        assert_eq!(classify(SourceFlags::JOYSTICK, None), InputClass::Motion);
        assert_eq!(classify(SourceFlags::GAMEPAD, None), InputClass::Motion);
        assert_eq!(classify(SourceFlags::DPAD, None), InputClass::None);
        assert_eq!(classify(SourceFlags::KEYBOARD, None), InputClass::None);
        assert_eq!(classify(SourceFlags::NONE, None), InputClass::None);
    }

    #[test]
    fn keys_need_gamepad_or_dpad_source() {
        assert_eq!(
            classify(SourceFlags::GAMEPAD, Some(KeyCode::BUTTON_A)),
            InputClass::Button(KeyCode::BUTTON_A)
        );
        assert_eq!(
            classify(SourceFlags::DPAD, Some(KeyCode::DPAD_LEFT)),
            InputClass::Button(KeyCode::DPAD_LEFT)
        );
        assert_eq!(
            classify(SourceFlags::KEYBOARD, Some(KeyCode::BUTTON_A)),
            InputClass::None
        );
        // Joystick alone carries no key capability.
        assert_eq!(
            classify(SourceFlags::JOYSTICK, Some(KeyCode::BUTTON_A)),
            InputClass::None
        );
    }

    #[test]
    fn non_gamepad_keys_are_never_buttons() {
        for code in [0, 4, 24, 62, 66, 111, 187, 204, i32::MAX, -1] {
            assert_eq!(
                classify(SourceFlags::GAMEPAD | SourceFlags::DPAD, Some(KeyCode(code))),
                InputClass::None,
                "key code {code}"
            );
        }
    }

    #[test]
    fn dpad_center_and_generic_buttons_are_recognized() {
        assert_eq!(
            classify(SourceFlags::GAMEPAD, Some(KeyCode::DPAD_CENTER)),
            InputClass::Button(KeyCode::DPAD_CENTER)
        );
        assert_eq!(
            classify(SourceFlags::GAMEPAD, Some(KeyCode(190))),
            InputClass::Button(KeyCode(190))
        );
    }

    #[test]
    fn gamepad_devices() {
        assert!(is_gamepad_device(SourceFlags::GAMEPAD | SourceFlags::DPAD));
        assert!(is_gamepad_device(SourceFlags::JOYSTICK));
        assert!(!is_gamepad_device(SourceFlags::KEYBOARD | SourceFlags::DPAD));
    }
}

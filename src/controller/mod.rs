//! Input capture and normalization pipeline
//!
//! ```text
//! platform ──► InputSink ──► classifier ──► normalizer ──► GamepadConsumer
//!              (lifecycle gate)             (deadzone)
//! ```
//!
//! 1. [`codes`] - Raw source flags, key codes and axis ids
//! 2. [`classifier`] - Gamepad motion / gamepad button / not ours
//! 3. [`normalizer`] - Named axes and buttons, deadzone applied
//! 4. [`capture_session`] - Lifecycle, resources and event intake
//! 5. [`devices`] - Controller attach/detach reporting
//!
//! Intake is synchronous on the delivering thread: no queue sits between a
//! raw event and its normalized message.

pub mod capture_session;
pub mod classifier;
pub mod codes;
pub mod devices;
pub mod normalizer;

pub use capture_session::{
    CaptureError, CaptureMode, CapturePlatform, CaptureSession, CaptureSettings,
    EventDisposition, InputSink, Lifecycle,
};
pub use classifier::{classify, InputClass};
pub use codes::{AxisCode, KeyAction, KeyCode, RawInputEvent, RawKeyEvent, RawMotionEvent, SourceFlags};
pub use devices::{AttachedDevice, DeviceWatcher};
pub use normalizer::{AnalogFrame, ButtonEvent, GamepadButton, GamepadInput, NormalizeError, Normalizer};

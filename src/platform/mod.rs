//! Platform collaborators of the capture pipeline
//!
//! The capture session never talks to the operating system directly. Each
//! side effect it needs sits behind one of these traits:
//!
//! ```text
//! StayAwake              - keeps the device from sleeping while capture runs
//! Haptics                - short vibration pulse on button press
//! CaptureSurfaceProvider - input-receiving construct that feeds an InputSink
//! DeviceMonitor          - attach/detach notifications for input devices
//! ```
//!
//! [`desktop`] implements them on top of gilrs for attached controllers.

use std::fmt;
use std::time::Duration;

use crate::controller::capture_session::InputSink;
use crate::controller::codes::SourceFlags;

pub mod desktop;
#[cfg(test)]
pub mod fake;

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Platform resource unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to initialize platform backend: {0}")]
    InitializationError(String),
}

/// An input device as reported by the platform.
#[derive(Clone, Debug, PartialEq)]
pub struct InputDeviceInfo {
    pub id: i32,
    pub name: String,
    pub sources: SourceFlags,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DeviceEvent {
    Added(InputDeviceInfo),
    Changed(InputDeviceInfo),
    Removed(i32),
}

pub type DeviceListener = std::sync::Arc<dyn Fn(&DeviceEvent) + Send + Sync>;

/// Cancellation handle for a registration with the platform.
///
/// Cancels on drop. Cancelling twice is impossible by construction.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

pub trait StayAwake: Send + Sync {
    /// `timeout` of `None` holds the lock until [`StayAwake::release`].
    fn acquire(&self, timeout: Option<Duration>) -> Result<(), PlatformError>;
    fn release(&self);
    fn is_held(&self) -> bool;
}

pub trait Haptics: Send + Sync {
    /// Runs on the input-delivery path and must return promptly.
    fn pulse(&self, duration: Duration);
}

pub trait CaptureSurfaceProvider: Send + Sync {
    /// Establishes the surface and routes its raw events into `sink` until the
    /// returned subscription is cancelled.
    fn attach(&self, sink: InputSink) -> Result<Subscription, PlatformError>;
}

pub trait DeviceMonitor: Send + Sync {
    fn connected_devices(&self) -> Vec<InputDeviceInfo>;

    /// Listeners are invoked without any monitor lock held, so a listener may
    /// cancel its own subscription.
    fn subscribe(&self, listener: DeviceListener) -> Subscription;
}

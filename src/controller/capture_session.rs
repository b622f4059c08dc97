//! Capture Session
//!
//! Owns the capture lifecycle and every resource held while capturing: the
//! stay-awake lock, a detach hook on the device watcher and (in overlay
//! mode) the capture surface. Raw events arrive through an [`InputSink`] on
//! whatever thread the platform delivers them and are normalized and emitted
//! synchronously, in arrival order.
//!
//! ```text
//! Stopped ──start──► Starting ──► Running ──stop──► Stopping ──► Stopped
//!    ▲                  │            │
//!    └── start failed ──┘            └── attached device removed (stop)
//! ```
//!
//! The lifecycle lives in a watch channel. Intake holds a read borrow of it
//! for the whole time it processes one event, and every lifecycle change takes
//! the write side, so once `stop()` has moved past Running no event can reach
//! the normalizer any more.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::consumer::{GamepadConsumer, ServiceStatus};
use crate::controller::classifier::{classify, InputClass};
use crate::controller::codes::{KeyAction, RawInputEvent, RawKeyEvent, RawMotionEvent};
use crate::controller::devices::{AttachedDevice, DeviceWatcher};
use crate::controller::normalizer::{GamepadInput, Normalizer, DEFAULT_DEADZONE};
use crate::platform::{
    CaptureSurfaceProvider, DeviceMonitor, Haptics, PlatformError, StayAwake, Subscription,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Tells the delivering platform whether the event was taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventDisposition {
    Consumed,
    PassThrough,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Acquire a dedicated capture surface from the platform.
    #[default]
    Overlay,
    /// The host forwards its own input callbacks into [`CaptureSession::sink`].
    HostSurface,
}

#[derive(Clone, Debug)]
pub struct CaptureSettings {
    pub mode: CaptureMode,
    pub deadzone: f32,
    pub haptic_pulse: Duration,
    pub stay_awake_timeout: Option<Duration>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Overlay,
            deadzone: DEFAULT_DEADZONE,
            haptic_pulse: Duration::from_millis(50),
            stay_awake_timeout: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Capture surface permission denied: {0}")]
    PermissionDenied(String),

    #[error("Failed to acquire stay-awake resource: {0}")]
    StayAwakeUnavailable(String),

    #[error("Failed to establish capture surface: {0}")]
    SurfaceUnavailable(String),
}

/// Platform collaborators a capture session drives.
#[derive(Clone)]
pub struct CapturePlatform {
    pub stay_awake: Arc<dyn StayAwake>,
    pub haptics: Arc<dyn Haptics>,
    pub surfaces: Arc<dyn CaptureSurfaceProvider>,
    pub devices: Arc<dyn DeviceMonitor>,
}

struct Intake {
    lifecycle: watch::Sender<Lifecycle>,
    haptics_enabled: AtomicBool,
    normalizer: Normalizer,
    haptic_pulse: Duration,
    haptics: Arc<dyn Haptics>,
    consumer: Arc<dyn GamepadConsumer>,
}

impl Intake {
    fn handle_motion(&self, motion: &RawMotionEvent) -> EventDisposition {
        if classify(motion.source, None) != InputClass::Motion {
            return EventDisposition::PassThrough;
        }

        match self.normalizer.normalize_motion(motion) {
            Ok(frame) => {
                debug!("Analog frame from device {}: {:?}", motion.device_id, frame);
                self.consumer.on_gamepad_input(GamepadInput::analog(frame));
            }
            Err(e) => warn!(
                "Dropping motion event from device {}: {}",
                motion.device_id, e
            ),
        }
        EventDisposition::Consumed
    }

    fn handle_key(&self, key: &RawKeyEvent) -> EventDisposition {
        let pressed = key.action == KeyAction::Down;
        let Some(event) = self
            .normalizer
            .normalize_button(key.source, key.key_code, pressed)
        else {
            return EventDisposition::PassThrough;
        };

        if key.is_repeat() {
            debug!("Ignoring auto-repeat of {:?}", event.button);
            return EventDisposition::Consumed;
        }

        info!(
            "Button {} {}",
            event.button.wire_name(),
            if pressed { "pressed" } else { "released" }
        );
        if pressed && self.haptics_enabled.load(Ordering::Acquire) {
            self.haptics.pulse(self.haptic_pulse);
        }
        self.consumer.on_gamepad_input(GamepadInput::button(event));
        EventDisposition::Consumed
    }
}

/// Entry point for raw events, handed to capture surfaces and host views.
#[derive(Clone)]
pub struct InputSink {
    intake: Arc<Intake>,
}

impl InputSink {
    /// Never blocks on anything but an in-progress lifecycle change.
    pub fn deliver(&self, event: &RawInputEvent) -> EventDisposition {
        let lifecycle = self.intake.lifecycle.borrow();
        if *lifecycle != Lifecycle::Running {
            return EventDisposition::PassThrough;
        }

        match event {
            RawInputEvent::Motion(motion) => self.intake.handle_motion(motion),
            RawInputEvent::Key(key) => self.intake.handle_key(key),
        }
    }
}

struct ActiveResources {
    detach_hook: Subscription,
    surface: Option<Subscription>,
}

pub struct CaptureSession {
    me: Weak<CaptureSession>,
    intake: Arc<Intake>,
    platform: CapturePlatform,
    settings: CaptureSettings,
    devices: Arc<DeviceWatcher>,
    // Also serializes start/stop: only the holder writes the lifecycle.
    active: Mutex<Option<ActiveResources>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CaptureSession {
    pub fn new(
        settings: CaptureSettings,
        platform: CapturePlatform,
        devices: Arc<DeviceWatcher>,
        consumer: Arc<dyn GamepadConsumer>,
    ) -> Arc<Self> {
        debug!("Creating capture session with settings: {:?}", settings);
        let (lifecycle, _) = watch::channel(Lifecycle::Stopped);
        let intake = Arc::new(Intake {
            lifecycle,
            haptics_enabled: AtomicBool::new(false),
            normalizer: Normalizer::new(settings.deadzone),
            haptic_pulse: settings.haptic_pulse,
            haptics: platform.haptics.clone(),
            consumer,
        });

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            intake,
            platform,
            settings,
            devices,
            active: Mutex::new(None),
        })
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.intake.lifecycle.borrow()
    }

    pub fn subscribe_lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.intake.lifecycle.subscribe()
    }

    pub fn haptics_enabled(&self) -> bool {
        self.intake.haptics_enabled.load(Ordering::Acquire)
    }

    /// The watcher's attached controller while capture runs.
    pub fn attached_device_id(&self) -> Option<i32> {
        if self.lifecycle() != Lifecycle::Running {
            return None;
        }
        self.devices.attached_device().map(|device| device.device_id)
    }

    pub fn sink(&self) -> InputSink {
        InputSink {
            intake: self.intake.clone(),
        }
    }

    /// Acquires every resource or none. Starting while running is a no-op.
    pub fn start(&self, haptics_enabled: bool) -> Result<(), CaptureError> {
        let mut active = lock(&self.active);
        if active.is_some() {
            debug!("Capture session already running, ignoring start");
            return Ok(());
        }

        info!(
            "Starting capture session (mode: {:?}, haptics: {})",
            self.settings.mode, haptics_enabled
        );
        self.intake
            .haptics_enabled
            .store(haptics_enabled, Ordering::Release);
        self.intake.lifecycle.send_replace(Lifecycle::Starting);

        match self.acquire_resources() {
            Ok(resources) => {
                *active = Some(resources);
                self.intake.lifecycle.send_replace(Lifecycle::Running);
                info!("Capture session running");
                Ok(())
            }
            Err(e) => {
                self.intake.lifecycle.send_replace(Lifecycle::Stopped);
                error!("Failed to start capture session: {}", e);
                Err(e)
            }
        }
    }

    fn acquire_resources(&self) -> Result<ActiveResources, CaptureError> {
        self.platform
            .stay_awake
            .acquire(self.settings.stay_awake_timeout)
            .map_err(|e| CaptureError::StayAwakeUnavailable(e.to_string()))?;
        debug!("Stay-awake resource acquired");

        self.devices.ensure_subscribed();
        let me = self.me.clone();
        let detach_hook = self.devices.on_detach(Arc::new(move |device: &AttachedDevice| {
            if let Some(session) = me.upgrade() {
                warn!(
                    "Attached controller {} removed, stopping capture",
                    device.device_id
                );
                session.stop();
            }
        }));

        let surface = match self.settings.mode {
            CaptureMode::HostSurface => None,
            CaptureMode::Overlay => match self.platform.surfaces.attach(self.sink()) {
                Ok(surface) => Some(surface),
                Err(e) => {
                    detach_hook.cancel();
                    self.platform.stay_awake.release();
                    return Err(match e {
                        PlatformError::PermissionDenied(reason) => {
                            CaptureError::PermissionDenied(reason)
                        }
                        other => CaptureError::SurfaceUnavailable(other.to_string()),
                    });
                }
            },
        };

        Ok(ActiveResources {
            detach_hook,
            surface,
        })
    }

    /// Releases everything and reports `STOPPED`. Stopping a stopped session
    /// does nothing.
    pub fn stop(&self) {
        let mut active = lock(&self.active);
        let Some(resources) = active.take() else {
            debug!("Capture session already stopped");
            return;
        };

        info!("Stopping capture session");
        self.intake.lifecycle.send_replace(Lifecycle::Stopping);

        if let Some(surface) = resources.surface {
            surface.cancel();
            debug!("Capture surface removed");
        }
        resources.detach_hook.cancel();
        if self.platform.stay_awake.is_held() {
            self.platform.stay_awake.release();
            debug!("Stay-awake resource released");
        }

        self.intake.consumer.on_service_status(ServiceStatus::Stopped);
        self.intake.lifecycle.send_replace(Lifecycle::Stopped);
        info!("Capture session stopped");
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        let resources = self
            .active
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(resources) = resources {
            warn!("Capture session dropped while running, releasing resources");
            drop(resources);
            if self.platform.stay_awake.is_held() {
                self.platform.stay_awake.release();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{ChannelConsumer, ConsumerEvent};
    use crate::controller::codes::{AxisCode, KeyCode, SourceFlags};
    use crate::controller::normalizer::{AnalogFrame, GamepadButton};
    use crate::platform::fake::FakePlatform;
    use crate::platform::{DeviceEvent, InputDeviceInfo};
    use std::sync::atomic::Ordering::SeqCst;
    use tokio::sync::mpsc;

    fn session_with(
        settings: CaptureSettings,
    ) -> (Arc<CaptureSession>, FakePlatform, mpsc::Receiver<ConsumerEvent>) {
        let platform = FakePlatform::default();
        let (consumer, rx) = ChannelConsumer::channel(64);
        let consumer: Arc<dyn GamepadConsumer> = Arc::new(consumer);
        let devices = Arc::new(DeviceWatcher::new(platform.devices.clone(), consumer.clone()));
        let session = CaptureSession::new(settings, platform.capture_platform(), devices, consumer);
        (session, platform, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ConsumerEvent>) -> Vec<ConsumerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn pad() -> InputDeviceInfo {
        InputDeviceInfo {
            id: 12,
            name: "Wireless Controller".to_string(),
            sources: SourceFlags::GAMEPAD | SourceFlags::JOYSTICK,
        }
    }

    fn press(code: KeyCode) -> RawInputEvent {
        RawInputEvent::Key(RawKeyEvent::down(SourceFlags::GAMEPAD, 12, code))
    }

    fn release(code: KeyCode) -> RawInputEvent {
        RawInputEvent::Key(RawKeyEvent::up(SourceFlags::GAMEPAD, 12, code))
    }

    #[test]
    fn start_acquires_everything_and_runs() {
        let (session, platform, _rx) = session_with(CaptureSettings::default());
        session.start(true).unwrap();

        assert_eq!(session.lifecycle(), Lifecycle::Running);
        assert!(session.haptics_enabled());
        assert!(platform.stay_awake.is_held());
        assert_eq!(platform.surfaces.attach_count(), 1);
        assert_eq!(platform.devices.listener_count(), 1);
        assert_eq!(session.devices.detach_hook_count(), 1);
    }

    #[test]
    fn start_while_running_does_not_reacquire() {
        let (session, platform, _rx) = session_with(CaptureSettings::default());
        session.start(false).unwrap();
        session.start(true).unwrap();

        assert_eq!(platform.stay_awake.acquires.load(SeqCst), 1);
        assert_eq!(platform.surfaces.attach_count(), 1);
        assert!(!session.haptics_enabled());
    }

    #[test]
    fn stop_twice_releases_once() {
        let (session, platform, mut rx) = session_with(CaptureSettings::default());
        session.start(false).unwrap();
        drain(&mut rx);

        session.stop();
        session.stop();

        assert_eq!(session.lifecycle(), Lifecycle::Stopped);
        assert_eq!(platform.stay_awake.releases.load(SeqCst), 1);
        assert_eq!(platform.surfaces.detach_count(), 1);
        assert_eq!(session.devices.detach_hook_count(), 0);
        assert_eq!(
            drain(&mut rx),
            vec![ConsumerEvent::ServiceStatus(ServiceStatus::Stopped)]
        );
    }

    #[test]
    fn stop_when_never_started_is_silent() {
        let (session, platform, mut rx) = session_with(CaptureSettings::default());
        session.stop();
        assert_eq!(platform.stay_awake.releases.load(SeqCst), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn permission_denied_releases_partial_resources() {
        let (session, platform, mut rx) = session_with(CaptureSettings::default());
        platform.surfaces.deny.store(true, SeqCst);

        let result = session.start(true);

        assert!(matches!(result, Err(CaptureError::PermissionDenied(_))));
        assert_eq!(session.lifecycle(), Lifecycle::Stopped);
        assert_eq!(platform.stay_awake.acquires.load(SeqCst), 1);
        assert_eq!(platform.stay_awake.releases.load(SeqCst), 1);
        assert!(!platform.stay_awake.is_held());
        assert_eq!(session.devices.detach_hook_count(), 0);
        assert!(drain(&mut rx).is_empty());

        // A later attempt can still succeed.
        platform.surfaces.deny.store(false, SeqCst);
        session.start(true).unwrap();
        assert_eq!(session.lifecycle(), Lifecycle::Running);
    }

    #[test]
    fn stay_awake_failure_acquires_nothing_else() {
        let (session, platform, _rx) = session_with(CaptureSettings::default());
        platform.stay_awake.fail.store(true, SeqCst);

        assert!(matches!(
            session.start(false),
            Err(CaptureError::StayAwakeUnavailable(_))
        ));
        assert_eq!(platform.surfaces.attach_count(), 0);
        assert_eq!(session.devices.detach_hook_count(), 0);
        assert_eq!(session.lifecycle(), Lifecycle::Stopped);
    }

    #[test]
    fn events_pass_through_unless_running() {
        let (session, _platform, mut rx) = session_with(CaptureSettings::default());
        let sink = session.sink();

        assert_eq!(sink.deliver(&press(KeyCode::BUTTON_A)), EventDisposition::PassThrough);

        session.start(false).unwrap();
        session.stop();
        drain(&mut rx);

        assert_eq!(sink.deliver(&press(KeyCode::BUTTON_A)), EventDisposition::PassThrough);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn buttons_are_emitted_in_order_with_haptics_on_press() {
        let (session, platform, mut rx) = session_with(CaptureSettings::default());
        session.start(true).unwrap();

        for event in [
            press(KeyCode::BUTTON_A),
            press(KeyCode::DPAD_UP),
            release(KeyCode::BUTTON_A),
            release(KeyCode::DPAD_UP),
        ] {
            assert_eq!(
                platform.surfaces.deliver(&event),
                Some(EventDisposition::Consumed)
            );
        }

        let buttons: Vec<(GamepadButton, bool)> = drain(&mut rx)
            .into_iter()
            .filter_map(|event| match event {
                ConsumerEvent::GamepadInput(GamepadInput {
                    buttons: Some(buttons),
                    analog: None,
                }) => buttons.into_iter().next(),
                _ => None,
            })
            .collect();
        assert_eq!(
            buttons,
            vec![
                (GamepadButton::A, true),
                (GamepadButton::DpadUp, true),
                (GamepadButton::A, false),
                (GamepadButton::DpadUp, false),
            ]
        );
        assert_eq!(platform.haptics.pulses.load(SeqCst), 2);
    }

    #[test]
    fn haptics_disabled_never_pulses() {
        let (session, platform, _rx) = session_with(CaptureSettings::default());
        session.start(false).unwrap();
        platform.surfaces.deliver(&press(KeyCode::BUTTON_B));
        assert_eq!(platform.haptics.pulses.load(SeqCst), 0);
    }

    #[test]
    fn unrecognized_keys_and_repeats() {
        let (session, platform, mut rx) = session_with(CaptureSettings::default());
        session.start(true).unwrap();
        drain(&mut rx);

        let keyboard = RawInputEvent::Key(RawKeyEvent::down(SourceFlags::KEYBOARD, 1, KeyCode(29)));
        assert_eq!(platform.surfaces.deliver(&keyboard), Some(EventDisposition::PassThrough));
        assert_eq!(
            platform.surfaces.deliver(&press(KeyCode::BUTTON_MODE)),
            Some(EventDisposition::PassThrough)
        );

        let mut repeat = RawKeyEvent::down(SourceFlags::GAMEPAD, 12, KeyCode::BUTTON_X);
        repeat.repeat_count = 3;
        assert_eq!(
            platform.surfaces.deliver(&RawInputEvent::Key(repeat)),
            Some(EventDisposition::Consumed)
        );

        assert!(drain(&mut rx).is_empty());
        assert_eq!(platform.haptics.pulses.load(SeqCst), 0);
    }

    #[test]
    fn motion_emits_full_frame_and_bad_motion_is_dropped() {
        let (session, platform, mut rx) = session_with(CaptureSettings::default());
        session.start(false).unwrap();

        let motion = RawMotionEvent::new(SourceFlags::JOYSTICK, 12)
            .with_axis(AxisCode::X, 0.05)
            .with_axis(AxisCode::Y, -0.9)
            .with_axis(AxisCode::LTRIGGER, 0.3);
        let broken = RawMotionEvent::new(SourceFlags::JOYSTICK, 12).with_axis(AxisCode::Z, f32::INFINITY);
        let mouse = RawMotionEvent::new(SourceFlags(0x2002), 3).with_axis(AxisCode::X, 0.5);

        assert_eq!(
            platform.surfaces.deliver(&RawInputEvent::Motion(broken)),
            Some(EventDisposition::Consumed)
        );
        assert_eq!(
            platform.surfaces.deliver(&RawInputEvent::Motion(mouse)),
            Some(EventDisposition::PassThrough)
        );
        assert_eq!(
            platform.surfaces.deliver(&RawInputEvent::Motion(motion)),
            Some(EventDisposition::Consumed)
        );

        assert_eq!(
            drain(&mut rx),
            vec![ConsumerEvent::GamepadInput(GamepadInput::analog(AnalogFrame {
                left_y: -0.9,
                left_trigger: 0.3,
                ..AnalogFrame::default()
            }))]
        );
        assert_eq!(session.lifecycle(), Lifecycle::Running);
    }

    #[test]
    fn host_surface_mode_uses_the_session_sink() {
        let settings = CaptureSettings {
            mode: CaptureMode::HostSurface,
            ..CaptureSettings::default()
        };
        let (session, platform, mut rx) = session_with(settings);
        session.start(false).unwrap();

        assert_eq!(platform.surfaces.attach_count(), 0);
        assert_eq!(
            session.sink().deliver(&press(KeyCode::BUTTON_START)),
            EventDisposition::Consumed
        );
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn removal_of_attached_device_stops_capture() {
        let (session, platform, mut rx) = session_with(CaptureSettings::default());
        platform.devices.emit(DeviceEvent::Added(pad()));
        session.start(false).unwrap();
        assert_eq!(session.attached_device_id(), Some(12));

        platform.devices.emit(DeviceEvent::Removed(99));
        assert_eq!(session.lifecycle(), Lifecycle::Running);

        platform.devices.emit(DeviceEvent::Removed(12));
        assert_eq!(session.lifecycle(), Lifecycle::Stopped);
        assert_eq!(session.attached_device_id(), None);
        assert!(!platform.stay_awake.is_held());
        assert_eq!(session.devices.detach_hook_count(), 0);
        assert_eq!(
            drain(&mut rx),
            vec![
                ConsumerEvent::GamepadDisconnected,
                ConsumerEvent::ServiceStatus(ServiceStatus::Stopped),
            ]
        );
    }

    #[test]
    fn device_added_while_running_becomes_attached() {
        let (session, platform, _rx) = session_with(CaptureSettings::default());
        session.start(false).unwrap();
        assert_eq!(session.attached_device_id(), None);

        let keyboard = InputDeviceInfo {
            id: 2,
            name: "Keyboard".to_string(),
            sources: SourceFlags::KEYBOARD,
        };
        platform.devices.emit(DeviceEvent::Added(keyboard));
        assert_eq!(session.attached_device_id(), None);

        platform.devices.emit(DeviceEvent::Added(pad()));
        assert_eq!(session.attached_device_id(), Some(12));
    }

    #[test]
    fn stop_clears_attached_device() {
        let (session, platform, _rx) = session_with(CaptureSettings::default());
        platform.devices.emit(DeviceEvent::Added(pad()));
        session.start(false).unwrap();
        assert_eq!(session.attached_device_id(), Some(12));

        session.stop();

        assert_eq!(session.attached_device_id(), None);
        // The controller itself stays attached for the next start.
        assert_eq!(session.devices.attached_device().map(|d| d.device_id), Some(12));
        session.start(false).unwrap();
        assert_eq!(session.attached_device_id(), Some(12));
    }

    #[test]
    fn dropping_a_running_session_releases_stay_awake() {
        let (session, platform, _rx) = session_with(CaptureSettings::default());
        session.start(false).unwrap();
        drop(session);

        assert!(!platform.stay_awake.is_held());
        assert_eq!(platform.surfaces.detach_count(), 1);
        assert_eq!(platform.stay_awake.releases.load(SeqCst), 1);
    }
}

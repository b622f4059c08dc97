//! Desktop platform on top of gilrs
//!
//! gilrs owns the controllers on a dedicated poller thread. Its events are
//! translated into the raw input model (mobile key codes and axis ids) and
//! handed to whichever sink is attached, so a desktop controller takes the
//! same classification and normalization path as any other input source.
//!
//! ```text
//! Gilrs ──► GamepadPoller<Polling> ──► translate() ──► InputSink
//!                  │
//!                  └── Connected / Disconnected ──► DeviceListener(s)
//! ```

use gilrs::ff::{BaseEffect, BaseEffectType, Effect, EffectBuilder, Replay, Ticks};
use gilrs::{Axis, Button, Event, EventType, GamepadId, Gilrs};
use statum::{machine, state};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use super::{
    CaptureSurfaceProvider, DeviceEvent, DeviceListener, DeviceMonitor, Haptics, InputDeviceInfo,
    PlatformError, StayAwake, Subscription,
};
use crate::controller::capture_session::{CapturePlatform, EventDisposition, InputSink};
use crate::controller::codes::{
    AxisCode, KeyAction, KeyCode, RawInputEvent, RawKeyEvent, RawMotionEvent, SourceFlags,
};

/// Upper bound on how long the poller blocks before re-checking shutdown and
/// pending haptic pulses.
const POLL_TIMEOUT: Duration = Duration::from_millis(5);
const RUMBLE_MAGNITUDE: u16 = 40_000;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ids outside the `i32` range are reported as `UNKNOWN_DEVICE_ID`.
pub const UNKNOWN_DEVICE_ID: i32 = -1;

pub fn device_id(id: GamepadId) -> i32 {
    checked_device_id(usize::from(id))
}

fn checked_device_id(raw: usize) -> i32 {
    i32::try_from(raw).unwrap_or_else(|_| {
        warn!("Gamepad id {} does not fit a device id", raw);
        UNKNOWN_DEVICE_ID
    })
}

fn describe(id: GamepadId, name: &str) -> InputDeviceInfo {
    InputDeviceInfo {
        id: device_id(id),
        name: name.to_string(),
        sources: SourceFlags::GAMEPAD | SourceFlags::JOYSTICK | SourceFlags::DPAD,
    }
}

fn key_code(button: Button) -> Option<KeyCode> {
    match button {
        Button::South => Some(KeyCode::BUTTON_A),
        Button::East => Some(KeyCode::BUTTON_B),
        Button::West => Some(KeyCode::BUTTON_X),
        Button::North => Some(KeyCode::BUTTON_Y),
        Button::C => Some(KeyCode::BUTTON_C),
        Button::Z => Some(KeyCode::BUTTON_Z),
        Button::LeftTrigger => Some(KeyCode::BUTTON_L1),
        Button::RightTrigger => Some(KeyCode::BUTTON_R1),
        Button::LeftTrigger2 => Some(KeyCode::BUTTON_L2),
        Button::RightTrigger2 => Some(KeyCode::BUTTON_R2),
        Button::LeftThumb => Some(KeyCode::BUTTON_THUMBL),
        Button::RightThumb => Some(KeyCode::BUTTON_THUMBR),
        Button::Start => Some(KeyCode::BUTTON_START),
        Button::Select => Some(KeyCode::BUTTON_SELECT),
        Button::Mode => Some(KeyCode::BUTTON_MODE),
        Button::DPadUp => Some(KeyCode::DPAD_UP),
        Button::DPadDown => Some(KeyCode::DPAD_DOWN),
        Button::DPadLeft => Some(KeyCode::DPAD_LEFT),
        Button::DPadRight => Some(KeyCode::DPAD_RIGHT),
        _ => None,
    }
}

fn key_event(
    button: Button,
    action: KeyAction,
    repeat_count: u32,
    device_id: i32,
) -> Option<RawInputEvent> {
    let key_code = key_code(button)?;
    let source = if key_code.is_dpad() {
        SourceFlags::GAMEPAD | SourceFlags::DPAD
    } else {
        SourceFlags::GAMEPAD
    };
    Some(RawInputEvent::Key(RawKeyEvent {
        source,
        device_id,
        key_code,
        action,
        repeat_count,
    }))
}

/// Translates one gilrs event of the gamepad whose current axis state is
/// `motion`. Axis changes update `motion` and yield a copy of the whole state.
pub fn translate(event: &EventType, motion: &mut RawMotionEvent) -> Option<RawInputEvent> {
    let device_id = motion.device_id;
    match *event {
        EventType::AxisChanged(axis, value, _) => translate_axis(axis, value, motion),
        EventType::ButtonChanged(button, value, _) => {
            translate_analog_button(button, value, motion)
        }
        EventType::ButtonPressed(button, _) => key_event(button, KeyAction::Down, 0, device_id),
        EventType::ButtonRepeated(button, _) => key_event(button, KeyAction::Down, 1, device_id),
        EventType::ButtonReleased(button, _) => key_event(button, KeyAction::Up, 0, device_id),
        _ => None,
    }
}

/// gilrs reports stick and hat Y positive upwards; the raw model is positive
/// downwards, so those axes are negated.
fn translate_axis(axis: Axis, value: f32, motion: &mut RawMotionEvent) -> Option<RawInputEvent> {
    let (code, value) = match axis {
        Axis::LeftStickX => (AxisCode::X, value),
        Axis::LeftStickY => (AxisCode::Y, -value),
        Axis::RightStickX => (AxisCode::Z, value),
        Axis::RightStickY => (AxisCode::RZ, -value),
        Axis::LeftZ => (AxisCode::LTRIGGER, value),
        Axis::RightZ => (AxisCode::RTRIGGER, value),
        Axis::DPadX => (AxisCode::HAT_X, value),
        Axis::DPadY => (AxisCode::HAT_Y, -value),
        _ => {
            trace!("Ignoring unsupported axis: {:?}", axis);
            return None;
        }
    };
    motion.set_axis(code, value);
    Some(RawInputEvent::Motion(motion.clone()))
}

/// Analog triggers arrive as button values; other button values are ignored.
fn translate_analog_button(
    button: Button,
    value: f32,
    motion: &mut RawMotionEvent,
) -> Option<RawInputEvent> {
    let code = match button {
        Button::LeftTrigger2 => AxisCode::LTRIGGER,
        Button::RightTrigger2 => AxisCode::RTRIGGER,
        _ => return None,
    };
    motion.set_axis(code, value);
    Some(RawInputEvent::Motion(motion.clone()))
}

enum PollerCommand {
    Pulse(Duration),
}

/// State shared between the poller thread and the platform handles.
struct BackendShared {
    running: AtomicBool,
    next_token: AtomicU64,
    sink: Mutex<Option<(u64, InputSink)>>,
    listeners: Mutex<Vec<(u64, DeviceListener)>>,
    devices: Mutex<Vec<InputDeviceInfo>>,
}

impl BackendShared {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            next_token: AtomicU64::new(0),
            sink: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            devices: Mutex::new(Vec::new()),
        }
    }

    fn token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    /// `None` when no capture surface is attached.
    fn deliver(&self, event: &RawInputEvent) -> Option<EventDisposition> {
        // Sink is cloned out so delivery never runs under the slot lock.
        let sink = lock(&self.sink).as_ref().map(|(_, sink)| sink.clone());
        sink.map(|sink| sink.deliver(event))
    }

    fn publish(&self, event: DeviceEvent) {
        {
            let mut devices = lock(&self.devices);
            match &event {
                DeviceEvent::Added(device) | DeviceEvent::Changed(device) => {
                    match devices.iter_mut().find(|known| known.id == device.id) {
                        Some(known) => *known = device.clone(),
                        None => devices.push(device.clone()),
                    }
                }
                DeviceEvent::Removed(id) => devices.retain(|known| known.id != *id),
            }
        }

        let listeners: Vec<DeviceListener> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        debug!("Publishing {:?} to {} listeners", event, listeners.len());
        for listener in listeners {
            listener(&event);
        }
    }
}

impl fmt::Debug for BackendShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendShared")
            .field("running", &self.running.load(Ordering::Relaxed))
            .field("sink_attached", &lock(&self.sink).is_some())
            .field("listeners", &lock(&self.listeners).len())
            .field("devices", &*lock(&self.devices))
            .finish()
    }
}

#[state]
#[derive(Debug, Clone)]
enum PollerState {
    Initializing,
    Polling,
}

#[machine]
struct GamepadPoller<S: PollerState> {
    gilrs: Gilrs,
    shared: Arc<BackendShared>,
    commands: std_mpsc::Receiver<PollerCommand>,
    // Current axis values per controller
    motion: HashMap<GamepadId, RawMotionEvent>,
    // Kept alive until replaced; dropping an effect cancels it.
    rumble: Option<Effect>,
}

impl GamepadPoller<Initializing> {
    fn create(
        shared: Arc<BackendShared>,
        commands: std_mpsc::Receiver<PollerCommand>,
    ) -> Result<Self, PlatformError> {
        info!("Initializing gilrs controller interface");
        let gilrs = match Gilrs::new() {
            Ok(g) => {
                info!("Successfully initialized gilrs");
                g
            }
            Err(e) => {
                error!("Failed to initialize gilrs: {}", e);
                return Err(PlatformError::InitializationError(e.to_string()));
            }
        };

        Ok(Self::new(gilrs, shared, commands, HashMap::new(), None))
    }

    /// Registers the controllers that are already connected.
    fn initialize(mut self) -> GamepadPoller<Polling> {
        let connected: Vec<(GamepadId, InputDeviceInfo)> = self
            .gilrs
            .gamepads()
            .map(|(id, gamepad)| (id, describe(id, gamepad.name())))
            .collect();

        if connected.is_empty() {
            warn!("No gamepad connected, waiting for one");
        } else {
            info!("Found {} gamepads:", connected.len());
        }
        for (id, device) in connected {
            info!("  ID: {}, Name: {}", device.id, device.name);
            self.motion
                .insert(id, RawMotionEvent::new(SourceFlags::JOYSTICK, device.id));
            self.shared.publish(DeviceEvent::Added(device));
        }

        info!("Gamepad poller initialized, transitioning to Polling state");
        self.transition()
    }
}

impl GamepadPoller<Polling> {
    fn run(&mut self) {
        info!("Starting gamepad poll loop");
        let mut event_count: u64 = 0;

        while self.shared.running.load(Ordering::Acquire) {
            self.drain_commands();
            if let Some(event) = self.gilrs.next_event_blocking(Some(POLL_TIMEOUT)) {
                event_count += 1;
                self.handle_event(event);
            }
        }

        info!("Gamepad poll loop finished after {} events", event_count);
    }

    fn handle_event(&mut self, Event { id, event, .. }: Event) {
        match event {
            EventType::Connected => {
                let device = describe(id, self.gilrs.gamepad(id).name());
                info!("Controller connected: {} ({})", device.name, device.id);
                let known = self.motion.contains_key(&id);
                self.motion
                    .entry(id)
                    .or_insert_with(|| RawMotionEvent::new(SourceFlags::JOYSTICK, device.id));
                self.shared.publish(if known {
                    DeviceEvent::Changed(device)
                } else {
                    DeviceEvent::Added(device)
                });
            }
            EventType::Disconnected => {
                warn!("Controller disconnected: {}", id);
                self.motion.remove(&id);
                self.shared.publish(DeviceEvent::Removed(device_id(id)));
            }
            other => {
                let motion = self
                    .motion
                    .entry(id)
                    .or_insert_with(|| RawMotionEvent::new(SourceFlags::JOYSTICK, device_id(id)));
                let Some(raw) = translate(&other, motion) else {
                    trace!("Unhandled gilrs event: {:?}", other);
                    return;
                };
                match self.shared.deliver(&raw) {
                    Some(disposition) => trace!("Event {:?}: {:?}", other, disposition),
                    None => trace!("No capture surface attached, dropping {:?}", other),
                }
            }
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                PollerCommand::Pulse(duration) => self.pulse(duration),
            }
        }
    }

    fn pulse(&mut self, duration: Duration) {
        let targets: Vec<GamepadId> = self
            .gilrs
            .gamepads()
            .filter(|(_, gamepad)| gamepad.is_ff_supported())
            .map(|(id, _)| id)
            .collect();
        if targets.is_empty() {
            trace!("No force feedback capable controller, skipping pulse");
            return;
        }

        let play_for = Ticks::from_ms(u32::try_from(duration.as_millis()).unwrap_or(u32::MAX));
        let effect = EffectBuilder::new()
            .add_effect(BaseEffect {
                kind: BaseEffectType::Strong {
                    magnitude: RUMBLE_MAGNITUDE,
                },
                scheduling: Replay {
                    play_for,
                    ..Default::default()
                },
                envelope: Default::default(),
            })
            .gamepads(&targets)
            .finish(&mut self.gilrs)
            .and_then(|effect| {
                effect.play()?;
                Ok(effect)
            });

        match effect {
            Ok(effect) => {
                debug!("Haptic pulse of {:?} on {} controllers", duration, targets.len());
                self.rumble = Some(effect);
            }
            Err(e) => warn!("Failed to play haptic pulse: {}", e),
        }
    }
}

/// Capture surface and device monitor backed by the gilrs poller thread.
#[derive(Debug)]
pub struct GilrsBackend {
    shared: Arc<BackendShared>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl GilrsBackend {
    /// Starts the poller thread and waits until gilrs is up.
    fn spawn(commands: std_mpsc::Receiver<PollerCommand>) -> Result<Self, PlatformError> {
        let shared = Arc::new(BackendShared::new());
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);

        let thread_shared = shared.clone();
        let poller = std::thread::Builder::new()
            .name("gilrs-poller".to_string())
            .spawn(move || match GamepadPoller::create(thread_shared, commands) {
                Ok(poller) => {
                    let mut polling = poller.initialize();
                    let _ = ready_tx.send(Ok(()));
                    polling.run();
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| PlatformError::InitializationError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = poller.join();
                return Err(e);
            }
            Err(_) => {
                return Err(PlatformError::InitializationError(
                    "gamepad poller exited during startup".to_string(),
                ))
            }
        }

        Ok(Self {
            shared,
            poller: Mutex::new(Some(poller)),
        })
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn shutdown(&self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(poller) = lock(&self.poller).take() {
            if poller.join().is_err() {
                error!("Gamepad poller thread panicked");
            }
            info!("Gamepad poller stopped");
        }
    }
}

impl Drop for GilrsBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl CaptureSurfaceProvider for GilrsBackend {
    fn attach(&self, sink: InputSink) -> Result<Subscription, PlatformError> {
        if !self.is_running() {
            return Err(PlatformError::Unavailable(
                "gamepad poller is not running".to_string(),
            ));
        }

        let token = self.shared.token();
        if lock(&self.shared.sink).replace((token, sink)).is_some() {
            warn!("Replacing previously attached capture surface");
        }
        info!("Capture surface attached to gamepad poller");

        let shared = Arc::downgrade(&self.shared);
        Ok(Subscription::new(move || {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let mut slot = lock(&shared.sink);
            if slot.as_ref().is_some_and(|(current, _)| *current == token) {
                *slot = None;
                debug!("Capture surface detached");
            }
        }))
    }
}

impl DeviceMonitor for GilrsBackend {
    fn connected_devices(&self) -> Vec<InputDeviceInfo> {
        lock(&self.shared.devices).clone()
    }

    fn subscribe(&self, listener: DeviceListener) -> Subscription {
        let token = self.shared.token();
        lock(&self.shared.listeners).push((token, listener));

        let shared = Arc::downgrade(&self.shared);
        Subscription::new(move || {
            if let Some(shared) = shared.upgrade() {
                lock(&shared.listeners).retain(|(current, _)| *current != token);
            }
        })
    }
}

#[derive(Debug)]
enum Hold {
    Released,
    Indefinite,
    Until(Instant),
}

/// Desktop hosts have no wake lock to take; the hold is tracked so capture
/// can release exactly what it acquired.
#[derive(Debug)]
pub struct DesktopStayAwake {
    hold: Mutex<Hold>,
}

impl Default for DesktopStayAwake {
    fn default() -> Self {
        Self {
            hold: Mutex::new(Hold::Released),
        }
    }
}

impl StayAwake for DesktopStayAwake {
    fn acquire(&self, timeout: Option<Duration>) -> Result<(), PlatformError> {
        *lock(&self.hold) = match timeout {
            Some(timeout) => Hold::Until(Instant::now() + timeout),
            None => Hold::Indefinite,
        };
        info!("Stay-awake hold acquired (timeout: {:?})", timeout);
        Ok(())
    }

    fn release(&self) {
        *lock(&self.hold) = Hold::Released;
        info!("Stay-awake hold released");
    }

    fn is_held(&self) -> bool {
        match *lock(&self.hold) {
            Hold::Released => false,
            Hold::Indefinite => true,
            Hold::Until(deadline) => Instant::now() < deadline,
        }
    }
}

/// Rumble on every force-feedback capable controller, played by the poller.
#[derive(Debug)]
pub struct DesktopHaptics {
    commands: std_mpsc::Sender<PollerCommand>,
}

impl fmt::Debug for PollerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollerCommand::Pulse(duration) => write!(f, "Pulse({:?})", duration),
        }
    }
}

impl Haptics for DesktopHaptics {
    fn pulse(&self, duration: Duration) {
        if self.commands.send(PollerCommand::Pulse(duration)).is_err() {
            debug!("Gamepad poller gone, dropping haptic pulse");
        }
    }
}

/// Everything a capture session needs on a desktop host.
#[derive(Debug)]
pub struct DesktopPlatform {
    backend: Arc<GilrsBackend>,
    stay_awake: Arc<DesktopStayAwake>,
    haptics: Arc<DesktopHaptics>,
}

impl DesktopPlatform {
    pub fn spawn() -> Result<Self, PlatformError> {
        info!("Spawning desktop gamepad platform");
        let (commands_tx, commands_rx) = std_mpsc::channel();
        let backend = Arc::new(GilrsBackend::spawn(commands_rx)?);

        Ok(Self {
            backend,
            stay_awake: Arc::new(DesktopStayAwake::default()),
            haptics: Arc::new(DesktopHaptics {
                commands: commands_tx,
            }),
        })
    }

    pub fn backend(&self) -> &Arc<GilrsBackend> {
        &self.backend
    }

    pub fn capture_platform(&self) -> CapturePlatform {
        CapturePlatform {
            stay_awake: self.stay_awake.clone(),
            haptics: self.haptics.clone(),
            surfaces: self.backend.clone(),
            devices: self.backend.clone(),
        }
    }
}

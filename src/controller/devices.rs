//! Device Watcher
//!
//! Owns the one attached-controller state of the crate: the most recently
//! recognized external controller. Attach and detach are reported to the
//! consumer, and detach is also fanned out to hooks such as a running capture
//! session. Attaching a controller never starts capture; that stays the
//! consumer's decision.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use crate::consumer::GamepadConsumer;
use crate::controller::classifier::is_gamepad_device;
use crate::platform::{DeviceEvent, DeviceMonitor, InputDeviceInfo, Subscription};

/// Snapshot returned by the control surface's attached-device query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachedDevice {
    pub device_name: String,
    pub device_id: i32,
}

impl From<&InputDeviceInfo> for AttachedDevice {
    fn from(device: &InputDeviceInfo) -> Self {
        Self {
            device_name: device.name.clone(),
            device_id: device.id,
        }
    }
}

/// Called after the attached controller was removed and the consumer told.
pub type DetachHook = Arc<dyn Fn(&AttachedDevice) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct WatcherState {
    attached: Mutex<Option<AttachedDevice>>,
    consumer: Arc<dyn GamepadConsumer>,
    detach_hooks: Mutex<Vec<(u64, DetachHook)>>,
    next_hook: AtomicU64,
}

impl WatcherState {
    fn handle(&self, event: &DeviceEvent) {
        match event {
            DeviceEvent::Added(device) if is_gamepad_device(device.sources) => {
                self.attach(device);
            }
            DeviceEvent::Changed(device) if is_gamepad_device(device.sources) => {
                debug!("Controller {} changed", device.id);
                *lock(&self.attached) = Some(AttachedDevice::from(device));
            }
            DeviceEvent::Removed(id) => {
                let removed = {
                    let mut attached = lock(&self.attached);
                    match attached.as_ref() {
                        Some(device) if device.device_id == *id => attached.take(),
                        _ => None,
                    }
                };
                if let Some(device) = removed {
                    self.detach(&device);
                }
            }
            DeviceEvent::Added(device) | DeviceEvent::Changed(device) => {
                debug!("Ignoring non-gamepad device {} ({})", device.name, device.id);
            }
        }
    }

    fn attach(&self, device: &InputDeviceInfo) {
        info!("Controller connected: {} ({})", device.name, device.id);
        *lock(&self.attached) = Some(AttachedDevice::from(device));
        self.consumer.on_gamepad_connected(&device.name, device.id);
    }

    fn detach(&self, device: &AttachedDevice) {
        info!("Controller disconnected: {} ({})", device.device_name, device.device_id);
        self.consumer.on_gamepad_disconnected();

        // Hooks run unlocked so one may drop its own registration.
        let hooks: Vec<DetachHook> = lock(&self.detach_hooks)
            .iter()
            .map(|(_, hook)| hook.clone())
            .collect();
        for hook in hooks {
            hook(device);
        }
    }
}

pub struct DeviceWatcher {
    monitor: Arc<dyn DeviceMonitor>,
    state: Arc<WatcherState>,
    subscription: Mutex<Option<Subscription>>,
}

impl DeviceWatcher {
    pub fn new(monitor: Arc<dyn DeviceMonitor>, consumer: Arc<dyn GamepadConsumer>) -> Self {
        Self {
            monitor,
            state: Arc::new(WatcherState {
                attached: Mutex::new(None),
                consumer,
                detach_hooks: Mutex::new(Vec::new()),
                next_hook: AtomicU64::new(0),
            }),
            subscription: Mutex::new(None),
        }
    }

    /// Subscribes to device notifications, then reports the first controller
    /// already connected. Calling it again re-scans without re-subscribing.
    pub fn initialize(&self) {
        self.ensure_subscribed();
        match self.first_connected() {
            Some(device) => self.state.attach(&device),
            None => debug!("No controller connected"),
        }
    }

    /// Subscribes if not yet subscribed. A controller already connected
    /// becomes the attached one without being reported.
    pub fn ensure_subscribed(&self) {
        let mut subscription = lock(&self.subscription);
        if subscription.is_some() {
            return;
        }
        let state = self.state.clone();
        *subscription = Some(
            self.monitor
                .subscribe(Arc::new(move |event| state.handle(event))),
        );
        drop(subscription);
        info!("Gamepad detection initialized");

        if let Some(device) = self.first_connected() {
            let mut attached = lock(&self.state.attached);
            if attached.is_none() {
                debug!("Tracking controller {} ({})", device.name, device.id);
                *attached = Some(AttachedDevice::from(&device));
            }
        }
    }

    fn first_connected(&self) -> Option<InputDeviceInfo> {
        self.monitor
            .connected_devices()
            .into_iter()
            .find(|device| is_gamepad_device(device.sources))
    }

    pub fn attached_device(&self) -> Option<AttachedDevice> {
        lock(&self.state.attached).clone()
    }

    /// Registers `hook` for removals of the attached controller until the
    /// returned subscription is cancelled.
    pub fn on_detach(&self, hook: DetachHook) -> Subscription {
        let token = self.state.next_hook.fetch_add(1, Ordering::Relaxed);
        lock(&self.state.detach_hooks).push((token, hook));

        let state = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = state.upgrade() {
                lock(&state.detach_hooks).retain(|(current, _)| *current != token);
            }
        })
    }

    pub fn detach_hook_count(&self) -> usize {
        lock(&self.state.detach_hooks).len()
    }

    pub fn shutdown(&self) {
        let subscription = lock(&self.subscription).take();
        if let Some(subscription) = subscription {
            subscription.cancel();
            debug!("Gamepad detection stopped");
        }
    }
}

//! In-memory platform for exercising capture and device handling in tests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering::SeqCst};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{
    CaptureSurfaceProvider, DeviceEvent, DeviceListener, DeviceMonitor, Haptics, InputDeviceInfo,
    PlatformError, StayAwake, Subscription,
};
use crate::controller::capture_session::{CapturePlatform, EventDisposition, InputSink};
use crate::controller::codes::RawInputEvent;

#[derive(Default)]
pub struct FakeStayAwake {
    pub held: AtomicBool,
    pub fail: AtomicBool,
    pub acquires: AtomicUsize,
    pub releases: AtomicUsize,
}

impl StayAwake for FakeStayAwake {
    fn acquire(&self, _timeout: Option<Duration>) -> Result<(), PlatformError> {
        if self.fail.load(SeqCst) {
            return Err(PlatformError::Unavailable("power service missing".to_string()));
        }
        self.acquires.fetch_add(1, SeqCst);
        self.held.store(true, SeqCst);
        Ok(())
    }

    fn release(&self) {
        self.releases.fetch_add(1, SeqCst);
        self.held.store(false, SeqCst);
    }

    fn is_held(&self) -> bool {
        self.held.load(SeqCst)
    }
}

#[derive(Default)]
pub struct FakeHaptics {
    pub pulses: AtomicUsize,
}

impl Haptics for FakeHaptics {
    fn pulse(&self, _duration: Duration) {
        self.pulses.fetch_add(1, SeqCst);
    }
}

#[derive(Default)]
pub struct FakeSurfaces {
    pub deny: AtomicBool,
    sink: Arc<Mutex<Option<InputSink>>>,
    attaches: AtomicUsize,
    detaches: Arc<AtomicUsize>,
}

impl FakeSurfaces {
    pub fn attach_count(&self) -> usize {
        self.attaches.load(SeqCst)
    }

    pub fn detach_count(&self) -> usize {
        self.detaches.load(SeqCst)
    }

    /// `None` when no surface is attached.
    pub fn deliver(&self, event: &RawInputEvent) -> Option<EventDisposition> {
        let sink = self.sink.lock().unwrap().clone();
        sink.map(|sink| sink.deliver(event))
    }
}

impl CaptureSurfaceProvider for FakeSurfaces {
    fn attach(&self, sink: InputSink) -> Result<Subscription, PlatformError> {
        if self.deny.load(SeqCst) {
            return Err(PlatformError::PermissionDenied("overlay not granted".to_string()));
        }
        self.attaches.fetch_add(1, SeqCst);
        *self.sink.lock().unwrap() = Some(sink);

        let slot = self.sink.clone();
        let detaches = self.detaches.clone();
        Ok(Subscription::new(move || {
            slot.lock().unwrap().take();
            detaches.fetch_add(1, SeqCst);
        }))
    }
}

#[derive(Default)]
pub struct FakeDevices {
    devices: Mutex<Vec<InputDeviceInfo>>,
    listeners: Arc<Mutex<Vec<(u64, DeviceListener)>>>,
    next_id: AtomicU64,
}

impl FakeDevices {
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    /// Applies the event to the device list, then notifies every listener.
    pub fn emit(&self, event: DeviceEvent) {
        {
            let mut devices = self.devices.lock().unwrap();
            match &event {
                DeviceEvent::Added(device) | DeviceEvent::Changed(device) => {
                    devices.retain(|d| d.id != device.id);
                    devices.push(device.clone());
                }
                DeviceEvent::Removed(id) => devices.retain(|d| d.id != *id),
            }
        }
        let listeners: Vec<DeviceListener> = self
            .listeners
            .lock()
            .unwrap()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }
}

impl DeviceMonitor for FakeDevices {
    fn connected_devices(&self) -> Vec<InputDeviceInfo> {
        self.devices.lock().unwrap().clone()
    }

    fn subscribe(&self, listener: DeviceListener) -> Subscription {
        let id = self.next_id.fetch_add(1, SeqCst);
        self.listeners.lock().unwrap().push((id, listener));
        let listeners = self.listeners.clone();
        Subscription::new(move || {
            listeners.lock().unwrap().retain(|(other, _)| *other != id);
        })
    }
}

#[derive(Clone, Default)]
pub struct FakePlatform {
    pub stay_awake: Arc<FakeStayAwake>,
    pub haptics: Arc<FakeHaptics>,
    pub surfaces: Arc<FakeSurfaces>,
    pub devices: Arc<FakeDevices>,
}

impl FakePlatform {
    pub fn capture_platform(&self) -> CapturePlatform {
        CapturePlatform {
            stay_awake: self.stay_awake.clone(),
            haptics: self.haptics.clone(),
            surfaces: self.surfaces.clone(),
            devices: self.devices.clone(),
        }
    }
}

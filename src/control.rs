//! Control surface
//!
//! The only entry points a host or UI layer needs: start and stop discovery,
//! start and stop capture, and query the attached controller. Every start is
//! a no-op while the subsystem already runs and every stop is a no-op while
//! it is stopped.

use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use crate::config::{AppConfig, ConfigError};
use crate::consumer::GamepadConsumer;
use crate::controller::capture_session::{
    CaptureError, CapturePlatform, CaptureSession, InputSink, Lifecycle,
};
use crate::controller::devices::{AttachedDevice, DeviceWatcher};
use crate::discovery::{DiscoveryError, DiscoverySession, DiscoverySettings, InterfaceEnumerator};

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub struct ControlSurface {
    discovery_settings: DiscoverySettings,
    interfaces: Arc<dyn InterfaceEnumerator>,
    consumer: Arc<dyn GamepadConsumer>,
    discovery: Mutex<Option<DiscoverySession>>,
    capture: Arc<CaptureSession>,
    devices: Arc<DeviceWatcher>,
}

impl ControlSurface {
    pub fn new(
        config: &AppConfig,
        platform: CapturePlatform,
        interfaces: Arc<dyn InterfaceEnumerator>,
        consumer: Arc<dyn GamepadConsumer>,
    ) -> Result<Self, ControlError> {
        config.validate()?;
        let devices = Arc::new(DeviceWatcher::new(
            platform.devices.clone(),
            consumer.clone(),
        ));
        let capture = CaptureSession::new(
            config.capture_settings(),
            platform,
            devices.clone(),
            consumer.clone(),
        );

        Ok(Self {
            discovery_settings: config.discovery_settings(),
            interfaces,
            consumer,
            discovery: Mutex::new(None),
            capture,
            devices,
        })
    }

    pub async fn start_discovery(&self) -> Result<(), ControlError> {
        let mut discovery = self.discovery.lock().await;
        if discovery.as_ref().is_some_and(DiscoverySession::is_running) {
            debug!("Discovery already running, ignoring start");
            return Ok(());
        }
        if let Some(stale) = discovery.take() {
            stale.stop().await?;
        }

        let session = DiscoverySession::spawn(
            self.discovery_settings.clone(),
            self.interfaces.clone(),
            self.consumer.clone(),
        )
        .await?;
        *discovery = Some(session);
        info!("Discovery started");
        Ok(())
    }

    pub async fn stop_discovery(&self) -> Result<(), ControlError> {
        let session = self.discovery.lock().await.take();
        match session {
            Some(session) => {
                session.stop().await?;
                info!("Discovery stopped");
            }
            None => debug!("Discovery not running, ignoring stop"),
        }
        Ok(())
    }

    pub async fn is_discovery_running(&self) -> bool {
        self.discovery
            .lock()
            .await
            .as_ref()
            .is_some_and(DiscoverySession::is_running)
    }

    pub fn start_capture(&self, haptics_enabled: bool) -> Result<(), ControlError> {
        self.capture.start(haptics_enabled)?;
        Ok(())
    }

    pub fn stop_capture(&self) {
        self.capture.stop();
    }

    pub fn capture_lifecycle(&self) -> Lifecycle {
        self.capture.lifecycle()
    }

    pub fn subscribe_capture_lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.capture.subscribe_lifecycle()
    }

    /// Sink for hosts running in [`crate::controller::CaptureMode::HostSurface`].
    pub fn input_sink(&self) -> InputSink {
        self.capture.sink()
    }

    pub fn initialize_device_detection(&self) {
        self.devices.initialize();
    }

    pub fn attached_device_state(&self) -> Option<AttachedDevice> {
        self.devices.attached_device()
    }

    /// Stops capture, discovery and device detection.
    pub async fn shutdown(&self) -> Result<(), ControlError> {
        info!("Shutting down control surface");
        self.capture.stop();
        self.devices.shutdown();
        self.stop_discovery().await
    }
}

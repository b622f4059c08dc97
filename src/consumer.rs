//! Consumer callback interface
//!
//! Everything the core reports outward (discovered servers, controller
//! attach/detach, normalized input, session status) goes through a
//! [`GamepadConsumer`]. [`ChannelConsumer`] forwards the callbacks over an
//! mpsc channel so a UI task or a remote link can drain them at its own pace.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::controller::normalizer::GamepadInput;
use crate::discovery::DiscoveredServer;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceStatus {
    #[serde(rename = "STOPPED")]
    Stopped,
}

impl ServiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceStatus::Stopped => "STOPPED",
        }
    }
}

/// Receiver of everything the core reports.
///
/// `on_gamepad_input` runs on the platform's input-delivery path while the
/// capture lifecycle gate is held: it must return promptly and must not stop
/// capture synchronously.
pub trait GamepadConsumer: Send + Sync {
    fn on_server_found(&self, server: &DiscoveredServer);
    fn on_gamepad_connected(&self, device_name: &str, device_id: i32);
    fn on_gamepad_disconnected(&self);
    fn on_gamepad_input(&self, input: GamepadInput);
    fn on_service_status(&self, status: ServiceStatus);
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConsumerEvent {
    ServerFound(DiscoveredServer),
    GamepadConnected { device_name: String, device_id: i32 },
    GamepadDisconnected,
    GamepadInput(GamepadInput),
    ServiceStatus(ServiceStatus),
}

/// Forwards callbacks as [`ConsumerEvent`]s without ever blocking the caller.
#[derive(Clone, Debug)]
pub struct ChannelConsumer {
    sender: mpsc::Sender<ConsumerEvent>,
}

impl ChannelConsumer {
    pub fn new(sender: mpsc::Sender<ConsumerEvent>) -> Self {
        Self { sender }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ConsumerEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self::new(sender), receiver)
    }

    fn forward(&self, event: ConsumerEvent) {
        match self.sender.try_send(event) {
            Ok(_) => debug!("Consumer event queued"),
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("Consumer channel full, dropping {:?}", event)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Consumer channel closed, dropping event")
            }
        }
    }
}

impl GamepadConsumer for ChannelConsumer {
    fn on_server_found(&self, server: &DiscoveredServer) {
        self.forward(ConsumerEvent::ServerFound(server.clone()));
    }

    fn on_gamepad_connected(&self, device_name: &str, device_id: i32) {
        self.forward(ConsumerEvent::GamepadConnected {
            device_name: device_name.to_string(),
            device_id,
        });
    }

    fn on_gamepad_disconnected(&self) {
        self.forward(ConsumerEvent::GamepadDisconnected);
    }

    fn on_gamepad_input(&self, input: GamepadInput) {
        self.forward(ConsumerEvent::GamepadInput(input));
    }

    fn on_service_status(&self, status: ServiceStatus) {
        self.forward(ConsumerEvent::ServiceStatus(status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (consumer, mut rx) = ChannelConsumer::channel(1);
        consumer.on_gamepad_disconnected();
        consumer.on_service_status(ServiceStatus::Stopped);

        assert_eq!(rx.try_recv().unwrap(), ConsumerEvent::GamepadDisconnected);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_channel_is_tolerated() {
        let (consumer, rx) = ChannelConsumer::channel(4);
        drop(rx);
        consumer.on_gamepad_connected("Pad", 4);
    }

    #[test]
    fn status_wire_name() {
        assert_eq!(ServiceStatus::Stopped.as_str(), "STOPPED");
        assert_eq!(serde_json::to_string(&ServiceStatus::Stopped).unwrap(), "\"STOPPED\"");
    }
}

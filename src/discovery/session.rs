//! Discovery Session
//!
//! Runs the query loop and the response listener as two tokio tasks over one
//! [`DiscoveryTransport`]. Stopping cancels both; the listener is parked in
//! `recv_from` and leaves immediately, and the socket closes once both tasks
//! have dropped their handle to it.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::interfaces::InterfaceEnumerator;
use super::transport::DiscoveryTransport;
use super::{DiscoveryError, DEFAULT_INTERVAL_MS, DISCOVERY_PORT, RECV_BUFFER_SIZE};
use crate::consumer::GamepadConsumer;

/// Pause after a failed receive so a persistent socket error cannot spin.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct DiscoverySettings {
    pub port: u16,
    pub interval: Duration,
    /// Also query each interface's subnet broadcast address.
    pub multi_interface: bool,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            port: DISCOVERY_PORT,
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            multi_interface: true,
        }
    }
}

pub struct DiscoverySession {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl DiscoverySession {
    /// Binds the socket and starts both loops. The first query goes out
    /// immediately.
    pub async fn spawn(
        settings: DiscoverySettings,
        interfaces: Arc<dyn InterfaceEnumerator>,
        consumer: Arc<dyn GamepadConsumer>,
    ) -> Result<Self, DiscoveryError> {
        info!("Starting discovery session with settings: {:?}", settings);
        let transport =
            Arc::new(DiscoveryTransport::bind(settings.port, settings.multi_interface).await?);
        let cancel = CancellationToken::new();

        let send_task = tokio::spawn(run_send_loop(
            transport.clone(),
            interfaces,
            settings.interval,
            cancel.clone(),
        ));
        let recv_task = tokio::spawn(run_recv_loop(transport, consumer, cancel.clone()));

        Ok(Self {
            cancel,
            tasks: vec![send_task, recv_task],
        })
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.tasks.iter().any(|task| !task.is_finished())
    }

    /// Cancels both loops and waits for them to exit.
    pub async fn stop(mut self) -> Result<(), DiscoveryError> {
        info!("Stopping discovery session");
        self.cancel.cancel();

        let mut result = Ok(());
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Discovery task ended abnormally: {}", e);
                result = Err(DiscoveryError::Task(e.to_string()));
            }
        }
        debug!("Discovery session stopped, socket closed");
        result
    }
}

impl Drop for DiscoverySession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_send_loop(
    transport: Arc<DiscoveryTransport>,
    interfaces: Arc<dyn InterfaceEnumerator>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let report = transport.send_query(interfaces.as_ref()).await;
                ticks += 1;
                debug!(
                    "Discovery tick {}: {} destinations, {} failed",
                    ticks,
                    report.attempted(),
                    report.failed
                );
            }
        }
    }
    debug!("Discovery send loop finished after {} ticks", ticks);
}

async fn run_recv_loop(
    transport: Arc<DiscoveryTransport>,
    consumer: Arc<dyn GamepadConsumer>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = transport.recv_server(&mut buf) => match received {
                Ok(Some(server)) => {
                    info!("Server found: {} at {}", server.name, server.address);
                    consumer.on_server_found(&server);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Discovery receive failed: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECV_ERROR_BACKOFF) => {}
                    }
                }
            }
        }
    }
    debug!("Discovery receive loop finished");
}

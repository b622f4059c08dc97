//! # Network Discovery
//!
//! Best-effort UDP broadcast discovery of the companion server.
//!
//! ```text
//!                ┌── send loop ──► 255.255.255.255:27016
//! DiscoverySession                 + every interface broadcast address
//!                └── recv loop ◄── "GAMEPAD_VIRTUAL_SERVER_ACK:<name>"
//!                         │
//!                         └──► GamepadConsumer::on_server_found
//! ```
//!
//! - [`interfaces`] - broadcast addresses of every up, non-loopback interface
//! - [`transport`] - the one UDP socket, query sending and response parsing
//! - [`session`] - periodic query loop and response listener as two tasks
//!
//! Servers are not deduplicated. A server reachable over several interfaces,
//! or answering several ticks, is reported every time; repetition is how the
//! consumer sees it is still alive.

use chrono::{DateTime, Local};
use std::net::IpAddr;

pub mod interfaces;
pub mod session;
pub mod transport;

pub use interfaces::{InterfaceEnumerator, NetworkInterface, SystemInterfaces};
pub use session::{DiscoverySession, DiscoverySettings};
pub use transport::{DiscoveryTransport, SendReport};

pub const DISCOVERY_PORT: u16 = 27016;
pub const DISCOVERY_QUERY: &[u8] = b"DISCOVER_GAMEPAD_VIRTUAL_SERVER";
pub const ACK_PREFIX: &str = "GAMEPAD_VIRTUAL_SERVER_ACK:";
pub const DEFAULT_INTERVAL_MS: u64 = 3000;
pub const RECV_BUFFER_SIZE: usize = 1024;

/// A server that answered a discovery query.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscoveredServer {
    pub name: String,
    pub address: IpAddr,
    pub seen_at: DateTime<Local>,
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Failed to bind discovery socket: {0}")]
    Bind(#[source] std::io::Error),

    #[error("Failed to enable broadcast on discovery socket: {0}")]
    Broadcast(#[source] std::io::Error),

    #[error("Discovery session task failed: {0}")]
    Task(String),
}

//! Interface Enumerator
//!
//! Global broadcast is often not forwarded onto tethered or USB-shared
//! interfaces, so every tick also targets each interface's own subnet
//! broadcast address. The snapshot is taken fresh on every call.

use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use std::collections::BTreeSet;
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::{debug, warn};

/// One local interface with every IPv4 broadcast address configured on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkInterface {
    pub name: String,
    pub is_up: bool,
    pub is_loopback: bool,
    pub broadcast_addresses: Vec<Ipv4Addr>,
}

pub trait InterfaceEnumerator: Send + Sync {
    /// Deduplicated broadcast addresses of every up, non-loopback interface.
    fn list_broadcast_addresses(&self) -> BTreeSet<Ipv4Addr>;
}

/// Union of the broadcast addresses of usable interfaces.
pub fn broadcast_addresses(interfaces: &[NetworkInterface]) -> BTreeSet<Ipv4Addr> {
    interfaces
        .iter()
        .filter(|interface| interface.is_up && !interface.is_loopback)
        .flat_map(|interface| interface.broadcast_addresses.iter().copied())
        .collect()
}

/// Reads the host's interfaces through `getifaddrs`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemInterfaces;

impl SystemInterfaces {
    pub fn snapshot(&self) -> nix::Result<Vec<NetworkInterface>> {
        let mut interfaces: Vec<NetworkInterface> = Vec::new();

        for entry in getifaddrs()? {
            let index = match interfaces
                .iter()
                .position(|known| known.name == entry.interface_name)
            {
                Some(index) => index,
                None => {
                    interfaces.push(NetworkInterface {
                        name: entry.interface_name.clone(),
                        is_up: entry.flags.contains(InterfaceFlags::IFF_UP),
                        is_loopback: entry.flags.contains(InterfaceFlags::IFF_LOOPBACK),
                        broadcast_addresses: Vec::new(),
                    });
                    interfaces.len() - 1
                }
            };

            // IPv6 entries and point-to-point links carry no IPv4 broadcast.
            let broadcast = entry
                .broadcast
                .as_ref()
                .and_then(|addr| addr.as_sockaddr_in())
                .map(|sin| *SocketAddrV4::from(*sin).ip());
            match broadcast {
                Some(addr) if !addr.is_unspecified() => {
                    let known = &mut interfaces[index].broadcast_addresses;
                    if !known.contains(&addr) {
                        known.push(addr);
                    }
                }
                _ => debug!(
                    "Skipping address entry without IPv4 broadcast on {}",
                    entry.interface_name
                ),
            }
        }

        Ok(interfaces)
    }
}

impl InterfaceEnumerator for SystemInterfaces {
    fn list_broadcast_addresses(&self) -> BTreeSet<Ipv4Addr> {
        match self.snapshot() {
            Ok(interfaces) => {
                let addresses = broadcast_addresses(&interfaces);
                debug!(
                    "Found {} broadcast addresses across {} interfaces",
                    addresses.len(),
                    interfaces.len()
                );
                addresses
            }
            Err(e) => {
                warn!("Failed to enumerate network interfaces: {}", e);
                BTreeSet::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interface(name: &str, up: bool, loopback: bool, addrs: &[[u8; 4]]) -> NetworkInterface {
        NetworkInterface {
            name: name.to_string(),
            is_up: up,
            is_loopback: loopback,
            broadcast_addresses: addrs.iter().map(|a| Ipv4Addr::from(*a)).collect(),
        }
    }

    #[test]
    fn skips_down_and_loopback_and_dedups() {
        let interfaces = vec![
            interface("lo", true, true, &[[127, 255, 255, 255]]),
            interface("wlan0", true, false, &[[192, 168, 1, 255]]),
            interface("rndis0", true, false, &[[192, 168, 42, 255], [192, 168, 1, 255]]),
            interface("eth0", false, false, &[[10, 0, 0, 255]]),
            interface("tun0", true, false, &[]),
        ];

        let addresses = broadcast_addresses(&interfaces);

        assert_eq!(
            addresses.into_iter().collect::<Vec<_>>(),
            vec![Ipv4Addr::new(192, 168, 1, 255), Ipv4Addr::new(192, 168, 42, 255)]
        );
    }

    #[test]
    fn system_enumeration_never_fails() {
        // Whatever the host looks like, the call yields a set and no loopback broadcast.
        let addresses = SystemInterfaces.list_broadcast_addresses();
        assert!(addresses.iter().all(|addr| !addr.is_loopback()));
    }

    #[test]
    fn snapshot_groups_entries_by_interface() {
        let Ok(interfaces) = SystemInterfaces.snapshot() else {
            return;
        };
        let mut names: Vec<&str> = interfaces.iter().map(|i| i.name.as_str()).collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }
}

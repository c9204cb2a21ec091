use std::net::Ipv4Addr;
use if_addrs::{get_if_addrs, IfAddr};
use shared::types::NetworkInfo;

/// Source of the host's local address and mask.
pub trait NetworkInfoSource: Send + Sync {
    fn resolve(&self) -> Option<NetworkInfo>;
}

/// Reads interfaces from the OS. An optional interface name pins the choice;
/// otherwise the first non-loopback IPv4 interface wins.
pub struct SystemNetwork {
    interface: Option<String>,
}

impl SystemNetwork {
    pub fn new(interface: Option<String>) -> Self {
        Self { interface }
    }
}

impl NetworkInfoSource for SystemNetwork {
    fn resolve(&self) -> Option<NetworkInfo> {
        let interfaces = match get_if_addrs() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                tracing::warn!("Failed to list network interfaces: {}", e);
                return None;
            }
        };

        let chosen = interfaces.into_iter().find_map(|iface| {
            if iface.is_loopback() {
                return None;
            }
            if let Some(wanted) = &self.interface {
                if &iface.name != wanted {
                    return None;
                }
            }
            match iface.addr {
                IfAddr::V4(v4) => Some((iface.name, v4.ip, v4.netmask)),
                IfAddr::V6(_) => None,
            }
        });

        match chosen {
            Some((name, ip, netmask)) => {
                tracing::debug!("Using interface {} ({}/{})", name, ip, netmask);
                Some(NetworkInfo {
                    local_address: ip.to_string(),
                    subnet_mask: netmask.to_string(),
                    gateway: guess_gateway(ip, netmask).to_string(),
                })
            }
            None => {
                tracing::warn!("No IPv4 interface found (wanted {:?})", self.interface);
                None
            }
        }
    }
}

/// The first host address of the subnet, which is where home routers sit.
pub fn guess_gateway(ip: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    let network = u32::from(ip) & u32::from(netmask);
    Ipv4Addr::from(network.saturating_add(1))
}

/// Network info for the API: resolved, or the documented defaults.
pub fn network_info_or_fallback(source: &dyn NetworkInfoSource) -> NetworkInfo {
    source.resolve().unwrap_or_else(NetworkInfo::fallback)
}

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::pin::Pin;
use std::time::Duration;
use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::Future;
use shared::protocol::ANNOUNCEMENT_SERVICE_TYPES;
use shared::types::{Device, DeviceType};

/// Passive discovery. Implementations must return once `window` has elapsed.
#[async_trait]
pub trait AnnouncementSource: Send + Sync {
    async fn listen(&self, window: Duration) -> Vec<Device>;
}

type RecvResult = (usize, flume::Receiver<ServiceEvent>, std::result::Result<ServiceEvent, flume::RecvError>);
type RecvFuture = Pin<Box<dyn Future<Output = RecvResult> + Send>>;

/// Each future owns a clone of the receiver; flume receivers are Clone.
fn make_recv_future(idx: usize, rx: flume::Receiver<ServiceEvent>) -> RecvFuture {
    Box::pin(async move {
        let result = rx.recv_async().await;
        (idx, rx, result)
    })
}

/// A resolved announcement, detached from mdns-sd types.
#[derive(Debug, Clone)]
pub struct Announcement {
    pub service_type: String,
    pub fullname: String,
    pub addresses: Vec<IpAddr>,
    pub txt: HashMap<String, String>,
}

impl Announcement {
    fn from_info(info: &mdns_sd::ServiceInfo) -> Self {
        Self {
            service_type: info.get_type().to_string(),
            fullname: info.get_fullname().to_string(),
            addresses: info.get_addresses().iter().copied().collect(),
            txt: info
                .get_properties()
                .iter()
                .map(|prop| (prop.key().to_string(), prop.val_str().to_string()))
                .collect(),
        }
    }

    /// Instance label: the full name without the service-type suffix.
    pub fn instance_name(&self) -> &str {
        self.fullname
            .strip_suffix(&self.service_type)
            .map(|name| name.trim_end_matches('.'))
            .filter(|name| !name.is_empty())
            .unwrap_or(self.fullname.as_str())
    }

    /// Lowest IPv4 address, for a stable pick when several are announced.
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        self.addresses
            .iter()
            .filter_map(|addr| match addr {
                IpAddr::V4(v4) => Some(*v4),
                IpAddr::V6(_) => None,
            })
            .min()
    }

    pub fn into_device(self, protocol: Option<&str>) -> Option<Device> {
        let Some(address) = self.ipv4() else {
            tracing::debug!("Skipping announcement {} - no IPv4 address", self.fullname);
            return None;
        };
        let name = self.instance_name().to_string();

        let device_type = self
            .txt
            .get("type")
            .and_then(|t| DeviceType::from_keywords(t))
            .or_else(|| DeviceType::from_keywords(&name))
            .unwrap_or(match protocol {
                Some("philips-hue") => DeviceType::Bridge,
                Some(_) => DeviceType::Light,
                None => DeviceType::Unknown,
            });

        Some(Device::new(protocol, address.to_string(), name, device_type))
    }
}

/// Keep one record per address, preferring one that carries a protocol.
fn collect(found: &mut HashMap<String, Device>, device: Device) {
    match found.get(&device.address) {
        Some(existing) if existing.protocol.is_some() && device.protocol.is_none() => {}
        _ => {
            found.insert(device.address.clone(), device);
        }
    }
}

/// mdns-sd backed listener. Without a daemon (e.g. multicast unavailable) it
/// returns nothing immediately.
///
/// Browses on one daemon share a service type, so listens run one at a time;
/// otherwise the first to finish would stop the other's browse.
pub struct MdnsListener {
    daemon: Option<ServiceDaemon>,
    in_flight: tokio::sync::Mutex<()>,
}

impl MdnsListener {
    pub fn new(daemon: Option<ServiceDaemon>) -> Self {
        Self { daemon, in_flight: tokio::sync::Mutex::new(()) }
    }
}

#[async_trait]
impl AnnouncementSource for MdnsListener {
    async fn listen(&self, window: Duration) -> Vec<Device> {
        let Some(daemon) = &self.daemon else {
            return Vec::new();
        };
        let _guard = self.in_flight.lock().await;

        let mut browsing = Vec::new();
        let mut futures: FuturesUnordered<RecvFuture> = FuturesUnordered::new();
        for (idx, (service_type, _)) in ANNOUNCEMENT_SERVICE_TYPES.iter().enumerate() {
            match daemon.browse(service_type) {
                Ok(receiver) => {
                    browsing.push(*service_type);
                    futures.push(make_recv_future(idx, receiver));
                }
                Err(e) => {
                    tracing::error!("Failed to browse {}: {}", service_type, e);
                }
            }
        }

        let mut found = HashMap::new();
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,

                Some((idx, rx, result)) = futures.next() => {
                    match result {
                        Ok(ServiceEvent::ServiceResolved(info)) => {
                            let protocol = ANNOUNCEMENT_SERVICE_TYPES[idx].1;
                            if let Some(device) = Announcement::from_info(&info).into_device(protocol) {
                                tracing::debug!("Announced: {} at {}", device.name, device.address);
                                collect(&mut found, device);
                            }
                            futures.push(make_recv_future(idx, rx));
                        }
                        Ok(_) => {
                            futures.push(make_recv_future(idx, rx));
                        }
                        Err(e) => {
                            tracing::warn!("Receiver {} disconnected: {}", idx, e);
                        }
                    }
                }
            }
        }

        for service_type in browsing {
            if let Err(e) = daemon.stop_browse(service_type) {
                tracing::debug!("Failed to stop browsing {}: {}", service_type, e);
            }
        }

        let devices: Vec<Device> = found.into_values().collect();
        tracing::info!("Passive discovery heard {} device(s)", devices.len());
        devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announcement(fullname: &str, service_type: &str, addresses: &[&str]) -> Announcement {
        Announcement {
            service_type: service_type.to_string(),
            fullname: fullname.to_string(),
            addresses: addresses.iter().map(|a| a.parse().unwrap()).collect(),
            txt: HashMap::new(),
        }
    }

    #[test]
    fn test_hue_announcement_becomes_bridge() {
        let device = announcement("Philips Hue - 1A2B3C._hue._tcp.local.", "_hue._tcp.local.", &["192.168.1.20"])
            .into_device(Some("philips-hue"))
            .unwrap();
        assert_eq!(device.name, "Philips Hue - 1A2B3C");
        assert_eq!(device.device_type, DeviceType::Bridge);
        assert_eq!(device.id, "philips-hue-192-168-1-20");
    }

    #[test]
    fn test_type_from_service_name_keywords() {
        let device = announcement("Ceiling Fan._http._tcp.local.", "_http._tcp.local.", &["192.168.1.21"])
            .into_device(None)
            .unwrap();
        assert_eq!(device.device_type, DeviceType::Fan);
        assert_eq!(device.protocol, None);
        assert_eq!(device.id, "mdns-192-168-1-21");
        assert!(!device.is_controllable());
    }

    #[test]
    fn test_txt_type_hint_wins() {
        let mut a = announcement("shellydimmer-AABB._shelly._tcp.local.", "_shelly._tcp.local.", &["192.168.1.22"]);
        a.txt.insert("type".to_string(), "fan".to_string());
        assert_eq!(a.into_device(Some("shelly")).unwrap().device_type, DeviceType::Fan);
    }

    #[test]
    fn test_ipv6_only_announcement_is_skipped() {
        let a = announcement("Lamp._hap._tcp.local.", "_hap._tcp.local.", &["fe80::1"]);
        assert!(a.into_device(None).is_none());
    }

    #[test]
    fn test_ipv4_pick_is_stable() {
        let a = announcement("Lamp._hap._tcp.local.", "_hap._tcp.local.", &["fe80::1", "192.168.1.40", "192.168.1.9"]);
        assert_eq!(a.ipv4(), Some(Ipv4Addr::new(192, 168, 1, 9)));
    }

    #[test]
    fn test_tagged_record_beats_untagged_at_same_address() {
        let mut found = HashMap::new();
        collect(&mut found, Device::new(Some("shelly"), "192.168.1.5", "Plug", DeviceType::Light));
        collect(&mut found, Device::new(None, "192.168.1.5", "Plug", DeviceType::Unknown));
        assert_eq!(found.len(), 1);
        assert_eq!(found["192.168.1.5"].protocol.as_deref(), Some("shelly"));
    }

    #[tokio::test]
    async fn test_without_daemon_returns_immediately() {
        let listener = MdnsListener::new(None);
        let started = std::time::Instant::now();
        assert!(listener.listen(Duration::from_secs(3)).await.is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_overlapping_listens_take_turns() {
        // Multicast may be unavailable in the build environment
        let Ok(daemon) = ServiceDaemon::new() else {
            return;
        };
        let listener = MdnsListener::new(Some(daemon.clone()));
        let window = Duration::from_millis(150);

        let started = std::time::Instant::now();
        tokio::join!(listener.listen(window), listener.listen(window));
        assert!(started.elapsed() >= window * 2, "listens overlapped");

        let _ = daemon.shutdown();
    }
}

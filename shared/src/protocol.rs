/// mDNS service type for scanner self-advertisement
pub const SCANNER_SERVICE_TYPE: &str = "_device-scanner._tcp.local.";

/// TXT record key carrying the control API port
pub const TXT_API_PORT: &str = "api";

/// Default control API port
pub const DEFAULT_API_PORT: u16 = 3001;

/// Upper bound on probe targets per scan pass
pub const DEFAULT_MAX_CANDIDATES: usize = 100;

/// Simultaneous vendor classifications in flight
pub const DEFAULT_SCAN_CONCURRENCY: usize = 10;

/// Scan range used when local network info is missing or malformed
pub const FALLBACK_RANGE_PREFIX: [u8; 3] = [192, 168, 1];
pub const FALLBACK_RANGE_FIRST: u8 = 1;
pub const FALLBACK_RANGE_LAST: u8 = 100;

pub const FALLBACK_LOCAL_ADDRESS: &str = "192.168.1.100";
pub const FALLBACK_SUBNET_MASK: &str = "255.255.255.0";
pub const FALLBACK_GATEWAY: &str = "192.168.1.1";

/// Service types watched during passive discovery, paired with the
/// protocol tag a match implies. The generic HTTP entry carries no tag.
pub const ANNOUNCEMENT_SERVICE_TYPES: &[(&str, Option<&str>)] = &[
    ("_hue._tcp.local.", Some("philips-hue")),
    ("_wiz._udp.local.", Some("philips-wiz")),
    ("_shelly._tcp.local.", Some("shelly")),
    ("_miio._udp.local.", Some("xiaomi")),
    ("_lifx._udp.local.", Some("lifx")),
    ("_tuya._tcp.local.", Some("tuya")),
    ("_hap._tcp.local.", None),
    ("_http._tcp.local.", None),
];

/// API paths
pub const API_NETWORK_INFO: &str = "/api/network-info";
pub const API_SCAN_NETWORK: &str = "/api/scan-network";
pub const API_DEVICE_CONTROL: &str = "/api/device/control";
pub const API_DEVICES: &str = "/api/devices";
pub const API_DEVICES_HASH: &str = "/api/devices/hash";
pub const API_CACHE: &str = "/api/cache";

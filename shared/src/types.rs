use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// Device categories. Drives which control affordances are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Light,
    Fan,
    Ac,
    Tv,
    Refrigerator,
    Bridge,
    #[serde(other)]
    Unknown,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Light => "light",
            DeviceType::Fan => "fan",
            DeviceType::Ac => "ac",
            DeviceType::Tv => "tv",
            DeviceType::Refrigerator => "refrigerator",
            DeviceType::Bridge => "bridge",
            DeviceType::Unknown => "unknown",
        }
    }

    /// Guess a device type from free text such as a model or service name.
    pub fn from_keywords(text: &str) -> Option<DeviceType> {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let has_word = |candidates: &[&str]| words.iter().any(|w| candidates.contains(w));
        let has_substr = |candidates: &[&str]| candidates.iter().any(|c| lower.contains(c));

        if has_substr(&["light", "bulb", "lamp", "strip", "dimmer"]) || has_word(&["led", "rgbw"]) {
            Some(DeviceType::Light)
        } else if has_substr(&["fan"]) {
            Some(DeviceType::Fan)
        } else if has_substr(&["aircon", "air conditioner", "climate", "thermostat", "hvac"])
            || has_word(&["ac"])
        {
            Some(DeviceType::Ac)
        } else if has_substr(&["television", "webos", "tizen"]) || has_word(&["tv"]) {
            Some(DeviceType::Tv)
        } else if has_substr(&["fridge", "refrigerator"]) {
            Some(DeviceType::Refrigerator)
        } else if has_substr(&["bridge", "hub", "gateway"]) {
            Some(DeviceType::Bridge)
        } else {
            None
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discovered smart-home device.
/// This is the canonical data model used by the scanner daemon, API, and client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Derived from (protocol, address), stable across scans
    pub id: String,

    pub name: String,

    #[serde(rename = "type")]
    pub device_type: DeviceType,

    /// IPv4 dotted-quad
    pub address: String,

    /// Vendor dialect tag, e.g. "tasmota". Absent means observable only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    #[serde(default)]
    pub power_state: bool,

    /// Brightness 1-100 or fan speed 1-5, depending on type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalar_value: Option<f64>,

    /// Climate-control setpoint in °C
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    pub last_seen: DateTime<Utc>,

    /// Lookup key of the durable copy once adopted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_link_id: Option<String>,
}

impl Device {
    pub fn derive_id(protocol: Option<&str>, address: &str) -> String {
        format!("{}-{}", protocol.unwrap_or("mdns"), address.replace('.', "-"))
    }

    pub fn new(
        protocol: Option<&str>,
        address: impl Into<String>,
        name: impl Into<String>,
        device_type: DeviceType,
    ) -> Self {
        let address = address.into();
        Self {
            id: Self::derive_id(protocol, &address),
            name: name.into(),
            device_type,
            address,
            protocol: protocol.map(str::to_string),
            power_state: false,
            scalar_value: None,
            temperature: None,
            last_seen: Utc::now(),
            cloud_link_id: None,
        }
    }

    pub fn is_controllable(&self) -> bool {
        self.protocol.is_some()
    }

    /// Fold a freshly read state into this record.
    pub fn apply_state(&mut self, state: &DeviceState) {
        self.power_state = state.power;
        if let Some(value) = state.value {
            self.scalar_value = Some(value);
        }
        if let Some(temperature) = state.temperature {
            self.temperature = Some(temperature);
        }
    }

    pub fn apply_patch(&mut self, patch: &DevicePatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(power) = patch.power_state {
            self.power_state = power;
        }
        if let Some(value) = patch.scalar_value {
            self.scalar_value = Some(value);
        }
        if let Some(temperature) = patch.temperature {
            self.temperature = Some(temperature);
        }
        if let Some(link) = &patch.cloud_link_id {
            self.cloud_link_id = Some(link.clone());
        }
    }
}

/// Order devices by IPv4 address, numerically. Unparseable addresses sort last.
pub fn sort_by_address(devices: &mut [Device]) {
    devices.sort_by_key(|d| {
        (
            d.address.parse::<std::net::Ipv4Addr>().map(u32::from).unwrap_or(u32::MAX),
            d.address.clone(),
        )
    });
}

/// Partial update merged into a cached device after a control action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_state: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalar_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_link_id: Option<String>,
}

/// Best-effort state read from a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub power: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// A cached device plus the time it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub device: Device,
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        now - self.cached_at > retention
    }
}

/// Local network parameters used to compute the scan range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    pub local_address: String,
    pub subnet_mask: String,
    pub gateway: String,
}

impl NetworkInfo {
    /// Substituted whenever the host's interfaces cannot be read.
    pub fn fallback() -> Self {
        Self {
            local_address: crate::protocol::FALLBACK_LOCAL_ADDRESS.to_string(),
            subnet_mask: crate::protocol::FALLBACK_SUBNET_MASK.to_string(),
            gateway: crate::protocol::FALLBACK_GATEWAY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlAction {
    #[serde(rename = "setState")]
    SetState,
    #[serde(rename = "setBrightness")]
    SetBrightness,
    #[serde(rename = "setSpeed")]
    SetSpeed,
    #[serde(rename = "setTemperature")]
    SetTemperature,
    #[serde(rename = "setProperty")]
    SetProperty,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Property name for setProperty: brightness, speed, temperature, color
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
}

/// Body of `POST /api/device/control`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub address: String,
    pub id: String,
    #[serde(default)]
    pub protocol: Option<String>,
    pub action: ControlAction,
    #[serde(default)]
    pub params: ControlParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DevicePatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ControlResponse {
    pub fn ok(data: DevicePatch) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(error.into()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_id_is_deterministic() {
        let a = Device::derive_id(Some("tasmota"), "192.168.1.102");
        let b = Device::derive_id(Some("tasmota"), "192.168.1.102");
        assert_eq!(a, b);
        assert_eq!(a, "tasmota-192-168-1-102");
        assert_ne!(a, Device::derive_id(Some("shelly"), "192.168.1.102"));
    }

    #[test]
    fn test_keyword_inference() {
        assert_eq!(DeviceType::from_keywords("Kitchen Bulb"), Some(DeviceType::Light));
        assert_eq!(DeviceType::from_keywords("Bedroom Fan"), Some(DeviceType::Fan));
        assert_eq!(DeviceType::from_keywords("Living room AC"), Some(DeviceType::Ac));
        assert_eq!(DeviceType::from_keywords("zhimi.aircondition.v1"), Some(DeviceType::Ac));
        assert_eq!(DeviceType::from_keywords("Hue Bridge"), Some(DeviceType::Bridge));
        assert_eq!(DeviceType::from_keywords("LG TV"), Some(DeviceType::Tv));
        // "ac" inside a word is not an air conditioner
        assert_eq!(DeviceType::from_keywords("Jacuzzi pump"), None);
    }

    #[test]
    fn test_device_wire_format() {
        let mut device = Device::new(Some("philips-wiz"), "192.168.1.101", "Desk", DeviceType::Light);
        device.scalar_value = Some(40.0);
        let json = serde_json::to_value(&device).unwrap();

        assert_eq!(json["type"], "light");
        assert_eq!(json["powerState"], false);
        assert_eq!(json["scalarValue"], 40.0);
        assert!(json.get("temperature").is_none());
        assert!(json.get("cloudLinkId").is_none());
    }

    #[test]
    fn test_control_request_parses() {
        let body = r#"{"address":"192.168.1.5","id":"tasmota-192-168-1-5","protocol":"tasmota",
                       "action":"setBrightness","params":{"value":55}}"#;
        let req: ControlRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.action, ControlAction::SetBrightness);
        assert_eq!(req.params.value, Some(55.0));
        assert_eq!(req.params.state, None);
    }

    #[test]
    fn test_sort_by_address_is_numeric() {
        let mut devices = vec![
            Device::new(None, "192.168.1.20", "b", DeviceType::Light),
            Device::new(None, "192.168.1.3", "a", DeviceType::Light),
            Device::new(None, "not-an-ip", "c", DeviceType::Light),
        ];
        sort_by_address(&mut devices);
        let order: Vec<&str> = devices.iter().map(|d| d.address.as_str()).collect();
        assert_eq!(order, vec!["192.168.1.3", "192.168.1.20", "not-an-ip"]);
    }

    #[test]
    fn test_patch_leaves_other_fields() {
        let mut device = Device::new(Some("tuya"), "10.0.0.9", "Plug", DeviceType::Light);
        device.scalar_value = Some(30.0);
        let before = device.clone();

        device.apply_patch(&DevicePatch { power_state: Some(true), ..Default::default() });

        assert!(device.power_state);
        assert_eq!(device.scalar_value, before.scalar_value);
        assert_eq!(device.name, before.name);
        assert_eq!(device.id, before.id);
    }
}

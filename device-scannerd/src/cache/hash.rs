use serde::Serialize;
use sha2::{Sha256, Digest};
use shared::types::{Device, DeviceType};

/// Hash only what a UI renders. `lastSeen` moves on every scan without the
/// device list meaningfully changing.
#[derive(Serialize)]
struct HashView<'a> {
    id: &'a str,
    name: &'a str,
    device_type: DeviceType,
    address: &'a str,
    protocol: Option<&'a str>,
    power_state: bool,
    scalar_value: Option<f64>,
    temperature: Option<f64>,
    cloud_link_id: Option<&'a str>,
}

/// SHA-256 of the device list, independent of input order.
pub fn compute_hash(devices: &[Device]) -> String {
    let mut indices: Vec<usize> = (0..devices.len()).collect();
    indices.sort_by(|&a, &b| devices[a].id.cmp(&devices[b].id));

    let views: Vec<HashView<'_>> = indices
        .iter()
        .map(|&i| {
            let d = &devices[i];
            HashView {
                id: &d.id,
                name: &d.name,
                device_type: d.device_type,
                address: &d.address,
                protocol: d.protocol.as_deref(),
                power_state: d.power_state,
                scalar_value: d.scalar_value,
                temperature: d.temperature,
                cloud_link_id: d.cloud_link_id.as_deref(),
            }
        })
        .collect();

    // Plain structs of strings and numbers always serialize
    let json = serde_json::to_string(&views).unwrap_or_default();

    let hash = Sha256::digest(json.as_bytes());
    hex::encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn test_device(address: &str) -> Device {
        Device::new(Some("philips-wiz"), address, "Desk", DeviceType::Light)
    }

    #[test]
    fn test_hash_deterministic() {
        let a = test_device("192.168.1.10");
        let b = test_device("192.168.1.11");

        let hash1 = compute_hash(&[a.clone(), b.clone()]);
        let hash2 = compute_hash(&[b, a]);

        assert_eq!(hash1, hash2, "Hash should be same regardless of input order");
    }

    #[test]
    fn test_hash_changes_on_state_change() {
        let a = test_device("192.168.1.10");
        let mut b = a.clone();
        b.power_state = true;

        assert_ne!(compute_hash(&[a]), compute_hash(&[b]));
    }

    #[test]
    fn test_hash_stable_across_last_seen() {
        let a = test_device("192.168.1.10");
        let mut b = a.clone();
        b.last_seen = Utc::now() + chrono::Duration::seconds(60);

        assert_eq!(compute_hash(&[a]), compute_hash(&[b]));
    }
}

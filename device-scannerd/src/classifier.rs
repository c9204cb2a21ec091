use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use shared::types::Device;
use crate::transport::{Endpoint, HttpTransport};
use crate::vendor::PROBE_ORDER;

/// Runs the vendor probes against one address in [`PROBE_ORDER`]. The first
/// structural match is authoritative; later probes are never consulted.
#[derive(Clone)]
pub struct VendorClassifier {
    http: Arc<dyn HttpTransport>,
    port: u16,
    timeout: Duration,
}

impl VendorClassifier {
    pub fn new(http: Arc<dyn HttpTransport>, port: u16, timeout: Duration) -> Self {
        Self { http, port, timeout }
    }

    pub fn endpoint(&self, address: Ipv4Addr) -> Endpoint {
        Endpoint::new(self.http.clone(), address, self.port, self.timeout)
    }

    pub async fn classify(&self, address: Ipv4Addr) -> Option<Device> {
        let ep = self.endpoint(address);
        for vendor in PROBE_ORDER {
            if let Some(device) = vendor.probe(&ep).await {
                tracing::info!("{} identified as {} ({})", address, vendor.tag(), device.device_type);
                return Some(device);
            }
        }
        tracing::debug!("{} matched no vendor signature", address);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::types::DeviceType;
    use crate::test_support::MockTransport;

    fn classifier(http: Arc<MockTransport>) -> VendorClassifier {
        VendorClassifier::new(http, 80, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_classification_is_idempotent() {
        let http = MockTransport::new();
        http.respond_json(
            "192.168.1.30",
            "/shelly",
            json!({"type": "SHSW-25", "mac": "AABBCCDDEEFF", "name": "Porch fan"}),
        );
        let classifier = classifier(http);
        let address: Ipv4Addr = "192.168.1.30".parse().unwrap();

        let first = classifier.classify(address).await.unwrap();
        let second = classifier.classify(address).await.unwrap();
        assert_eq!(first.protocol, second.protocol);
        assert_eq!(first.device_type, second.device_type);
        assert_eq!(first.id, second.id);
        assert_eq!(first.device_type, DeviceType::Fan);
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let http = MockTransport::new();
        // Answers both the WiZ and the Hue signature
        http.respond_json("192.168.1.31", "/api/getSystemConfig", json!({"result": {"moduleName": "ESP01_SHRGB"}}));
        http.respond_json("192.168.1.31", "/api/config", json!({"bridgeid": "001788FFFE", "name": "Hue"}));
        let classifier = classifier(http.clone());

        let device = classifier.classify("192.168.1.31".parse().unwrap()).await.unwrap();
        assert_eq!(device.protocol.as_deref(), Some("philips-wiz"));
        assert!(http.requests().iter().all(|r| r.path != "/api/config"));
    }

    #[tokio::test]
    async fn test_generic_ok_is_not_a_match() {
        let http = MockTransport::new();
        // A router that answers 200 with HTML everywhere
        for path in ["/api/getSystemConfig", "/api/config", "/shelly", "/api/info", "/api/device"] {
            http.respond("192.168.1.1", path, 200, "<html>login</html>");
        }
        assert!(classifier(http).classify("192.168.1.1".parse().unwrap()).await.is_none());
    }

    #[tokio::test]
    async fn test_dead_address_yields_nothing() {
        let http = MockTransport::new();
        let classifier = classifier(http.clone());
        assert!(classifier.classify("192.168.1.99".parse().unwrap()).await.is_none());
        // every signature was tried once
        assert_eq!(http.requests().len(), PROBE_ORDER.len());
    }
}

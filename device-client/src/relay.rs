use std::time::Duration;
use anyhow::{Context, Result};
use serde_json::json;
use shared::protocol::{API_DEVICE_CONTROL, API_SCAN_NETWORK};
use shared::types::{ControlRequest, ControlResponse, Device};

/// HTTP client for a running device-scannerd.
pub struct Relay {
    base_url: String,
    http: reqwest::Client,
}

impl Relay {
    /// `timeout` bounds each call and must cover a full scan pass.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .context("Failed to build relay client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn scan(&self, force: bool) -> Result<Vec<Device>> {
        let url = format!("{}{}?force={}", self.base_url, API_SCAN_NETWORK, force);
        let devices = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Relay scan at {} failed", url))?
            .error_for_status()?
            .json()
            .await
            .context("Relay returned a malformed device list")?;
        Ok(devices)
    }

    /// An `Err` means the relay itself could not be used. A device that
    /// refused the command comes back as an unsuccessful response.
    pub async fn control(&self, request: &ControlRequest) -> Result<ControlResponse> {
        let url = format!("{}{}", self.base_url, API_DEVICE_CONTROL);
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .with_context(|| format!("Relay control at {} failed", url))?
            .error_for_status()?
            .json()
            .await
            .context("Relay returned a malformed control response")?;
        Ok(response)
    }

    pub async fn set_cloud_link(&self, id: &str, cloud_link_id: &str) -> Result<()> {
        let url = format!("{}/api/devices/{}/cloud-link", self.base_url, id);
        self.http
            .put(&url)
            .json(&json!({ "cloudLinkId": cloud_link_id }))
            .send()
            .await
            .with_context(|| format!("Relay link at {} failed", url))?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let relay = Relay::new("http://10.0.0.2:3001/", Duration::from_secs(1)).unwrap();
        assert_eq!(relay.base_url(), "http://10.0.0.2:3001");
    }
}

//! Control actions: validate a request, dispatch it to the device's handler
//! with bounded retry, and describe the resulting state change.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use shared::types::{ControlAction, ControlRequest, ControlResponse, DevicePatch};
use crate::config::ControlConfig;
use crate::registry::ProtocolHandlerRegistry;
use crate::transport::{Endpoint, HttpTransport};
use crate::vendor::Property;

#[derive(Debug, Error, PartialEq)]
pub enum ControlError {
    #[error("invalid device address {0:?}")]
    InvalidAddress(String),
    #[error("{action} requires params.{param}")]
    MissingParam { action: &'static str, param: &'static str },
    #[error("unknown property {0:?}")]
    UnknownProperty(String),
    #[error("device {0} has no protocol and can only be observed")]
    NotControllable(String),
    #[error("device {id} did not accept the command after {attempts} attempts")]
    Rejected { id: String, attempts: u32 },
}

/// What a validated request will do.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Command {
    Power(bool),
    Set(Property, f64),
}

fn action_name(action: ControlAction) -> &'static str {
    match action {
        ControlAction::SetState => "setState",
        ControlAction::SetBrightness => "setBrightness",
        ControlAction::SetSpeed => "setSpeed",
        ControlAction::SetTemperature => "setTemperature",
        ControlAction::SetProperty => "setProperty",
    }
}

fn command_for(request: &ControlRequest) -> Result<Command, ControlError> {
    let action = action_name(request.action);
    let value = || {
        request
            .params
            .value
            .ok_or(ControlError::MissingParam { action, param: "value" })
    };
    let property = match request.action {
        ControlAction::SetState => {
            let on = request
                .params
                .state
                .ok_or(ControlError::MissingParam { action, param: "state" })?;
            return Ok(Command::Power(on));
        }
        ControlAction::SetBrightness => Property::Brightness,
        ControlAction::SetSpeed => Property::Speed,
        ControlAction::SetTemperature => Property::Temperature,
        ControlAction::SetProperty => {
            let name = request
                .params
                .property
                .as_deref()
                .ok_or(ControlError::MissingParam { action, param: "property" })?;
            Property::parse(name).ok_or_else(|| ControlError::UnknownProperty(name.to_string()))?
        }
    };
    Ok(Command::Set(property, property.clamp(value()?)))
}

fn patch_for(command: Command) -> DevicePatch {
    match command {
        Command::Power(on) => DevicePatch { power_state: Some(on), ..Default::default() },
        Command::Set(Property::Brightness | Property::Speed, value) => {
            DevicePatch { scalar_value: Some(value), ..Default::default() }
        }
        Command::Set(Property::Temperature, value) => {
            DevicePatch { temperature: Some(value), ..Default::default() }
        }
        Command::Set(Property::Color, _) => DevicePatch::default(),
    }
}

#[derive(Clone)]
pub struct ControlService {
    http: Arc<dyn HttpTransport>,
    registry: ProtocolHandlerRegistry,
    device_port: u16,
    config: ControlConfig,
}

impl ControlService {
    pub fn new(http: Arc<dyn HttpTransport>, device_port: u16, config: ControlConfig) -> Self {
        Self {
            http,
            registry: ProtocolHandlerRegistry,
            device_port,
            config,
        }
    }

    /// Never fails; errors are reported inside the response.
    pub async fn execute(&self, request: &ControlRequest) -> ControlResponse {
        match self.try_execute(request).await {
            Ok(patch) => ControlResponse::ok(patch),
            Err(e) => {
                tracing::warn!("Control {} on {} failed: {}", action_name(request.action), request.id, e);
                ControlResponse::failed(e.to_string())
            }
        }
    }

    pub async fn try_execute(&self, request: &ControlRequest) -> Result<DevicePatch, ControlError> {
        let host: Ipv4Addr = request
            .address
            .trim()
            .parse()
            .map_err(|_| ControlError::InvalidAddress(request.address.clone()))?;
        let tag = request
            .protocol
            .as_deref()
            .ok_or_else(|| ControlError::NotControllable(request.id.clone()))?;
        let command = command_for(request)?;

        let handler = self.registry.handler(tag);
        let ep = Endpoint::new(
            self.http.clone(),
            host,
            self.device_port,
            Duration::from_millis(self.config.timeout_ms),
        );

        let attempts = self.config.retry_attempts.max(1);
        for attempt in 1..=attempts {
            let accepted = match command {
                Command::Power(on) => handler.set_power(&ep, &request.id, on).await,
                Command::Set(property, value) => handler.set_property(&ep, &request.id, property, value).await,
            };
            if accepted {
                tracing::info!("{} applied {:?} via {}", request.id, command, tag);
                return Ok(patch_for(command));
            }
            tracing::debug!("{} rejected {:?} (attempt {}/{})", request.id, command, attempt, attempts);
            if attempt < attempts {
                tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
            }
        }

        Err(ControlError::Rejected { id: request.id.clone(), attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::types::ControlParams;
    use crate::test_support::MockTransport;
    use crate::transport::HttpRequest;
    use crate::vendor::{Vendor, PROBE_ORDER};

    fn service(http: Arc<MockTransport>) -> ControlService {
        ControlService::new(
            http,
            80,
            ControlConfig { timeout_ms: 200, retry_attempts: 3, retry_delay_ms: 0 },
        )
    }

    fn request(protocol: Option<&str>, action: ControlAction, params: ControlParams) -> ControlRequest {
        ControlRequest {
            address: "192.168.1.101".to_string(),
            id: "dev1".to_string(),
            protocol: protocol.map(str::to_string),
            action,
            params,
        }
    }

    fn brightness(protocol: &str, value: f64) -> ControlRequest {
        request(
            Some(protocol),
            ControlAction::SetBrightness,
            ControlParams { value: Some(value), ..Default::default() },
        )
    }

    #[tokio::test]
    async fn test_power_success_returns_patch() {
        let http = MockTransport::new();
        http.respond_json("192.168.1.101", "/api/setPilot", json!({"result": {"success": true}}));

        let response = service(http)
            .execute(&request(
                Some("philips-wiz"),
                ControlAction::SetState,
                ControlParams { state: Some(true), ..Default::default() },
            ))
            .await;

        assert!(response.success);
        assert_eq!(response.data.unwrap().power_state, Some(true));
    }

    #[tokio::test]
    async fn test_retries_then_reports_failure() {
        let http = MockTransport::new();
        let response = service(http.clone()).execute(&brightness("lifx", 50.0)).await;

        assert!(!response.success);
        assert!(response.error.unwrap().contains("after 3 attempts"));
        assert_eq!(http.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_params_are_rejected_before_dispatch() {
        let http = MockTransport::new();
        let svc = service(http.clone());

        let err = svc
            .try_execute(&request(Some("tasmota"), ControlAction::SetState, ControlParams::default()))
            .await
            .unwrap_err();
        assert_eq!(err, ControlError::MissingParam { action: "setState", param: "state" });

        let err = svc
            .try_execute(&request(
                Some("tasmota"),
                ControlAction::SetProperty,
                ControlParams { property: Some("volume".to_string()), value: Some(3.0), ..Default::default() },
            ))
            .await
            .unwrap_err();
        assert_eq!(err, ControlError::UnknownProperty("volume".to_string()));

        let err = svc
            .try_execute(&request(None, ControlAction::SetSpeed, ControlParams::default()))
            .await
            .unwrap_err();
        assert_eq!(err, ControlError::NotControllable("dev1".to_string()));

        assert!(http.requests().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_protocol_uses_generic_handler() {
        let http = MockTransport::new();
        http.respond_json("192.168.1.101", "/api/control", json!({"ok": true}));

        let response = service(http.clone()).execute(&brightness("acme-cloud", 40.0)).await;
        assert!(response.success);
        assert_eq!(http.requests()[0].path, "/api/control");
    }

    async fn issued(protocol: &str, value: f64) -> Vec<HttpRequest> {
        let http = MockTransport::new();
        // Tuya looks up its device id before writing
        http.respond_json("192.168.1.101", "/api/info", json!({"devId": "bf1234", "dps": {}}));
        let response = service(http.clone()).execute(&brightness(protocol, value)).await;
        if response.success {
            assert_eq!(response.data.unwrap().scalar_value, Some(100.0));
        }
        http.requests()
    }

    #[tokio::test]
    async fn test_out_of_range_brightness_is_clamped_for_every_vendor() {
        let vendors = PROBE_ORDER.iter().copied().chain(std::iter::once(Vendor::Generic));
        for tag in vendors.map(Vendor::tag) {
            assert_eq!(issued(tag, 150.0).await, issued(tag, 100.0).await, "{}", tag);
        }
    }

    #[tokio::test]
    async fn test_clamped_value_reaches_device() {
        let http = MockTransport::new();
        http.respond_json("192.168.1.101", "/api/setPilot", json!({"result": {"success": true}}));

        let response = service(http.clone()).execute(&brightness("philips-wiz", 150.0)).await;
        assert!(response.success);
        assert_eq!(response.data.unwrap().scalar_value, Some(100.0));
        let body = http.requests()[0].body.clone().unwrap();
        assert_eq!(body["params"]["dimming"], 100);
    }
}

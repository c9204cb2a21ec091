//! App-side access to the discovery engine.
//!
//! Every call degrades instead of failing outright: a running scanner
//! daemon is preferred, an in-process engine is the fallback, and the
//! local cache answers when neither finds anything.

pub mod relay;

use std::sync::Arc;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use shared::types::{ControlRequest, ControlResponse, Device, DevicePatch};
use device_scannerd::cache::store::MemoryStore;
use device_scannerd::cache::SystemClock;
use device_scannerd::cache_manager::CacheHandle;
use device_scannerd::service::DeviceService;

pub use relay::Relay;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("No devices found. Make sure your devices are powered on and connected to the same network as this device, then scan again.")]
    NoDevices,

    #[error("Couldn't control {name}. Check that it is powered on and connected to your network. ({reason})")]
    ControlFailed { name: String, reason: String },

    #[error("Device {0} is not in the device list. Scan again and retry.")]
    UnknownDevice(String),

    #[error("Couldn't add {name} to your home: {reason}")]
    Adoption { name: String, reason: String },
}

/// Durable storage a device is copied into when the user adopts it.
/// Returns the durable record's id.
#[async_trait]
pub trait AdoptionStore: Send + Sync {
    async fn adopt(&self, owner_id: &str, device: &Device) -> anyhow::Result<String>;
}

pub struct DeviceClient {
    relay: Option<Relay>,
    direct: Option<DeviceService>,
    cache: CacheHandle,
}

impl DeviceClient {
    pub fn new(cache: CacheHandle) -> Self {
        Self { relay: None, direct: None, cache }
    }

    /// A client with its own in-memory cache.
    pub fn in_memory(retention: chrono::Duration) -> Self {
        let (hash_tx, _) = watch::channel(String::new());
        Self::new(CacheHandle::spawn(
            Box::new(MemoryStore::new()),
            Arc::new(SystemClock),
            retention,
            hash_tx,
        ))
    }

    pub fn with_relay(mut self, relay: Relay) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn with_direct(mut self, service: DeviceService) -> Self {
        self.direct = Some(service);
        self
    }

    pub async fn scan(&self, force: bool) -> Result<Vec<Device>, ClientError> {
        let fresh = match self.relay_scan(force).await {
            Some(devices) => Some(devices),
            None => match &self.direct {
                Some(service) => Some(service.scan(force).await),
                None => None,
            },
        };

        if let Some(devices) = fresh.filter(|d| !d.is_empty()) {
            if let Err(e) = self.cache.put(devices.clone()).await {
                tracing::warn!("Failed to cache scan results locally: {}", e);
            }
            return Ok(devices);
        }

        let stale = self.cache.get_all().await.unwrap_or_else(|e| {
            tracing::warn!("Failed to read local cache: {}", e);
            Vec::new()
        });
        if stale.is_empty() {
            return Err(ClientError::NoDevices);
        }
        tracing::info!("Scan found nothing new, serving {} cached device(s)", stale.len());
        Ok(stale)
    }

    async fn relay_scan(&self, force: bool) -> Option<Vec<Device>> {
        let relay = self.relay.as_ref()?;
        match relay.scan(force).await {
            Ok(devices) => Some(devices),
            Err(e) => {
                tracing::warn!("Relay {} unavailable: {:#}", relay.base_url(), e);
                None
            }
        }
    }

    pub async fn devices(&self) -> Vec<Device> {
        self.cache.get_all().await.unwrap_or_default()
    }

    pub async fn control(&self, request: &ControlRequest) -> Result<DevicePatch, ClientError> {
        let response = match self.relay_control(request).await {
            Some(response) => response,
            None => match &self.direct {
                Some(service) => service.control(request).await,
                None => ControlResponse::failed("no scanner available"),
            },
        };

        match (response.success, response.data) {
            (true, Some(patch)) => {
                if let Err(e) = self.cache.patch(request.id.clone(), patch.clone()).await {
                    tracing::warn!("Failed to patch local cache: {}", e);
                }
                Ok(patch)
            }
            _ => Err(ClientError::ControlFailed {
                name: self.display_name(&request.id).await,
                reason: response.error.unwrap_or_else(|| "no response".to_string()),
            }),
        }
    }

    async fn relay_control(&self, request: &ControlRequest) -> Option<ControlResponse> {
        let relay = self.relay.as_ref()?;
        match relay.control(request).await {
            Ok(response) => Some(response),
            Err(e) => {
                tracing::warn!("Relay {} unavailable: {:#}", relay.base_url(), e);
                None
            }
        }
    }

    async fn find(&self, id: &str) -> Option<Device> {
        self.devices().await.into_iter().find(|d| d.id == id)
    }

    async fn display_name(&self, id: &str) -> String {
        self.find(id).await.map(|d| d.name).unwrap_or_else(|| id.to_string())
    }

    /// Copy a discovered device into durable storage and remember the link.
    /// Only ever called on an explicit user action.
    pub async fn adopt(
        &self,
        owner_id: &str,
        device_id: &str,
        store: &dyn AdoptionStore,
    ) -> Result<Device, ClientError> {
        let device = self
            .find(device_id)
            .await
            .ok_or_else(|| ClientError::UnknownDevice(device_id.to_string()))?;

        let link = store.adopt(owner_id, &device).await.map_err(|e| ClientError::Adoption {
            name: device.name.clone(),
            reason: e.to_string(),
        })?;
        tracing::info!("Adopted {} as {}", device.id, link);

        if let Some(relay) = &self.relay {
            if let Err(e) = relay.set_cloud_link(device_id, &link).await {
                tracing::warn!("Failed to record link on relay: {:#}", e);
            }
        }
        if let Some(service) = &self.direct {
            if let Err(e) = service.set_cloud_link(device_id, link.clone()).await {
                tracing::warn!("Failed to record link in engine cache: {}", e);
            }
        }

        let patch = DevicePatch { cloud_link_id: Some(link.clone()), ..Default::default() };
        let linked = match self.cache.patch(device_id.to_string(), patch).await {
            Ok(Some(linked)) => linked,
            Ok(None) | Err(_) => Device { cloud_link_id: Some(link), ..device },
        };
        Ok(linked)
    }
}

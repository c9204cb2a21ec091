//! The engine as one object: cache-wrapped discovery plus control. Both the
//! HTTP routes and in-process clients drive it.

use std::sync::Arc;
use anyhow::Result;
use shared::types::{ControlRequest, ControlResponse, Device, DevicePatch, NetworkInfo};
use crate::cache_manager::CacheHandle;
use crate::control::ControlService;
use crate::net::interfaces::{network_info_or_fallback, NetworkInfoSource};
use crate::orchestrator::DiscoveryOrchestrator;

#[derive(Clone)]
pub struct DeviceService {
    orchestrator: Arc<DiscoveryOrchestrator>,
    control: ControlService,
    cache: CacheHandle,
    network: Arc<dyn NetworkInfoSource>,
    recent_scan: chrono::Duration,
}

impl DeviceService {
    pub fn new(
        orchestrator: Arc<DiscoveryOrchestrator>,
        control: ControlService,
        cache: CacheHandle,
        network: Arc<dyn NetworkInfoSource>,
        recent_scan: chrono::Duration,
    ) -> Self {
        Self { orchestrator, control, cache, network, recent_scan }
    }

    pub fn network_info(&self) -> NetworkInfo {
        network_info_or_fallback(self.network.as_ref())
    }

    /// Cached devices if a scan finished recently (unless `force`), else a
    /// fresh pass merged into the cache. Never fails: cache trouble only
    /// costs the stale entries.
    pub async fn scan(&self, force: bool) -> Vec<Device> {
        if !force {
            match self.cache.has_recent_scan(self.recent_scan).await {
                Ok(true) => match self.cache.get_all().await {
                    Ok(devices) => {
                        tracing::debug!("Serving {} device(s) from recent scan", devices.len());
                        return devices;
                    }
                    Err(e) => tracing::error!("Failed to read cache: {}", e),
                },
                Ok(false) => {}
                Err(e) => tracing::error!("Failed to check scan freshness: {}", e),
            }
        }

        let found = self.orchestrator.discover().await;
        // An empty pass is not recorded, so the next request scans again
        if !found.is_empty() {
            if let Err(e) = self.cache.put(found.clone()).await {
                tracing::error!("Failed to cache scan results: {}", e);
                return found;
            }
        }

        match self.cache.get_all().await {
            Ok(devices) => devices,
            Err(e) => {
                tracing::error!("Failed to read cache: {}", e);
                found
            }
        }
    }

    pub async fn devices(&self) -> Result<Vec<Device>> {
        self.cache.get_all().await
    }

    /// Run a control action and, on success, fold its effect into the cache.
    pub async fn control(&self, request: &ControlRequest) -> ControlResponse {
        let response = self.control.execute(request).await;
        if let (true, Some(patch)) = (response.success, &response.data) {
            match self.cache.patch(request.id.clone(), patch.clone()).await {
                Ok(Some(_)) => {}
                Ok(None) => tracing::debug!("Controlled device {} is not cached", request.id),
                Err(e) => tracing::error!("Failed to patch cached device: {}", e),
            }
        }
        response
    }

    /// Record that a device was adopted into durable storage.
    pub async fn set_cloud_link(&self, id: &str, cloud_link_id: String) -> Result<Option<Device>> {
        let patch = DevicePatch { cloud_link_id: Some(cloud_link_id), ..Default::default() };
        self.cache.patch(id.to_string(), patch).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.cache.clear().await
    }
}

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use futures::stream::{self, StreamExt};
use shared::types::{sort_by_address, Device};
use crate::classifier::VendorClassifier;
use crate::config::ScanConfig;
use crate::mdns::listener::AnnouncementSource;
use crate::net::interfaces::NetworkInfoSource;
use crate::net::range::candidate_addresses;
use crate::net::reachability::Reachability;

/// One scan pass: passive listening alongside an active sweep of the local
/// subnet, merged into a single list keyed by address.
///
/// `discover` has no failure mode. Every stage degrades to fewer results.
pub struct DiscoveryOrchestrator {
    network: Arc<dyn NetworkInfoSource>,
    reachability: Arc<dyn Reachability>,
    announcements: Arc<dyn AnnouncementSource>,
    classifier: VendorClassifier,
    config: ScanConfig,
}

impl DiscoveryOrchestrator {
    pub fn new(
        network: Arc<dyn NetworkInfoSource>,
        reachability: Arc<dyn Reachability>,
        announcements: Arc<dyn AnnouncementSource>,
        classifier: VendorClassifier,
        config: ScanConfig,
    ) -> Self {
        Self { network, reachability, announcements, classifier, config }
    }

    pub async fn discover(&self) -> Vec<Device> {
        let started = std::time::Instant::now();
        let (passive, active) = tokio::join!(
            self.announcements.listen(self.config.announcement_window()),
            self.active_scan(),
        );

        let passive = if self.config.verify_passive {
            self.verify_passive(passive, &active).await
        } else {
            passive
        };

        let devices = merge(passive, active);
        tracing::info!(
            "Scan pass found {} device(s) in {:.1}s",
            devices.len(),
            started.elapsed().as_secs_f64()
        );
        devices
    }

    async fn active_scan(&self) -> Vec<Device> {
        let info = self.network.resolve();
        let candidates = candidate_addresses(
            info.as_ref().map(|i| i.local_address.as_str()),
            info.as_ref().map(|i| i.subnet_mask.as_str()),
            self.config.max_candidates,
        );
        tracing::debug!("Probing {} candidate address(es)", candidates.len());

        stream::iter(candidates)
            .map(|address| self.probe(address))
            .buffer_unordered(self.config.concurrency.max(1))
            .filter_map(|device| async move { device })
            .collect()
            .await
    }

    async fn probe(&self, address: Ipv4Addr) -> Option<Device> {
        if !self.reachability.is_reachable(address).await {
            return None;
        }
        self.classifier.classify(address).await
    }

    /// Give each passive-only record one classifier pass. A match replaces
    /// the announced record; a miss keeps it as observable-only.
    async fn verify_passive(&self, passive: Vec<Device>, active: &[Device]) -> Vec<Device> {
        let confirmed: HashSet<&str> = active.iter().map(|d| d.address.as_str()).collect();
        let confirmed = &confirmed;

        stream::iter(passive)
            .map(|announced| async move {
                if confirmed.contains(announced.address.as_str()) {
                    return announced;
                }
                let Ok(address) = announced.address.parse::<Ipv4Addr>() else {
                    return announced;
                };
                match self.classifier.classify(address).await {
                    Some(classified) => {
                        tracing::debug!("Announced {} verified as {:?}", address, classified.protocol);
                        classified
                    }
                    None => announced,
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await
    }
}

/// Deduplicate by address. Active results override passive ones; within
/// either list the later record wins.
pub fn merge(passive: Vec<Device>, active: Vec<Device>) -> Vec<Device> {
    let mut by_address: HashMap<String, Device> = HashMap::new();
    for device in passive.into_iter().chain(active) {
        by_address.insert(device.address.clone(), device);
    }
    let mut devices: Vec<Device> = by_address.into_values().collect();
    sort_by_address(&mut devices);
    devices
}

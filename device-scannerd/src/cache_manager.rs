use std::sync::Arc;
use std::thread;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use anyhow::Result;
use chrono::Duration;
use shared::types::{sort_by_address, CacheEntry, Device, DevicePatch};
use crate::cache::{hash, store::CacheStore, Clock};
use crate::config::CacheConfig;

/// Commands sent to the cache thread
pub enum CacheCommand {
    Put(Vec<Device>, oneshot::Sender<Result<()>>),
    GetAll(oneshot::Sender<Result<Vec<Device>>>),
    HasRecentScan(Duration, oneshot::Sender<Result<bool>>),
    Patch(String, DevicePatch, oneshot::Sender<Result<Option<Device>>>),
    Clear(oneshot::Sender<Result<()>>),
    Evict(oneshot::Sender<Result<usize>>),
    Shutdown,
}

/// State owned by the cache thread.
struct CacheState {
    store: Box<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    retention: Duration,
}

impl CacheState {
    fn evict(&mut self) -> Result<usize> {
        let cutoff = self.clock.now() - self.retention;
        let removed = self.store.remove_cached_before(cutoff)?;
        if removed > 0 {
            tracing::debug!("Evicted {} expired device(s)", removed);
        }
        Ok(removed)
    }

    fn live_devices(&mut self) -> Result<Vec<Device>> {
        self.evict()?;
        let mut devices: Vec<Device> = self.store.all()?.into_iter().map(|e| e.device).collect();
        sort_by_address(&mut devices);
        Ok(devices)
    }

    /// Upsert each device. Adoption links survive a rescan, and a record for
    /// the same address under another id is superseded. An untagged record
    /// never displaces a controllable one; it only refreshes it.
    fn put(&mut self, devices: Vec<Device>) -> Result<()> {
        let now = self.clock.now();
        for mut device in devices {
            if device.protocol.is_none() {
                let controllable = self
                    .store
                    .find_by_address(&device.address)?
                    .into_iter()
                    .find(|e| e.device.protocol.is_some());
                if let Some(mut entry) = controllable {
                    tracing::debug!("Keeping {} over untagged record {}", entry.device.id, device.id);
                    entry.device.last_seen = device.last_seen;
                    entry.cached_at = now;
                    self.store.upsert(&entry)?;
                    continue;
                }
            }

            let mut link = self.store.get(&device.id)?.and_then(|e| e.device.cloud_link_id);
            for other in self.store.find_by_address(&device.address)? {
                if other.device.id != device.id {
                    link = link.or(other.device.cloud_link_id);
                    self.store.remove(&other.device.id)?;
                }
            }
            if device.cloud_link_id.is_none() {
                device.cloud_link_id = link;
            }
            self.store.upsert(&CacheEntry { device, cached_at: now })?;
        }
        self.store.set_last_scan(Some(now))
    }

    fn has_recent_scan(&self, max_age: Duration) -> Result<bool> {
        let now = self.clock.now();
        Ok(self.store.last_scan()?.map(|at| now - at <= max_age).unwrap_or(false))
    }

    fn patch(&mut self, id: &str, patch: &DevicePatch) -> Result<Option<Device>> {
        let Some(mut entry) = self.store.get(id)? else {
            return Ok(None);
        };
        if entry.is_expired(self.clock.now(), self.retention) {
            self.store.remove(id)?;
            return Ok(None);
        }
        entry.device.apply_patch(patch);
        self.store.upsert(&entry)?;
        Ok(Some(entry.device))
    }

    fn clear(&mut self) -> Result<()> {
        self.store.clear()?;
        self.store.set_last_scan(None)
    }
}

/// Handle to the cache thread. Every operation is serialized through it.
#[derive(Clone)]
pub struct CacheHandle {
    tx: mpsc::Sender<CacheCommand>,
}

impl CacheHandle {
    /// Spawn a new cache thread owning `store`
    pub fn spawn(
        store: Box<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        retention: Duration,
        hash_tx: watch::Sender<String>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<CacheCommand>(256);

        // Only recompute after mutations
        let recompute_hash = |state: &mut CacheState, hash_tx: &watch::Sender<String>| {
            match state.live_devices() {
                Ok(devices) => {
                    hash_tx.send_replace(hash::compute_hash(&devices));
                }
                Err(e) => tracing::error!("Failed to read cache for hashing: {}", e),
            }
        };

        let mut state = CacheState { store, clock, retention };
        recompute_hash(&mut state, &hash_tx);

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    CacheCommand::Put(devices, reply) => {
                        let result = state.put(devices);
                        if result.is_ok() {
                            recompute_hash(&mut state, &hash_tx);
                        }
                        let _ = reply.send(result);
                    }
                    CacheCommand::GetAll(reply) => {
                        let _ = reply.send(state.live_devices());
                    }
                    CacheCommand::HasRecentScan(max_age, reply) => {
                        let _ = reply.send(state.has_recent_scan(max_age));
                    }
                    CacheCommand::Patch(id, patch, reply) => {
                        let result = state.patch(&id, &patch);
                        if matches!(&result, Ok(Some(_))) {
                            recompute_hash(&mut state, &hash_tx);
                        }
                        let _ = reply.send(result);
                    }
                    CacheCommand::Clear(reply) => {
                        let result = state.clear();
                        if result.is_ok() {
                            recompute_hash(&mut state, &hash_tx);
                        }
                        let _ = reply.send(result);
                    }
                    CacheCommand::Evict(reply) => {
                        let result = state.evict();
                        if matches!(&result, Ok(n) if *n > 0) {
                            recompute_hash(&mut state, &hash_tx);
                        }
                        let _ = reply.send(result);
                    }
                    CacheCommand::Shutdown => {
                        tracing::info!("Cache thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    /// Upsert scan results and mark a scan as just completed
    pub async fn put(&self, devices: Vec<Device>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(CacheCommand::Put(devices, reply)).await?;
        rx.await?
    }

    /// All non-expired devices, ordered by address
    pub async fn get_all(&self) -> Result<Vec<Device>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(CacheCommand::GetAll(reply)).await?;
        rx.await?
    }

    pub async fn has_recent_scan(&self, max_age: Duration) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(CacheCommand::HasRecentScan(max_age, reply)).await?;
        rx.await?
    }

    /// Merge fields into a cached device. `None` if the id is not cached.
    pub async fn patch(&self, id: String, patch: DevicePatch) -> Result<Option<Device>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(CacheCommand::Patch(id, patch, reply)).await?;
        rx.await?
    }

    pub async fn clear(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(CacheCommand::Clear(reply)).await?;
        rx.await?
    }

    /// Drop expired entries now rather than on the next read
    pub async fn evict(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(CacheCommand::Evict(reply)).await?;
        rx.await?
    }

    /// Shutdown the cache thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(CacheCommand::Shutdown).await?;
        Ok(())
    }
}

/// Periodic eviction, so the hash and on-disk store shed expired devices
/// even when nobody reads.
pub async fn run(cache: CacheHandle, config: CacheConfig, cancel: CancellationToken) -> Result<()> {
    let mut maintenance_interval = tokio::time::interval(
        std::time::Duration::from_secs(config.maintenance_interval_secs.max(1))
    );

    loop {
        tokio::select! {
            _ = maintenance_interval.tick() => {
                if let Err(e) = cache.evict().await {
                    tracing::error!("Failed to run maintenance: {}", e);
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Cache manager shutting down");
                break;
            }
        }
    }

    Ok(())
}

use std::collections::HashMap;
use anyhow::Result;
use chrono::{DateTime, Utc};
use shared::types::CacheEntry;

/// Storage behind the cache actor. Only the actor thread touches a store,
/// so implementations need no internal locking.
pub trait CacheStore: Send {
    fn get(&self, id: &str) -> Result<Option<CacheEntry>>;

    fn find_by_address(&self, address: &str) -> Result<Vec<CacheEntry>>;

    fn all(&self) -> Result<Vec<CacheEntry>>;

    fn upsert(&mut self, entry: &CacheEntry) -> Result<()>;

    fn remove(&mut self, id: &str) -> Result<()>;

    /// Drop entries cached before `cutoff`. Returns how many were dropped.
    fn remove_cached_before(&mut self, cutoff: DateTime<Utc>) -> Result<usize>;

    fn clear(&mut self) -> Result<()>;

    fn last_scan(&self) -> Result<Option<DateTime<Utc>>>;

    fn set_last_scan(&mut self, at: Option<DateTime<Utc>>) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryStore {
    entries: HashMap<String, CacheEntry>,
    last_scan: Option<DateTime<Utc>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, id: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.get(id).cloned())
    }

    fn find_by_address(&self, address: &str) -> Result<Vec<CacheEntry>> {
        Ok(self
            .entries
            .values()
            .filter(|e| e.device.address == address)
            .cloned()
            .collect())
    }

    fn all(&self) -> Result<Vec<CacheEntry>> {
        Ok(self.entries.values().cloned().collect())
    }

    fn upsert(&mut self, entry: &CacheEntry) -> Result<()> {
        self.entries.insert(entry.device.id.clone(), entry.clone());
        Ok(())
    }

    fn remove(&mut self, id: &str) -> Result<()> {
        self.entries.remove(id);
        Ok(())
    }

    fn remove_cached_before(&mut self, cutoff: DateTime<Utc>) -> Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.cached_at >= cutoff);
        Ok(before - self.entries.len())
    }

    fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.last_scan = None;
        Ok(())
    }

    fn last_scan(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.last_scan)
    }

    fn set_last_scan(&mut self, at: Option<DateTime<Utc>>) -> Result<()> {
        self.last_scan = at;
        Ok(())
    }
}

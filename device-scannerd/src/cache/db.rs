use std::path::Path;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params, OptionalExtension};
use shared::types::{CacheEntry, Device};
use super::store::CacheStore;

const LAST_SCAN_KEY: &str = "last_scan";

/// Fixed-width UTC timestamps so string comparison in SQL matches time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, raw: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

/// Persistent cache backend; lets a restarted daemon answer from the last scan.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create the SQLite database with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS devices (
                id        TEXT PRIMARY KEY,
                address   TEXT NOT NULL,
                device    TEXT NOT NULL,
                cached_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_devices_address ON devices(address);

            CREATE TABLE IF NOT EXISTS scan_meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create database schema")?;

        Ok(Self { conn })
    }

    fn row_to_entry(row: &rusqlite::Row) -> Result<CacheEntry, rusqlite::Error> {
        let device_json: String = row.get(0)?;
        let cached_at_str: String = row.get(1)?;

        let device: Device = serde_json::from_str(&device_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;

        Ok(CacheEntry {
            device,
            cached_at: parse_timestamp(1, &cached_at_str)?,
        })
    }

    fn query_entries(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<CacheEntry>> {
        let mut stmt = self.conn.prepare(sql).context("Failed to prepare query")?;
        let entries = stmt
            .query_map(args, Self::row_to_entry)
            .context("Failed to query devices")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect devices")?;
        Ok(entries)
    }
}

impl CacheStore for SqliteStore {
    fn get(&self, id: &str) -> Result<Option<CacheEntry>> {
        self.conn
            .query_row(
                "SELECT device, cached_at FROM devices WHERE id = ?1",
                params![id],
                Self::row_to_entry,
            )
            .optional()
            .context("Failed to query device")
    }

    fn find_by_address(&self, address: &str) -> Result<Vec<CacheEntry>> {
        self.query_entries("SELECT device, cached_at FROM devices WHERE address = ?1", params![address])
    }

    fn all(&self) -> Result<Vec<CacheEntry>> {
        self.query_entries("SELECT device, cached_at FROM devices", [])
    }

    fn upsert(&mut self, entry: &CacheEntry) -> Result<()> {
        let device_json = serde_json::to_string(&entry.device)
            .context("Failed to serialize device")?;

        self.conn.execute(
            r#"
            INSERT INTO devices (id, address, device, cached_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                address = excluded.address,
                device = excluded.device,
                cached_at = excluded.cached_at
            "#,
            params![
                &entry.device.id,
                &entry.device.address,
                &device_json,
                timestamp(entry.cached_at),
            ],
        )
        .context("Failed to upsert device")?;

        Ok(())
    }

    fn remove(&mut self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM devices WHERE id = ?1", params![id])
            .context("Failed to remove device")?;
        Ok(())
    }

    fn remove_cached_before(&mut self, cutoff: DateTime<Utc>) -> Result<usize> {
        let count = self.conn
            .execute("DELETE FROM devices WHERE cached_at < ?1", params![timestamp(cutoff)])
            .context("Failed to prune expired devices")?;
        Ok(count)
    }

    fn clear(&mut self) -> Result<()> {
        self.conn
            .execute_batch("DELETE FROM devices; DELETE FROM scan_meta;")
            .context("Failed to clear cache")?;
        Ok(())
    }

    fn last_scan(&self) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = self.conn
            .query_row(
                "SELECT value FROM scan_meta WHERE key = ?1",
                params![LAST_SCAN_KEY],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read last scan time")?;

        raw.map(|r| parse_timestamp(0, &r))
            .transpose()
            .context("Corrupt last scan time")
    }

    fn set_last_scan(&mut self, at: Option<DateTime<Utc>>) -> Result<()> {
        let result = match at {
            Some(at) => self.conn.execute(
                "INSERT INTO scan_meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![LAST_SCAN_KEY, timestamp(at)],
            ),
            None => self.conn.execute("DELETE FROM scan_meta WHERE key = ?1", params![LAST_SCAN_KEY]),
        };
        result.context("Failed to record last scan time")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::types::DeviceType;

    fn test_entry(address: &str) -> CacheEntry {
        let mut device = Device::new(Some("tasmota"), address, "Bedroom Fan", DeviceType::Fan);
        device.scalar_value = Some(3.0);
        CacheEntry { device, cached_at: Utc::now() }
    }

    #[test]
    fn test_create_and_query() {
        let mut db = SqliteStore::open(":memory:").unwrap();
        let entry = test_entry("192.168.1.102");

        db.upsert(&entry).unwrap();

        let retrieved = db.get(&entry.device.id).unwrap().unwrap();
        assert_eq!(retrieved.device, entry.device);
        assert_eq!(db.find_by_address("192.168.1.102").unwrap().len(), 1);
        assert!(db.get("nope").unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces() {
        let mut db = SqliteStore::open(":memory:").unwrap();
        let mut entry = test_entry("192.168.1.102");
        db.upsert(&entry).unwrap();

        entry.device.power_state = true;
        db.upsert(&entry).unwrap();

        let all = db.all().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].device.power_state);
    }

    #[test]
    fn test_prune_and_last_scan() {
        let mut db = SqliteStore::open(":memory:").unwrap();
        let mut old = test_entry("192.168.1.5");
        old.cached_at = Utc::now() - chrono::Duration::hours(2);
        db.upsert(&old).unwrap();
        db.upsert(&test_entry("192.168.1.6")).unwrap();

        let removed = db.remove_cached_before(Utc::now() - chrono::Duration::hours(1)).unwrap();
        assert_eq!(removed, 1);

        assert_eq!(db.last_scan().unwrap(), None);
        let at = Utc::now();
        db.set_last_scan(Some(at)).unwrap();
        let stored = db.last_scan().unwrap().unwrap();
        assert_eq!(timestamp(stored), timestamp(at));

        db.clear().unwrap();
        assert!(db.all().unwrap().is_empty());
        assert_eq!(db.last_scan().unwrap(), None);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("devices.db");
        let entry = test_entry("192.168.1.7");

        {
            let mut db = SqliteStore::open(&path).unwrap();
            db.upsert(&entry).unwrap();
            db.set_last_scan(Some(entry.cached_at)).unwrap();
        }

        let db = SqliteStore::open(&path).unwrap();
        assert_eq!(db.get(&entry.device.id).unwrap().unwrap().device, entry.device);
        assert!(db.last_scan().unwrap().is_some());
    }
}

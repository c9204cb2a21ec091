use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::{DEFAULT_API_PORT, DEFAULT_MAX_CANDIDATES, DEFAULT_SCAN_CONCURRENCY};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub control: ControlConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Announce the control API over mDNS
    #[serde(default = "default_true")]
    pub advertise: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_reachability_timeout")]
    pub reachability_timeout_ms: u64,
    #[serde(default = "default_reachability_ports")]
    pub reachability_ports: Vec<u16>,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_device_port")]
    pub device_port: u16,
    #[serde(default = "default_announcement_window")]
    pub announcement_window_ms: u64,
    /// Run passive-only records through the classifier once before returning
    #[serde(default = "default_true")]
    pub verify_passive: bool,
    /// Interface to read the local address from; first non-loopback if unset
    #[serde(default)]
    pub interface: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_backend")]
    pub backend: CacheBackend,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_recent_scan")]
    pub recent_scan_secs: u64,
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_control_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_listen() -> String {
    format!("0.0.0.0:{}", DEFAULT_API_PORT)
}

fn default_true() -> bool {
    true
}

fn default_max_candidates() -> usize {
    DEFAULT_MAX_CANDIDATES
}

fn default_concurrency() -> usize {
    DEFAULT_SCAN_CONCURRENCY
}

fn default_reachability_timeout() -> u64 {
    500
}

fn default_reachability_ports() -> Vec<u16> {
    vec![80, 443, 8080, 6668, 55443]
}

fn default_probe_timeout() -> u64 {
    1000
}

fn default_device_port() -> u16 {
    80
}

fn default_announcement_window() -> u64 {
    3000
}

fn default_backend() -> CacheBackend {
    CacheBackend::Memory
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/device-scanner/devices.db")
}

fn default_recent_scan() -> u64 {
    300
}

fn default_retention() -> u64 {
    3600
}

fn default_maintenance_interval() -> u64 {
    60
}

fn default_control_timeout() -> u64 {
    3000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    500
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            advertise: default_true(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_candidates: default_max_candidates(),
            concurrency: default_concurrency(),
            reachability_timeout_ms: default_reachability_timeout(),
            reachability_ports: default_reachability_ports(),
            probe_timeout_ms: default_probe_timeout(),
            device_port: default_device_port(),
            announcement_window_ms: default_announcement_window(),
            verify_passive: default_true(),
            interface: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            db_path: default_db_path(),
            recent_scan_secs: default_recent_scan(),
            retention_secs: default_retention(),
            maintenance_interval_secs: default_maintenance_interval(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_control_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl ScanConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn reachability_timeout(&self) -> Duration {
        Duration::from_millis(self.reachability_timeout_ms)
    }

    pub fn announcement_window(&self) -> Duration {
        Duration::from_millis(self.announcement_window_ms)
    }
}

impl CacheConfig {
    pub fn recent_scan(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.recent_scan_secs as i64)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retention_secs as i64)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Port half of `server.listen`, advertised over mDNS
    pub fn api_port(&self) -> u16 {
        self.server
            .listen
            .rsplit(':')
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(DEFAULT_API_PORT)
    }
}

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use mdns_sd::ServiceDaemon;
use anyhow::{Context, Result};
use device_scannerd::api;
use device_scannerd::cache::db::SqliteStore;
use device_scannerd::cache::store::{CacheStore, MemoryStore};
use device_scannerd::cache::SystemClock;
use device_scannerd::cache_manager::{self, CacheHandle};
use device_scannerd::classifier::VendorClassifier;
use device_scannerd::config::{CacheBackend, Config};
use device_scannerd::control::ControlService;
use device_scannerd::mdns::{advertise, listener::MdnsListener};
use device_scannerd::net::interfaces::SystemNetwork;
use device_scannerd::net::reachability::TcpReachability;
use device_scannerd::orchestrator::DiscoveryOrchestrator;
use device_scannerd::service::DeviceService;
use device_scannerd::transport::ReqwestTransport;

/// Multicast is optional: without it passive discovery and advertisement
/// are skipped and the active sweep still runs.
fn start_mdns(interface: Option<&str>) -> Option<ServiceDaemon> {
    let daemon = match ServiceDaemon::new() {
        Ok(daemon) => daemon,
        Err(e) => {
            tracing::warn!("mDNS unavailable, passive discovery disabled: {}", e);
            return None;
        }
    };
    if let Some(interface) = interface {
        let pinned = daemon
            .disable_interface(mdns_sd::IfKind::All)
            .and_then(|_| daemon.enable_interface(interface));
        if let Err(e) = pinned {
            tracing::warn!("Failed to pin mDNS to {}: {}", interface, e);
        }
    }
    Some(daemon)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("device_scannerd=info"))
        )
        .init();

    tracing::info!("Starting device-scannerd");

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let config = Config::load(&path)
                .with_context(|| format!("Failed to load config from {}", path))?;
            tracing::info!("Loaded config from {}", path);
            config
        }
        None => {
            tracing::info!("No config file given, using defaults");
            Config::default()
        }
    };

    let store: Box<dyn CacheStore> = match config.cache.backend {
        CacheBackend::Memory => Box::new(MemoryStore::new()),
        CacheBackend::Sqlite => {
            let db = SqliteStore::open(&config.cache.db_path)?;
            tracing::info!("Opened database at {:?}", config.cache.db_path);
            Box::new(db)
        }
    };

    let (hash_tx, hash_rx) = watch::channel(String::new());
    let cache_handle = CacheHandle::spawn(store, Arc::new(SystemClock), config.cache.retention(), hash_tx);
    tracing::info!("Initial cache hash: {}", hash_rx.borrow().as_str());

    let http = Arc::new(ReqwestTransport::new()?);
    let network = Arc::new(SystemNetwork::new(config.scan.interface.clone()));
    let mdns_daemon = start_mdns(config.scan.interface.as_deref());

    let orchestrator = DiscoveryOrchestrator::new(
        network.clone(),
        Arc::new(TcpReachability::new(
            config.scan.reachability_ports.clone(),
            config.scan.reachability_timeout(),
        )),
        Arc::new(MdnsListener::new(mdns_daemon.clone())),
        VendorClassifier::new(http.clone(), config.scan.device_port, config.scan.probe_timeout()),
        config.scan.clone(),
    );
    let control = ControlService::new(http, config.scan.device_port, config.control.clone());
    let service = DeviceService::new(
        Arc::new(orchestrator),
        control,
        cache_handle.clone(),
        network,
        config.cache.recent_scan(),
    );

    let api_port = config.api_port();
    let service_info = match (&mdns_daemon, config.server.advertise) {
        (Some(daemon), true) => match advertise::register_scanner(daemon, api_port) {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::error!("Failed to advertise scanner: {}", e);
                None
            }
        },
        _ => None,
    };

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    let mgr_cancel = cancel.clone();
    let mgr_config = config.cache.clone();
    let mgr_cache = cache_handle.clone();
    let mgr_handle = tokio::spawn(async move {
        if let Err(e) = cache_manager::run(mgr_cache, mgr_config, mgr_cancel).await {
            tracing::error!("Cache manager error: {}", e);
        }
    });

    let app = api::routes::router(api::routes::AppState { service, hash_rx });

    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server.listen))?;

    tracing::info!("API listening on {}", config.server.listen);

    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();

    // An in-flight scan can hold the server open for a few seconds
    let drained = tokio::time::timeout(Duration::from_secs(10), async {
        let _ = tokio::join!(mgr_handle, server_handle);
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Timed out waiting for tasks to stop");
    }

    if let (Some(daemon), Some(info)) = (&mdns_daemon, &service_info) {
        if let Err(e) = advertise::unregister_scanner(daemon, info) {
            tracing::error!("Failed to unregister mDNS service: {}", e);
        }
    }

    if let Err(e) = cache_handle.shutdown().await {
        tracing::error!("Failed to shutdown cache: {}", e);
    }

    if let Some(daemon) = mdns_daemon {
        if let Err(e) = daemon.shutdown() {
            tracing::error!("Failed to shutdown mDNS daemon: {}", e);
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

use std::collections::HashMap;
use mdns_sd::{ServiceDaemon, ServiceInfo};
use anyhow::{Context, Result};
use shared::protocol::{SCANNER_SERVICE_TYPE, TXT_API_PORT};

fn scanner_service_info(hostname: &str, api_port: u16) -> Result<ServiceInfo> {
    let instance_name = format!("device-scanner-{}", hostname);
    let host = format!("{}.local.", hostname.trim_end_matches('.'));

    // Clients find the control API port here
    let txt_records = HashMap::from([(TXT_API_PORT.to_string(), api_port.to_string())]);

    let service_info = ServiceInfo::new(
        SCANNER_SERVICE_TYPE,
        &instance_name,
        &host,
        "",
        api_port,
        txt_records,
    )
    .context("Failed to create ServiceInfo")?
    .enable_addr_auto();

    Ok(service_info)
}

pub fn register_scanner(daemon: &ServiceDaemon, api_port: u16) -> Result<ServiceInfo> {
    let hostname = hostname::get()
        .context("Failed to get system hostname")?
        .to_string_lossy()
        .to_string();

    let service_info = scanner_service_info(&hostname, api_port)?;
    daemon
        .register(service_info.clone())
        .context("Failed to register mDNS service")?;

    tracing::info!(
        "Registered {} as {} on port {}",
        SCANNER_SERVICE_TYPE,
        service_info.get_fullname(),
        api_port
    );

    Ok(service_info)
}

pub fn unregister_scanner(daemon: &ServiceDaemon, service_info: &ServiceInfo) -> Result<()> {
    daemon
        .unregister(service_info.get_fullname())
        .context("Failed to unregister mDNS service")?;

    tracing::info!("Unregistered {}", service_info.get_fullname());
    Ok(())
}

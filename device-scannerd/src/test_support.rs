//! In-memory stand-ins for the network, shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use shared::types::{Device, NetworkInfo};
use crate::mdns::listener::AnnouncementSource;
use crate::net::interfaces::NetworkInfoSource;
use crate::net::reachability::Reachability;
use crate::transport::{Endpoint, HttpRequest, HttpResponse, HttpTransport};

/// Scripted HTTP responses keyed by (host, path). Unscripted requests fail
/// like a refused connection. Every request is recorded.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(Ipv4Addr, String), (u16, String)>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, host: &str, path: &str, status: u16, body: impl Into<String>) {
        let host: Ipv4Addr = host.parse().unwrap();
        self.routes
            .lock()
            .unwrap()
            .insert((host, path.to_string()), (status, body.into()));
    }

    pub fn respond_json(&self, host: &str, path: &str, body: Value) {
        self.respond(host, path, 200, body.to_string());
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());
        // Commands carry their payload in the query string; match on path alone
        // first, then on the path without a query.
        let routes = self.routes.lock().unwrap();
        let exact = routes.get(&(request.host, request.path.clone()));
        let bare = request
            .path
            .split_once('?')
            .and_then(|(path, _)| routes.get(&(request.host, path.to_string())));
        match exact.or(bare) {
            Some((status, body)) => Ok(HttpResponse { status: *status, body: body.clone() }),
            None => Err(anyhow!("connection refused: {}", request.url())),
        }
    }
}

pub fn endpoint(http: Arc<MockTransport>, host: &str) -> Endpoint {
    Endpoint::new(http, host.parse().unwrap(), 80, Duration::from_millis(200))
}

/// Reachability answering from a fixed set; `None` makes every check fail.
pub struct StaticReachability(pub Option<HashSet<Ipv4Addr>>);

impl StaticReachability {
    pub fn hosts(hosts: &[&str]) -> Arc<Self> {
        Arc::new(Self(Some(hosts.iter().map(|h| h.parse().unwrap()).collect())))
    }

    pub fn none() -> Arc<Self> {
        Arc::new(Self(None))
    }
}

#[async_trait]
impl Reachability for StaticReachability {
    async fn is_reachable(&self, address: Ipv4Addr) -> bool {
        self.0.as_ref().map(|set| set.contains(&address)).unwrap_or(false)
    }
}

pub struct StaticAnnouncements(pub Vec<Device>);

#[async_trait]
impl AnnouncementSource for StaticAnnouncements {
    async fn listen(&self, _window: Duration) -> Vec<Device> {
        self.0.clone()
    }
}

pub struct StaticNetwork(pub Option<NetworkInfo>);

impl NetworkInfoSource for StaticNetwork {
    fn resolve(&self) -> Option<NetworkInfo> {
        self.0.clone()
    }
}

pub fn network(local: &str, mask: &str) -> Arc<StaticNetwork> {
    Arc::new(StaticNetwork(Some(NetworkInfo {
        local_address: local.to_string(),
        subnet_mask: mask.to_string(),
        gateway: "192.168.1.1".to_string(),
    })))
}

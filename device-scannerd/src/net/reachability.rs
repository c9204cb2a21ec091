use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use async_trait::async_trait;
use futures::future::select_ok;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Fast, best-effort liveness check. Any failure means "not reachable".
#[async_trait]
pub trait Reachability: Send + Sync {
    async fn is_reachable(&self, address: Ipv4Addr) -> bool;
}

/// TCP connect race across a handful of ports commonly open on smart-home
/// gear. A refused connection still proves the host is up.
pub struct TcpReachability {
    ports: Vec<u16>,
    timeout: Duration,
}

impl TcpReachability {
    pub fn new(ports: Vec<u16>, timeout: Duration) -> Self {
        Self { ports, timeout }
    }
}

async fn knock(addr: SocketAddr) -> std::io::Result<()> {
    match TcpStream::connect(addr).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::ConnectionRefused => Ok(()),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl Reachability for TcpReachability {
    async fn is_reachable(&self, address: Ipv4Addr) -> bool {
        if self.ports.is_empty() {
            return false;
        }

        let attempts = self
            .ports
            .iter()
            .map(|&port| Box::pin(knock(SocketAddr::from((address, port)))));

        match timeout(self.timeout, select_ok(attempts)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::trace!("{} unreachable: {}", address, e);
                false
            }
            Err(_) => false,
        }
    }
}

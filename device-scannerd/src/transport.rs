use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

/// One outbound vendor request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub host: Ipv4Addr,
    pub port: u16,
    /// Path plus query string, sent as-is
    pub path: String,
    pub body: Option<Value>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn url(&self) -> String {
        if self.port == 80 {
            format!("http://{}{}", self.host, self.path)
        } else {
            format!("http://{}:{}{}", self.host, self.port, self.path)
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Seam between vendor code and the network.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .pool_max_idle_per_host(0)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url();
        let builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
        };
        let builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        };

        let response = builder
            .timeout(request.timeout)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read body from {}", url))?;

        Ok(HttpResponse { status, body })
    }
}

/// A device address bound to a transport and a per-call timeout.
/// Every helper collapses failures (transport error, non-2xx, bad JSON) to
/// `None`/`false` so vendor code can treat them as "no match".
#[derive(Clone)]
pub struct Endpoint {
    http: Arc<dyn HttpTransport>,
    pub host: Ipv4Addr,
    pub port: u16,
    pub timeout: Duration,
}

impl Endpoint {
    pub fn new(http: Arc<dyn HttpTransport>, host: Ipv4Addr, port: u16, timeout: Duration) -> Self {
        Self { http, host, port, timeout }
    }

    pub fn address(&self) -> String {
        self.host.to_string()
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Option<HttpResponse> {
        let request = HttpRequest {
            method,
            host: self.host,
            port: self.port,
            path: path.to_string(),
            body,
            timeout: self.timeout,
        };
        match self.http.send(request).await {
            Ok(response) if response.is_success() => Some(response),
            Ok(response) => {
                tracing::trace!("{}{} answered {}", self.host, path, response.status);
                None
            }
            Err(e) => {
                tracing::trace!("{}{} failed: {:#}", self.host, path, e);
                None
            }
        }
    }

    pub async fn get_text(&self, path: &str) -> Option<String> {
        self.send(Method::Get, path, None).await.map(|r| r.body)
    }

    pub async fn get_json(&self, path: &str) -> Option<Value> {
        let body = self.get_text(path).await?;
        serde_json::from_str(&body).ok()
    }

    pub async fn get_ok(&self, path: &str) -> bool {
        self.send(Method::Get, path, None).await.is_some()
    }

    pub async fn post_json(&self, path: &str, body: Value) -> Option<Value> {
        let response = self.send(Method::Post, path, Some(body)).await?;
        Some(serde_json::from_str(&response.body).unwrap_or(Value::Null))
    }

    pub async fn put_json(&self, path: &str, body: Value) -> Option<Value> {
        let response = self.send(Method::Put, path, Some(body)).await?;
        Some(serde_json::from_str(&response.body).unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_omits_default_port() {
        let mut request = HttpRequest {
            method: Method::Get,
            host: Ipv4Addr::new(192, 168, 1, 101),
            port: 80,
            path: "/cm?cmnd=Status%200".to_string(),
            body: None,
            timeout: Duration::from_millis(500),
        };
        assert_eq!(request.url(), "http://192.168.1.101/cm?cmnd=Status%200");

        request.port = 8081;
        assert_eq!(request.url(), "http://192.168.1.101:8081/cm?cmnd=Status%200");
    }
}

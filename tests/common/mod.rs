//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use registry_gateway::config::{GatewayConfig, RegistryConfig, RetryConfig};

/// Canned response for the programmable backend.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub body: String,
    pub retry_after: Option<u64>,
}

impl MockResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            retry_after: None,
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }
}

/// Start a mock backend that always returns `body` with status 200.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    start_programmable_backend(move |_| async move { MockResponse::ok(body) }).await
}

/// Start a programmable mock backend on an ephemeral port.
///
/// `f` receives the request path (including query) for every connection.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockResponse> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let (read_half, mut write_half) = socket.into_split();
                        let mut reader = BufReader::new(read_half);

                        let mut request_line = String::new();
                        if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
                            return;
                        }
                        loop {
                            let mut header = String::new();
                            match reader.read_line(&mut header).await {
                                Ok(0) | Err(_) => break,
                                Ok(_) if header == "\r\n" || header == "\n" => break,
                                Ok(_) => {}
                            }
                        }
                        let path = request_line
                            .split_whitespace()
                            .nth(1)
                            .unwrap_or("/")
                            .to_string();

                        let response = f(path).await;
                        let status_text = match response.status {
                            200 => "200 OK",
                            400 => "400 Bad Request",
                            404 => "404 Not Found",
                            422 => "422 Unprocessable Entity",
                            429 => "429 Too Many Requests",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };
                        let retry_after = response
                            .retry_after
                            .map(|secs| format!("Retry-After: {secs}\r\n"))
                            .unwrap_or_default();

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n{}",
                            status_text,
                            response.body.len(),
                            retry_after,
                            response.body
                        );
                        let _ = write_half.write_all(response_str.as_bytes()).await;
                        let _ = write_half.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Gateway config with one registry named "test" pointing at `addr`.
///
/// Retries are fast and proxies are bypassed so tests stay local.
pub fn gateway_config(addr: SocketAddr) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.retries = RetryConfig {
        max_attempts: 3,
        base_delay_ms: 10,
        max_delay_ms: 50,
        max_retry_after_secs: 5,
    };
    config.timeouts.connect_secs = 2;
    config.timeouts.request_secs = 5;

    let mut registry = RegistryConfig::new("test", format!("http://{addr}"));
    registry.company_path = "/companies/{id}".into();
    registry.search_path = "/search?q={query}".into();
    registry.system_proxy = false;
    config.registries.push(registry);
    config
}

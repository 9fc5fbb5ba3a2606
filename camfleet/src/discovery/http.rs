//! HTTP inventory endpoint.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{CameraDiscoveryProvider, parse_inventory};
use crate::domain::CameraDescriptor;
use crate::{Error, Result};

/// Fetches the inventory with a GET request returning JSON.
#[derive(Debug, Clone)]
pub struct HttpDiscovery {
    url: String,
    client: reqwest::Client,
}

impl HttpDiscovery {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::Other(format!("Failed to build reqwest client: {}", e)))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CameraDiscoveryProvider for HttpDiscovery {
    fn name(&self) -> &str {
        "http"
    }

    async fn list_cameras(&self) -> Result<Vec<CameraDescriptor>> {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::discovery(format!("request to {} failed: {}", self.url, e)))?;

        let body = response
            .text()
            .await
            .map_err(|e| Error::discovery(format!("failed to read inventory body: {}", e)))?;

        let cameras = parse_inventory(&body)?;
        debug!(url = %self.url, "Fetched {} cameras", cameras.len());
        Ok(cameras)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the endpoint URL.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        format!("http://{}/cameras", addr)
    }

    #[tokio::test]
    async fn test_fetches_inventory() {
        let url = serve_once(
            "HTTP/1.1 200 OK",
            r#"[{"id":"cam-1","sourceUri":"rtsp://a"}]"#,
        )
        .await;

        let discovery = HttpDiscovery::new(url, Duration::from_secs(5)).unwrap();
        let cameras = discovery.list_cameras().await.unwrap();
        assert_eq!(cameras, vec![CameraDescriptor::new("cam-1", "rtsp://a")]);
    }

    #[tokio::test]
    async fn test_error_status_is_discovery_error() {
        let url = serve_once("HTTP/1.1 503 Service Unavailable", "{}").await;

        let discovery = HttpDiscovery::new(url, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            discovery.list_cameras().await,
            Err(Error::Discovery(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_discovery_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let discovery =
            HttpDiscovery::new(format!("http://{}/cameras", addr), Duration::from_secs(2)).unwrap();
        assert!(matches!(
            discovery.list_cameras().await,
            Err(Error::Discovery(_))
        ));
    }
}

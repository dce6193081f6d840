//! HTTP ping uploader

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::PingUploader;
use crate::config::Configuration;
use crate::error::Result;
use crate::metrics_core::{PingRequest, UploadResult};

/// User agent sent with every upload
const USER_AGENT: &str = concat!("glint/", env!("CARGO_PKG_VERSION"));

/// Uploads pings with a POST to `{server_endpoint}{path}`
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpUploader {
    /// Build an uploader from the SDK configuration
    pub fn new(config: &Configuration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.server_endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Endpoint pings are sent to
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }
}

#[async_trait]
impl PingUploader for HttpUploader {
    async fn upload(&self, request: &PingRequest) -> UploadResult {
        let url = self.url_for(&request.path);

        let mut builder = self.client.post(&url).body(request.body.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        match builder.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                debug!(url = %url, status, "Ping uploaded");
                UploadResult::HttpStatus(status)
            }
            Err(e) if e.is_builder() => {
                warn!(url = %url, error = %e, "Ping request could not be built");
                UploadResult::UnrecoverableFailure
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Ping upload failed");
                UploadResult::RecoverableFailure
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn request(headers: HashMap<String, String>) -> PingRequest {
        PingRequest {
            document_id: "doc-1".to_string(),
            path: "/submit/org.example.app/custom/1/doc-1".to_string(),
            body: br#"{"ping_info":{}}"#.to_vec(),
            headers,
        }
    }

    fn uploader_for(endpoint: &str) -> HttpUploader {
        HttpUploader::new(&Configuration::default().with_server_endpoint(endpoint)).unwrap()
    }

    /// Accept one connection, read the full request and answer with `status`.
    async fn serve_once(listener: TcpListener, status: &'static str) -> String {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 1024];

        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&received);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if received.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }

        let response = format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        socket.write_all(response.as_bytes()).await.unwrap();
        String::from_utf8_lossy(&received).into_owned()
    }

    #[test]
    fn test_endpoint_trailing_slash_is_trimmed() {
        let uploader = uploader_for("https://telemetry.example.com/");

        assert_eq!(uploader.endpoint(), "https://telemetry.example.com");
        assert_eq!(
            uploader.url_for("/submit/a/b/1/c"),
            "https://telemetry.example.com/submit/a/b/1/c"
        );
    }

    #[tokio::test]
    async fn test_upload_reports_http_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_once(listener, "202 Accepted"));

        let uploader = uploader_for(&format!("http://{addr}"));
        let headers = HashMap::from([("X-Debug-ID".to_string(), "test".to_string())]);
        let result = uploader.upload(&request(headers)).await;

        assert_eq!(result, UploadResult::HttpStatus(202));
        let received = server.await.unwrap();
        assert!(received.starts_with("POST /submit/org.example.app/custom/1/doc-1 "));
        assert!(received.to_ascii_lowercase().contains("x-debug-id: test"));
    }

    #[tokio::test]
    async fn test_server_error_status_is_passed_through() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve_once(listener, "503 Service Unavailable"));

        let uploader = uploader_for(&format!("http://{addr}"));
        let result = uploader.upload(&request(HashMap::new())).await;

        assert_eq!(result, UploadResult::HttpStatus(503));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused_is_recoverable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let uploader = uploader_for(&format!("http://{addr}"));
        let result = uploader.upload(&request(HashMap::new())).await;

        assert_eq!(result, UploadResult::RecoverableFailure);
    }

    #[tokio::test]
    async fn test_invalid_header_is_unrecoverable() {
        let uploader = uploader_for("http://127.0.0.1:9");
        let headers = HashMap::from([("bad header\n".to_string(), "x".to_string())]);

        let result = uploader.upload(&request(headers)).await;

        assert_eq!(result, UploadResult::UnrecoverableFailure);
    }
}

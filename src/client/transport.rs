//! HTTP transport
//!
//! The client talks to the server through [`Transport`] so that the load
//! orchestration can be driven by anything that yields a status and a body stream.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::Value;

use crate::client::TabbyError;
use crate::types::config::ClientConfig;

/// Response body as a stream of raw chunks
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, TabbyError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Outgoing request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body,
        }
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }
}

/// Response whose body has not been read yet
pub struct HttpResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Collect the whole body as text
    pub async fn text(mut self) -> Result<String, TabbyError> {
        let mut bytes = Vec::new();
        while let Some(chunk) = self.body.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Sends one request and hands back the response stream
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TabbyError>;
}

// ============================================================================
// reqwest implementation
// ============================================================================

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// No overall request timeout is set: load streams can run for minutes.
    /// The client enforces request and stream-idle timeouts itself.
    pub fn new(config: &ClientConfig) -> Result<Self, TabbyError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.clone());

        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| TabbyError::Network(format!("Invalid proxy '{}': {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| TabbyError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TabbyError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        tracing::debug!("{:?} {}", request.method, request.url);

        let response = builder
            .send()
            .await
            .map_err(|e| TabbyError::Network(format!("Request to {} failed: {}", request.url, e)))?;

        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| TabbyError::Network(format!("Stream error: {}", e)))
            })
            .boxed();

        Ok(HttpResponse { status, body })
    }
}

// ============================================================================
// Error detail extraction
// ============================================================================

/// Best-effort message from a non-2xx body, falling back to the status line
pub fn error_detail(status: u16, body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let candidates = [
            json.get("detail").and_then(|d| d.as_str()),
            json.get("detail")
                .and_then(|d| d.get("message"))
                .and_then(|m| m.as_str()),
            json.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str()),
            json.get("error").and_then(|e| e.as_str()),
            json.get("message").and_then(|m| m.as_str()),
        ];
        if let Some(message) = candidates
            .into_iter()
            .flatten()
            .find(|m| !m.trim().is_empty())
        {
            return message.to_string();
        }
    }

    match reqwest::StatusCode::from_u16(status) {
        Ok(code) => code.to_string(),
        Err(_) => format!("HTTP {}", status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_detail_string() {
        assert_eq!(error_detail(400, r#"{"detail":"model not found"}"#), "model not found");
    }

    #[test]
    fn test_detail_nested_shapes() {
        assert_eq!(
            error_detail(400, r#"{"detail":{"message":"bad split"}}"#),
            "bad split"
        );
        assert_eq!(
            error_detail(500, r#"{"error":{"message":"oom","trace":"..."}}"#),
            "oom"
        );
        assert_eq!(error_detail(401, r#"{"error":"unauthorized"}"#), "unauthorized");
    }

    #[test]
    fn test_detail_falls_back_to_status_line() {
        assert_eq!(error_detail(400, "<html>oops</html>"), "400 Bad Request");
        assert_eq!(error_detail(503, r#"{"detail":""}"#), "503 Service Unavailable");
    }

    /// Serve one canned HTTP response on a local port, returning the raw request
    async fn serve_once(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 1024];
            // Read headers, then the body announced by Content-Length
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if raw.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&raw).to_string()
        });
        (format!("http://{}", addr), handle)
    }

    #[tokio::test]
    async fn test_reqwest_transport_streams_body() {
        let (base, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nContent-Length: 45\r\nConnection: close\r\n\r\ndata: {\"module\":1,\"modules\":1,\"status\":\"x\"}\n\n",
        )
        .await;

        let transport = ReqwestTransport::new(&ClientConfig::default()).unwrap();
        let request = HttpRequest::post(format!("{}/v1/model/load", base), Some(serde_json::json!({"name": "m"})))
            .with_headers(vec![("X-admin-key".to_string(), "k".to_string())]);
        let response = transport.send(request).await.unwrap();
        assert!(response.is_success());
        let body = response.text().await.unwrap();
        assert!(body.starts_with("data: {\"module\":1"));

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /v1/model/load"));
        assert!(raw.to_ascii_lowercase().contains("x-admin-key: k"));
        assert!(raw.contains(r#"{"name":"m"}"#));
    }
}

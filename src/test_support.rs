//! Local HTTP capture server for tests.
//!
//! An axum router on an ephemeral port whose fallback handler records every
//! request and answers with a fixed status and body.

use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// A request as seen by the capture server.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: String,
}

impl CapturedRequest {
    fn new(method: &Method, uri: &Uri, headers: HeaderMap, body: &Bytes) -> Self {
        Self {
            method: method.as_str().to_string(),
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            headers,
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }

    /// First header with this name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }
}

pub struct CaptureServer {
    port: u16,
    requests: mpsc::UnboundedReceiver<CapturedRequest>,
}

impl CaptureServer {
    pub async fn start(status: u16, body: &'static str) -> Self {
        Self::start_with_delay(status, body, Duration::ZERO).await
    }

    /// Like [`start`](Self::start), but waits `delay` before answering.
    pub async fn start_with_delay(status: u16, body: &'static str, delay: Duration) -> Self {
        let status = StatusCode::from_u16(status).unwrap();
        let (tx, requests) = mpsc::unbounded_channel();

        let app = Router::new().fallback(
            move |method: Method, uri: Uri, headers: HeaderMap, payload: Bytes| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(CapturedRequest::new(&method, &uri, headers, &payload));
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    (status, body)
                }
            },
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { port, requests }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port)
    }

    pub async fn next_request(&mut self) -> CapturedRequest {
        tokio::time::timeout(Duration::from_secs(10), self.requests.recv())
            .await
            .expect("no request captured within 10s")
            .expect("capture server stopped")
    }

    /// Wait briefly and return a request if one arrived.
    pub async fn maybe_request(&mut self, wait: Duration) -> Option<CapturedRequest> {
        tokio::time::timeout(wait, self.requests.recv())
            .await
            .ok()
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn decodes_chunked_bodies() {
        let mut server = CaptureServer::start(202, "accepted").await;
        let mut stream = TcpStream::connect(("127.0.0.1", server.port)).await.unwrap();
        stream
            .write_all(
                b"POST /upload?x=1 HTTP/1.1\r\n\
                  Host: 127.0.0.1\r\n\
                  X-Trace: a\r\n\
                  Transfer-Encoding: chunked\r\n\
                  Connection: close\r\n\r\n\
                  5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
            )
            .await
            .unwrap();

        let request = server.next_request().await;
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/upload");
        assert_eq!(request.query.as_deref(), Some("x=1"));
        assert_eq!(request.header("x-trace"), Some("a"));
        assert_eq!(request.body, "hello world");

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 202"), "{response}");
        assert!(response.ends_with("accepted"), "{response}");
    }
}

//! Outbound HTTP relay.
//!
//! Turns resolved relay parameters into an immutable [`HttpRequestSpec`],
//! performs exactly one call with it, and captures either the response
//! body or the failure message.

mod parse;

pub use parse::{parse_headers, parse_query_params};

use std::fmt;
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, Url};
use tracing::{debug, instrument, warn};

use crate::error::CommandError;
use crate::sink::{self, ExecutionResult};

const APPLICATION_JSON_UTF8: &str = "application/json; charset=utf-8";

/// Methods the relay understands. Anything else is treated as GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
}

impl HttpMethod {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "PATCH" => Self::Patch,
            "HEAD" => Self::Head,
            _ => Self::Get,
        }
    }

    fn as_method(self) -> Method {
        match self {
            Self::Get => Method::GET,
            Self::Post => Method::POST,
            Self::Put => Method::PUT,
            Self::Delete => Method::DELETE,
            Self::Patch => Method::PATCH,
            Self::Head => Method::HEAD,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.as_method(), f)
    }
}

/// Request body as it will go on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBody {
    pub bytes: Vec<u8>,
    /// `None` for the placeholder body of POST/PUT/PATCH without a payload.
    pub content_type: Option<&'static str>,
}

impl RequestBody {
    const fn empty() -> Self {
        Self {
            bytes: Vec::new(),
            content_type: None,
        }
    }
}

/// A fully resolved outbound request. Built once, never modified.
#[derive(Debug, Clone)]
pub struct HttpRequestSpec {
    pub url: Url,
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub timeout: Option<Duration>,
}

impl HttpRequestSpec {
    /// Build the request.
    ///
    /// Query parameters are appended to `base_url` in order. A JSON payload
    /// is attached only for methods that carry one: POST, PUT, and PATCH
    /// always send a body (empty if there is no payload), DELETE sends one
    /// only when there is a payload, GET and HEAD never do.
    pub fn build(
        base_url: &str,
        method: HttpMethod,
        query: &[(String, String)],
        headers: Vec<(String, String)>,
        json_payload: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Self, CommandError> {
        let mut url = Url::parse(base_url.trim()).map_err(|e| CommandError::Validation {
            field: "URL",
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CommandError::Validation {
                field: "URL",
                reason: format!("unsupported scheme {:?}", url.scheme()),
            });
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        let payload = json_payload
            .filter(|p| !p.is_empty())
            .map(|p| RequestBody {
                bytes: p.as_bytes().to_vec(),
                content_type: Some(APPLICATION_JSON_UTF8),
            });
        let body = match method {
            HttpMethod::Get | HttpMethod::Head => None,
            HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch => {
                Some(payload.unwrap_or_else(RequestBody::empty))
            }
            HttpMethod::Delete => payload,
        };

        Ok(Self {
            url,
            method,
            headers,
            body,
            timeout,
        })
    }
}

/// Executes relay requests with one client per timeout setting.
#[derive(Debug, Clone)]
pub struct HttpRelay {
    client: Client,
}

impl HttpRelay {
    /// Create a relay whose connect and read phases share `timeout`.
    /// `None` disables both. Body writes are not bounded separately.
    pub fn new(timeout: Option<Duration>) -> Result<Self, CommandError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.connect_timeout(timeout).read_timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| CommandError::Execution(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Perform the request and capture its body or failure.
    #[instrument(skip(self, spec), fields(method = %spec.method, url = %spec.url))]
    pub async fn execute(&self, spec: &HttpRequestSpec) -> ExecutionResult {
        let mut request = self
            .client
            .request(spec.method.as_method(), spec.url.clone());

        let body_type = spec.body.as_ref().and_then(|b| b.content_type);
        for (name, value) in &spec.headers {
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) else {
                warn!(header = %name, "Skipping invalid header");
                continue;
            };
            // The body's own content type wins over a user-supplied one.
            if body_type.is_some() && name == CONTENT_TYPE {
                continue;
            }
            request = request.header(name, value);
        }
        if let Some(body) = &spec.body {
            if let Some(content_type) = body.content_type {
                request = request.header(CONTENT_TYPE, content_type);
            }
            request = request.body(body.bytes.clone());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return ExecutionResult::Failure(e.to_string()),
        };
        let status = response.status();
        match response.text().await {
            Ok(text) => {
                debug!(status = %status, bytes = text.len(), "Relay request completed");
                ExecutionResult::Success(text)
            }
            Err(e) => ExecutionResult::Failure(e.to_string()),
        }
    }

    /// Post a relayed body to a callback URL with this relay's timeouts.
    pub async fn post_callback(&self, url: &str, body: String) -> Result<(), CommandError> {
        sink::post_text(&self.client, url, body).await
    }
}

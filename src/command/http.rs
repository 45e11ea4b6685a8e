//! `x3`: perform an HTTP request and relay the response body.

use std::time::Duration;

use tracing::{info, warn};

use super::{non_zero, required, seconds_or, HandlerContext};
use crate::envelope::Envelope;
use crate::error::CommandError;
use crate::relay::{parse_headers, parse_query_params, HttpMethod, HttpRelay, HttpRequestSpec};
use crate::sink::{ExecutionResult, ResultSink};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpParams {
    pub url: String,
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub json_body: Option<String>,
    pub callback: Option<String>,
    /// `None` disables the timeout.
    pub timeout: Option<Duration>,
}

pub fn resolve(envelope: &Envelope, default_timeout_secs: u64) -> Result<HttpParams, CommandError> {
    let url = required(envelope, "URL")?.to_string();
    let method = envelope
        .get("requestType")
        .map(HttpMethod::parse)
        .unwrap_or_default();
    let json_body = envelope
        .get("PostJsonParams")
        .filter(|body| !body.is_empty() && method != HttpMethod::Get)
        .map(str::to_string);

    Ok(HttpParams {
        url,
        method,
        headers: envelope.get("headers").map(parse_headers).unwrap_or_default(),
        query: envelope.get("Params").map(parse_query_params).unwrap_or_default(),
        json_body,
        callback: envelope.get_non_blank("callBackURL").map(str::to_string),
        timeout: non_zero(seconds_or(envelope, "timeout", default_timeout_secs)),
    })
}

/// Perform the request and deliver the outcome.
///
/// A listener receives the body, or `HTTP error: ...` on failure. Without
/// one, a successful body is posted to `callBackURL` and failures are only
/// logged.
pub async fn run(params: HttpParams, mut sink: ResultSink, ctx: HandlerContext) {
    let HttpParams {
        url,
        method,
        headers,
        query,
        json_body,
        callback,
        timeout,
    } = params;

    let built =
        HttpRequestSpec::build(&url, method, &query, headers, json_body.as_deref(), timeout);
    let spec = match built {
        Ok(spec) => spec,
        Err(e) => {
            if let Some(listener) = sink.claim_listener() {
                listener.deliver(format!("URL error: {e}"));
            } else {
                warn!(error = %e, "Dropping request with unusable URL");
            }
            return;
        }
    };

    let relay = HttpRelay::new(spec.timeout);
    let result = match &relay {
        Ok(relay) => tokio::select! {
            result = relay.execute(&spec) => result,
            () = ctx.cancel.cancelled() => ExecutionResult::Failure("request cancelled".into()),
        },
        Err(e) => ExecutionResult::Failure(e.to_string()),
    };

    if let Some(listener) = sink.claim_listener() {
        listener.deliver(match result {
            ExecutionResult::Success(body) => body,
            ExecutionResult::Failure(message) => format!("HTTP error: {message}"),
        });
        return;
    }

    let body = match result {
        ExecutionResult::Success(body) => body,
        ExecutionResult::Failure(message) => {
            warn!(error = %message, url = %spec.url, "Relayed request failed");
            return;
        }
    };
    let Some(callback) = callback else {
        info!(bytes = body.len(), "No callBackURL, response dropped");
        return;
    };
    if let Ok(relay) = &relay {
        if let Err(e) = relay.post_callback(&callback, body).await {
            warn!(error = %e, "Failed to deliver relayed response");
        }
    }
}

//! Result delivery.
//!
//! A command's outcome goes to exactly one place: a one-shot test listener
//! if one is available, otherwise the caller's callback URL. Listeners come
//! from two sources, checked in this order:
//!
//! 1. a listener attached to the dispatch call itself;
//! 2. the dispatcher-wide [`ListenerSlot`], which is read and cleared in a
//!    single step so concurrent tasks race for at most one delivery.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::CommandError;

const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";

/// Outcome of one command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    Success(String),
    Failure(String),
}

impl ExecutionResult {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// One-shot hook that receives a command's output instead of the network.
#[derive(Debug)]
pub struct TestListener {
    tx: oneshot::Sender<String>,
}

impl TestListener {
    /// Create a listener and the receiver its output arrives on.
    pub fn channel() -> (Self, oneshot::Receiver<String>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Hand the output over, consuming the listener.
    pub fn deliver(self, output: String) {
        if self.tx.send(output).is_err() {
            warn!("Test listener was dropped before delivery");
        }
    }
}

/// Dispatcher-wide slot holding at most one registered listener.
#[derive(Debug, Default)]
pub struct ListenerSlot {
    inner: Mutex<Option<TestListener>>,
}

impl ListenerSlot {
    /// Register a listener, returning the one it replaced.
    pub fn set(&self, listener: TestListener) -> Option<TestListener> {
        self.lock().replace(listener)
    }

    /// Remove and return the registered listener.
    pub fn take(&self) -> Option<TestListener> {
        self.lock().take()
    }

    pub fn is_registered(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<TestListener>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-invocation view of where a result may go.
#[derive(Debug)]
pub struct ResultSink {
    listener: Option<TestListener>,
    slot: Arc<ListenerSlot>,
}

impl ResultSink {
    pub const fn new(listener: Option<TestListener>, slot: Arc<ListenerSlot>) -> Self {
        Self { listener, slot }
    }

    /// Whether a listener could currently receive the result.
    ///
    /// Only a hint: another task may claim the shared slot first.
    pub fn has_listener(&self) -> bool {
        self.listener.is_some() || self.slot.is_registered()
    }

    /// Claim a listener, preferring the per-invocation one.
    pub fn claim_listener(&mut self) -> Option<TestListener> {
        self.listener.take().or_else(|| self.slot.take())
    }
}

/// Posts command output to callback endpoints.
#[derive(Debug, Clone)]
pub struct CallbackPoster {
    client: Client,
}

impl CallbackPoster {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .context("Failed to create callback HTTP client")?;
        Ok(Self { client })
    }

    pub async fn post_text(&self, url: &str, body: String) -> Result<(), CommandError> {
        post_text(&self.client, url, body).await
    }
}

/// POST `body` as UTF-8 plain text, treating non-2xx statuses as failures.
pub async fn post_text(client: &Client, url: &str, body: String) -> Result<(), CommandError> {
    let delivery_error = |reason: String| CommandError::Delivery {
        url: url.to_string(),
        reason,
    };

    let response = client
        .post(url)
        .header(CONTENT_TYPE, TEXT_PLAIN_UTF8)
        .body(body)
        .send()
        .await
        .map_err(|e| delivery_error(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        debug!(url = %url, status = %status, "Posted result to callback");
        Ok(())
    } else {
        Err(delivery_error(format!("endpoint answered {status}")))
    }
}

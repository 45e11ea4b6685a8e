//! Stdin/stdout pipe transport for automation helper processes.
//!
//! Each surface owns one helper process and talks length-prefixed JSON on
//! the child's stdin (requests) and stdout (messages). A surface is driven
//! by a single flow through `&mut self`, so no locking is needed.

use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::{debug, warn};

use super::protocol::{HelperMessage, HelperRequest};
use super::{recv_message, send_message};
use crate::automation::{AutomationSurface, SurfaceProvider};
use crate::config::AutomationConfig;

/// Spawns one helper process per surface.
#[derive(Debug, Clone)]
pub struct PipeSurfaceProvider {
    exec: String,
    args: Vec<String>,
    ready_timeout: Duration,
}

impl PipeSurfaceProvider {
    pub fn new(exec: impl Into<String>, args: Vec<String>, ready_timeout: Duration) -> Self {
        Self {
            exec: exec.into(),
            args,
            ready_timeout,
        }
    }

    /// Provider for the configured helper, if any.
    pub fn from_config(config: &AutomationConfig) -> Option<Self> {
        config.helper_exec.as_ref().map(|exec| {
            Self::new(
                exec.clone(),
                config.helper_args.clone(),
                config.helper_ready_timeout(),
            )
        })
    }
}

#[async_trait]
impl SurfaceProvider for PipeSurfaceProvider {
    async fn open(&self) -> Result<Box<dyn AutomationSurface>> {
        let surface = PipeSurface::spawn(&self.exec, &self.args, self.ready_timeout).await?;
        Ok(Box::new(surface))
    }
}

/// Surface hosted by a helper process.
///
/// `page_finished` messages that arrive while a script result is awaited
/// are buffered and handed out by later `next_page_load` calls, in order.
pub struct PipeSurface {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    page_loads: VecDeque<String>,
    next_script_id: u64,
    alive: bool,
}

impl PipeSurface {
    /// Spawn a helper process and wait for its `Ready` message.
    pub async fn spawn(exec: &str, args: &[String], ready_timeout: Duration) -> Result<Self> {
        debug!(exec = %exec, "Spawning automation helper");

        let mut child = tokio::process::Command::new(exec)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn automation helper: {exec}"))?;

        let stdin = child.stdin.take().context("Failed to take helper stdin")?;
        let mut stdout = child.stdout.take().context("Failed to take helper stdout")?;

        let ready_bytes = tokio::time::timeout(ready_timeout, recv_message(&mut stdout))
            .await
            .map_err(|_| anyhow::anyhow!("Helper did not send Ready within {ready_timeout:?}"))?
            .context("Failed to read helper Ready message")?;

        let ready_msg: HelperMessage = serde_json::from_slice(&ready_bytes)
            .context("Failed to parse helper Ready message")?;

        match ready_msg {
            HelperMessage::Ready => debug!("Automation helper is ready"),
            other => anyhow::bail!("Expected Ready message, got: {other:?}"),
        }

        Ok(Self {
            child,
            stdin,
            stdout,
            page_loads: VecDeque::new(),
            next_script_id: 0,
            alive: true,
        })
    }

    async fn send(&mut self, request: &HelperRequest) -> Result<()> {
        anyhow::ensure!(self.alive, "Automation helper is not alive");
        let bytes = serde_json::to_vec(request).context("Failed to serialize request")?;
        let sent = send_message(&mut self.stdin, &bytes).await;
        if sent.is_err() {
            self.alive = false;
        }
        sent.context("Failed to send request to helper")
    }

    async fn recv(&mut self) -> Result<HelperMessage> {
        anyhow::ensure!(self.alive, "Automation helper is not alive");
        let bytes = match recv_message(&mut self.stdout).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.alive = false;
                return Err(e.context("Failed to read message from helper"));
            }
        };
        serde_json::from_slice(&bytes).context("Failed to parse helper message")
    }
}

#[async_trait]
impl AutomationSurface for PipeSurface {
    async fn load(&mut self, url: &str) -> Result<()> {
        self.send(&HelperRequest::Load {
            url: url.to_string(),
        })
        .await
    }

    async fn next_page_load(&mut self) -> Option<String> {
        if let Some(url) = self.page_loads.pop_front() {
            return Some(url);
        }
        loop {
            match self.recv().await {
                Ok(HelperMessage::PageFinished { url }) => return Some(url),
                Ok(HelperMessage::Error { message }) => warn!(%message, "Helper reported an error"),
                Ok(other) => debug!(message = ?other, "Ignoring helper message"),
                Err(e) => {
                    debug!(error = %e, "Helper event stream ended");
                    return None;
                }
            }
        }
    }

    async fn evaluate_script(&mut self, script: &str) -> Result<String> {
        self.next_script_id += 1;
        let id = self.next_script_id;
        self.send(&HelperRequest::Evaluate {
            id,
            script: script.to_string(),
        })
        .await?;

        loop {
            match self.recv().await? {
                HelperMessage::ScriptResult { id: got, result } if got == id => return Ok(result),
                HelperMessage::PageFinished { url } => self.page_loads.push_back(url),
                HelperMessage::Error { message } => {
                    anyhow::bail!("Helper failed to evaluate script: {message}")
                }
                other => debug!(message = ?other, "Ignoring helper message"),
            }
        }
    }

    async fn scroll_by(&mut self, delta_y: i32) -> Result<()> {
        self.send(&HelperRequest::ScrollBy { delta_y }).await
    }

    async fn destroy(&mut self) -> Result<()> {
        if self.alive {
            if let Err(e) = self.send(&HelperRequest::Destroy).await {
                warn!(error = %e, "Graceful destroy failed, killing helper");
            }
        }
        self.alive = false;

        // Kill the process to ensure cleanup
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;

        debug!("Automation helper shut down");
        Ok(())
    }
}

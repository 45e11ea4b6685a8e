//! Browser automation driver.
//!
//! Automation commands drive an [`AutomationSurface`]: something that can
//! load pages, report page loads, evaluate scripts, and scroll. A flow owns
//! its surface for its whole lifetime and runs as a single task, so every
//! surface interaction happens in order on one context.

pub mod script;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AutomationConfig;
use crate::error::CommandError;

/// A page-rendering surface the daemon can drive.
#[async_trait]
pub trait AutomationSurface: Send {
    /// Start loading `url`.
    async fn load(&mut self, url: &str) -> Result<()>;

    /// Wait for the next finished page load, in the order the surface
    /// reports them. `None` once the surface has gone away.
    async fn next_page_load(&mut self) -> Option<String>;

    /// Evaluate `script` in the current page and return its result.
    async fn evaluate_script(&mut self, script: &str) -> Result<String>;

    async fn scroll_by(&mut self, delta_y: i32) -> Result<()>;

    /// Release the surface. Called exactly once per surface.
    async fn destroy(&mut self) -> Result<()>;
}

/// Creates fresh surfaces, one per automation command.
#[async_trait]
pub trait SurfaceProvider: Send + Sync {
    async fn open(&self) -> Result<Box<dyn AutomationSurface>>;
}

/// How a flow ended on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Scrolling finished normally.
    Completed,
    /// No page load arrived within the stall timeout.
    Stalled { state: &'static str },
    /// The surface stopped reporting events.
    SurfaceGone { state: &'static str },
}

/// One automation command's state machine.
#[async_trait]
pub trait Flow: Send {
    fn name(&self) -> &'static str;

    /// Drive `surface` until the flow closes. Page loads are awaited with
    /// [`next_page_event`] using `stall`.
    async fn run(self, surface: &mut dyn AutomationSurface, stall: Option<Duration>)
        -> FlowOutcome;
}

/// Result of waiting for a page load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    Loaded(String),
    Stalled,
    Gone,
}

/// Wait for the next page load, giving up after `stall` when set.
pub async fn next_page_event(
    surface: &mut dyn AutomationSurface,
    stall: Option<Duration>,
) -> PageEvent {
    let next = surface.next_page_load();
    let loaded = match stall {
        Some(limit) => match tokio::time::timeout(limit, next).await {
            Ok(loaded) => loaded,
            Err(_) => return PageEvent::Stalled,
        },
        None => next.await,
    };
    loaded.map_or(PageEvent::Gone, PageEvent::Loaded)
}

/// Time limits applied to every flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowLimits {
    pub stall: Option<Duration>,
    pub deadline: Option<Duration>,
}

impl FlowLimits {
    pub fn from_config(config: &AutomationConfig) -> Self {
        Self {
            stall: config.stall_timeout(),
            deadline: config.deadline(),
        }
    }
}

enum Ending {
    Finished(FlowOutcome),
    DeadlineElapsed,
    Cancelled,
}

/// Open a surface, run `flow` on it, and destroy the surface afterwards.
///
/// The flow is bounded by the deadline in `limits` and stops early when
/// `cancel` fires. The surface is destroyed on every path; destroy errors
/// are logged only.
pub async fn drive<F: Flow>(
    provider: &dyn SurfaceProvider,
    flow: F,
    limits: FlowLimits,
    cancel: CancellationToken,
) -> Result<(), CommandError> {
    let name = flow.name();
    let mut surface = provider
        .open()
        .await
        .map_err(|e| CommandError::Execution(format!("failed to open surface: {e:#}")))?;
    debug!(flow = name, "Surface opened");

    let ending = {
        let run = flow.run(surface.as_mut(), limits.stall);
        let bounded = async {
            match limits.deadline {
                Some(deadline) => tokio::time::timeout(deadline, run)
                    .await
                    .map_or(Ending::DeadlineElapsed, Ending::Finished),
                None => Ending::Finished(run.await),
            }
        };
        tokio::select! {
            ending = bounded => ending,
            () = cancel.cancelled() => Ending::Cancelled,
        }
    };

    if let Err(e) = surface.destroy().await {
        warn!(flow = name, error = %e, "Failed to destroy surface");
    }

    match ending {
        Ending::Finished(FlowOutcome::Completed) => {
            info!(flow = name, "Automation flow completed");
            Ok(())
        }
        Ending::Finished(FlowOutcome::Stalled { state })
        | Ending::Finished(FlowOutcome::SurfaceGone { state }) => {
            Err(CommandError::AutomationStall {
                state: state.to_string(),
            })
        }
        Ending::DeadlineElapsed => Err(CommandError::AutomationStall {
            state: "deadline".to_string(),
        }),
        Ending::Cancelled => {
            info!(flow = name, "Automation flow cancelled");
            Ok(())
        }
    }
}

/// Scroll down in random steps until `stay` has elapsed.
///
/// Each step scrolls 200–499 px and then pauses 500–1499 ms. Stops early if
/// the surface rejects a scroll.
pub async fn scroll_for(surface: &mut dyn AutomationSurface, stay: Duration) {
    let mut rng = StdRng::from_entropy();
    let started = Instant::now();
    let mut steps = 0u32;
    while started.elapsed() < stay {
        let offset = rng.gen_range(200..500);
        if let Err(e) = surface.scroll_by(offset).await {
            warn!(error = %e, "Scroll failed, stopping");
            break;
        }
        steps += 1;
        let pause = Duration::from_millis(rng.gen_range(500..1500));
        tokio::time::sleep(pause).await;
    }
    debug!(steps, stay_secs = stay.as_secs(), "Scrolling finished");
}

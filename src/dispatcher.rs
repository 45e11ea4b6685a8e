//! Top-level entry point for inbound envelopes.
//!
//! Dispatch is synchronous and cheap: validate the envelope, resolve the
//! handler's parameters, submit one task to the execution pool, return.
//! Everything that can block happens inside that task.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::automation::SurfaceProvider;
use crate::command::{self, HandlerContext};
use crate::config::Config;
use crate::envelope::{CommandKind, Envelope};
use crate::error::{CommandError, PoolError};
use crate::pool::ExecutionPool;
use crate::sink::{CallbackPoster, ListenerSlot, ResultSink, TestListener};
use crate::transport::PipeSurfaceProvider;

/// Why an envelope produced no task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    Empty,
    MissingType,
    UnknownKind(String),
    /// A required field was missing or malformed.
    Invalid(String),
    /// Automation commands need a configured helper.
    NoAutomation,
}

/// What happened to one envelope. Purely informational.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Submitted(CommandKind),
    Ignored(IgnoreReason),
    Rejected(PoolError),
}

impl DispatchOutcome {
    pub const fn is_submitted(&self) -> bool {
        matches!(self, Self::Submitted(_))
    }
}

/// Routes envelopes to their handlers.
pub struct Dispatcher {
    pool: ExecutionPool,
    slot: Arc<ListenerSlot>,
    ctx: HandlerContext,
}

impl Dispatcher {
    /// Build a dispatcher on the current Tokio runtime, using the configured
    /// automation helper when there is one.
    pub fn new(config: Config) -> Result<Self> {
        let surfaces = PipeSurfaceProvider::from_config(&config.automation)
            .map(|provider| Arc::new(provider) as Arc<dyn SurfaceProvider>);
        Self::with_surface_provider(config, surfaces)
    }

    pub fn with_surface_provider(
        config: Config,
        surfaces: Option<Arc<dyn SurfaceProvider>>,
    ) -> Result<Self> {
        let pool = ExecutionPool::new(&config.pool)?;
        let poster = CallbackPoster::new(std::time::Duration::from_secs(
            config.http.callback_timeout_seconds,
        ))
        .context("Failed to create callback poster")?;
        let ctx = HandlerContext {
            config: Arc::new(config),
            poster,
            surfaces,
            cancel: pool.cancellation(),
        };
        Ok(Self {
            pool,
            slot: Arc::new(ListenerSlot::default()),
            ctx,
        })
    }

    /// Dispatch one envelope.
    pub fn dispatch(&self, envelope: Envelope) -> DispatchOutcome {
        self.route(envelope, None)
    }

    /// Dispatch one envelope whose result goes to `listener`.
    pub fn dispatch_with_listener(
        &self,
        envelope: Envelope,
        listener: TestListener,
    ) -> DispatchOutcome {
        self.route(envelope, Some(listener))
    }

    /// Register the dispatcher-wide one-shot listener, replacing any
    /// previous one. The first task to finish after this claims it.
    pub fn set_test_listener(&self, listener: TestListener) {
        if self.slot.set(listener).is_some() {
            debug!("Replaced registered test listener");
        }
    }

    /// Stop accepting envelopes and cancel running commands.
    pub fn shutdown(&self) {
        info!(in_flight = self.pool.in_flight(), "Shutting down dispatcher");
        self.pool.shutdown();
    }

    /// Resolve once every submitted command has finished.
    pub async fn wait_idle(&self) {
        self.pool.wait_idle().await;
    }

    fn route(&self, envelope: Envelope, listener: Option<TestListener>) -> DispatchOutcome {
        if envelope.is_empty() {
            debug!("Ignoring empty envelope");
            return DispatchOutcome::Ignored(IgnoreReason::Empty);
        }
        let Some(kind) = envelope.kind() else {
            debug!(fields = envelope.len(), "Ignoring envelope without type");
            return DispatchOutcome::Ignored(IgnoreReason::MissingType);
        };

        let sink = ResultSink::new(listener, Arc::clone(&self.slot));
        let ctx = self.ctx.clone();
        let submitted = match &kind {
            CommandKind::ShellRelay => command::shell::resolve(&envelope, sink.has_listener())
                .map(|params| self.submit(&kind, command::shell::run(params, sink, ctx))),
            CommandKind::HttpRelay => {
                command::http::resolve(&envelope, ctx.config.http.default_timeout_seconds)
                    .map(|params| self.submit(&kind, command::http::run(params, sink, ctx)))
            }
            CommandKind::PageClickAutomation => {
                if ctx.surfaces.is_none() {
                    return self.no_automation(&kind);
                }
                command::page_click::resolve(&envelope)
                    .map(|params| self.submit(&kind, command::page_click::run(params, ctx)))
            }
            CommandKind::SearchAndScroll => {
                if ctx.surfaces.is_none() {
                    return self.no_automation(&kind);
                }
                command::search::resolve(&envelope)
                    .map(|params| self.submit(&kind, command::search::run(params, ctx)))
            }
            CommandKind::Unknown(raw) => {
                info!(kind = %kind, "Ignoring unknown command type");
                return DispatchOutcome::Ignored(IgnoreReason::UnknownKind(raw.clone()));
            }
        };

        match submitted {
            Ok(Ok(())) => {
                debug!(kind = %kind, "Command submitted");
                DispatchOutcome::Submitted(kind)
            }
            Ok(Err(e)) => {
                warn!(kind = %kind, error = %CommandError::from(e), "Command rejected");
                DispatchOutcome::Rejected(e)
            }
            Err(e) => {
                info!(kind = %kind, error = %e, "Dropping command");
                DispatchOutcome::Ignored(IgnoreReason::Invalid(e.to_string()))
            }
        }
    }

    fn submit<F>(&self, kind: &CommandKind, task: F) -> Result<(), PoolError>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.pool.submit(kind.to_string(), task)
    }

    fn no_automation(&self, kind: &CommandKind) -> DispatchOutcome {
        warn!(kind = %kind, "No automation helper configured, dropping command");
        DispatchOutcome::Ignored(IgnoreReason::NoAutomation)
    }
}

//! `x2`: load a page, click an element by its text, then scroll.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{required, seconds_field, HandlerContext};
use crate::automation::script::{self, CLICKED};
use crate::automation::{
    drive, next_page_event, scroll_for, AutomationSurface, Flow, FlowLimits, FlowOutcome,
    PageEvent,
};
use crate::envelope::Envelope;
use crate::error::CommandError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageClickParams {
    pub url: String,
    pub click_text: String,
    pub stay: Duration,
}

pub fn resolve(envelope: &Envelope) -> Result<PageClickParams, CommandError> {
    let url = required(envelope, "webURL")?.to_string();
    let click_text = required(envelope, "ClickText")?.to_string();
    let stay = seconds_field(envelope, "stayTime")?
        .ok_or_else(|| CommandError::missing("stayTime"))?;
    Ok(PageClickParams {
        url,
        click_text,
        stay: Duration::from_secs(stay),
    })
}

pub async fn run(params: PageClickParams, ctx: HandlerContext) {
    let Some(provider) = ctx.surfaces.clone() else {
        warn!("No automation helper configured, dropping page-click command");
        return;
    };
    let limits = FlowLimits::from_config(&ctx.config.automation);
    if let Err(e) = drive(provider.as_ref(), PageClickFlow(params), limits, ctx.cancel).await {
        warn!(error = %e, "Page-click flow ended early");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingFirstLoad,
    ClickAttempted,
}

impl State {
    const fn name(self) -> &'static str {
        match self {
            Self::AwaitingFirstLoad => "awaiting_first_load",
            Self::ClickAttempted => "click_attempted",
        }
    }
}

pub struct PageClickFlow(pub PageClickParams);

#[async_trait]
impl Flow for PageClickFlow {
    fn name(&self) -> &'static str {
        "page-click"
    }

    async fn run(
        self,
        surface: &mut dyn AutomationSurface,
        stall: Option<Duration>,
    ) -> FlowOutcome {
        let Self(params) = self;
        if let Err(e) = surface.load(&params.url).await {
            warn!(error = %e, url = %params.url, "Failed to load page");
            return FlowOutcome::SurfaceGone {
                state: State::AwaitingFirstLoad.name(),
            };
        }

        let mut state = State::AwaitingFirstLoad;
        loop {
            let url = match next_page_event(surface, stall).await {
                PageEvent::Loaded(url) => url,
                PageEvent::Stalled => return FlowOutcome::Stalled { state: state.name() },
                PageEvent::Gone => return FlowOutcome::SurfaceGone { state: state.name() },
            };
            debug!(url = %url, state = state.name(), "Page loaded");

            match state {
                State::AwaitingFirstLoad => {
                    let script = script::click_by_text(&params.click_text);
                    match surface.evaluate_script(&script).await {
                        Ok(result) => {
                            let clicked = script::script_value(&result) == CLICKED;
                            info!(clicked, "Click script evaluated");
                        }
                        Err(e) => warn!(error = %e, "Click script failed"),
                    }
                    state = State::ClickAttempted;
                }
                State::ClickAttempted => {
                    scroll_for(surface, params.stay).await;
                    return FlowOutcome::Completed;
                }
            }
        }
    }
}

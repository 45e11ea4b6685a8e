//! `x4`: search for a keyword, page through results until a link to the
//! target site shows up, click it, then scroll.

use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use super::{required, seconds_or, HandlerContext};
use crate::automation::script::{self, FOUND, NEXT_CLICKED, SUBMITTED};
use crate::automation::{
    drive, next_page_event, scroll_for, AutomationSurface, Flow, FlowLimits, FlowOutcome,
    PageEvent,
};
use crate::config::SearchEngineConfig;
use crate::envelope::Envelope;
use crate::error::CommandError;

const DEFAULT_STAY_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams {
    pub keyword: String,
    pub target: String,
    pub stay: Duration,
}

/// `keywoard` (sic) and `targetWebsite` are required; `stayTime` defaults
/// to five seconds and keeps the default when unparsable.
pub fn resolve(envelope: &Envelope) -> Result<SearchParams, CommandError> {
    let keyword = required(envelope, "keywoard")?.to_string();
    let target = required(envelope, "targetWebsite")?.to_string();
    let stay = seconds_or(envelope, "stayTime", DEFAULT_STAY_SECS);
    Ok(SearchParams {
        keyword,
        target,
        stay: Duration::from_secs(stay),
    })
}

pub async fn run(params: SearchParams, ctx: HandlerContext) {
    let Some(provider) = ctx.surfaces.clone() else {
        warn!("No automation helper configured, dropping search command");
        return;
    };
    let limits = FlowLimits::from_config(&ctx.config.automation);
    let flow = SearchFlow {
        params,
        engine: ctx.config.automation.search_engine.clone(),
    };
    if let Err(e) = drive(provider.as_ref(), flow, limits, ctx.cancel).await {
        warn!(error = %e, "Search flow ended early");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    HomepageLoading,
    /// Results page `page` (1-based) is loading or loaded.
    Scanning { page: u32 },
    TargetClicked,
    /// Every allowed page was scanned without a match.
    Exhausted,
    /// The engine offered no next page.
    NoNextPage,
}

impl State {
    const fn name(self) -> &'static str {
        match self {
            Self::HomepageLoading => "homepage_loading",
            Self::Scanning { .. } => "scanning",
            Self::TargetClicked => "target_clicked",
            Self::Exhausted => "exhausted",
            Self::NoNextPage => "no_next_page",
        }
    }
}

pub struct SearchFlow {
    pub params: SearchParams,
    pub engine: SearchEngineConfig,
}

impl SearchFlow {
    /// Scan the current results page. Returns the state to continue in.
    async fn scan(
        &self,
        surface: &mut dyn AutomationSurface,
        page: u32,
        rng: &mut StdRng,
    ) -> State {
        let scanned = surface
            .evaluate_script(&script::click_link_to(&self.params.target))
            .await;
        match scanned {
            Ok(result) if script::script_value(&result) == FOUND => {
                info!(page, "Target link clicked");
                return State::TargetClicked;
            }
            Ok(_) => debug!(page, "Target not on this page"),
            Err(e) => warn!(error = %e, page, "Scan script failed"),
        }

        if page >= self.engine.max_pages {
            info!(pages = page, "Target not found, giving up");
            return State::Exhausted;
        }

        let delay = rng.gen_range(self.engine.next_delay_range());
        tokio::time::sleep(Duration::from_secs(delay)).await;

        let next = surface
            .evaluate_script(&script::click_next(&self.engine.next_selector))
            .await;
        match next {
            Ok(result) if script::script_value(&result) == NEXT_CLICKED => {
                State::Scanning { page: page + 1 }
            }
            Ok(result) => {
                info!(result = %script::script_value(&result), "No next results page");
                State::NoNextPage
            }
            Err(e) => {
                warn!(error = %e, "Next-page script failed");
                State::NoNextPage
            }
        }
    }
}

#[async_trait]
impl Flow for SearchFlow {
    fn name(&self) -> &'static str {
        "search-and-scroll"
    }

    async fn run(
        self,
        surface: &mut dyn AutomationSurface,
        stall: Option<Duration>,
    ) -> FlowOutcome {
        if let Err(e) = surface.load(&self.engine.homepage).await {
            warn!(error = %e, "Failed to load search homepage");
            return FlowOutcome::SurfaceGone {
                state: State::HomepageLoading.name(),
            };
        }

        let mut rng = StdRng::from_entropy();
        let mut state = State::HomepageLoading;
        loop {
            let url = match next_page_event(surface, stall).await {
                PageEvent::Loaded(url) => url,
                PageEvent::Stalled => return FlowOutcome::Stalled { state: state.name() },
                PageEvent::Gone => return FlowOutcome::SurfaceGone { state: state.name() },
            };
            debug!(url = %url, state = state.name(), "Page loaded");

            if state == State::TargetClicked {
                scroll_for(surface, self.params.stay).await;
                return FlowOutcome::Completed;
            }
            if !url.contains(&self.engine.domain_marker) {
                continue;
            }

            state = match state {
                State::HomepageLoading => {
                    let submit =
                        script::submit_query(&self.engine.query_selector, &self.params.keyword);
                    match surface.evaluate_script(&submit).await {
                        Ok(result) if script::script_value(&result) == SUBMITTED => {
                            info!("Search query submitted");
                            State::Scanning { page: 1 }
                        }
                        Ok(result) => {
                            info!(result = %script::script_value(&result), "Search not submitted");
                            State::HomepageLoading
                        }
                        Err(e) => {
                            warn!(error = %e, "Submit script failed");
                            State::HomepageLoading
                        }
                    }
                }
                State::Scanning { page } => self.scan(surface, page, &mut rng).await,
                // Terminal until the stall timeout closes the surface.
                other => other,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::testing::MockProvider;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    const TARGET: &str = "target.example";

    fn flow(stay: Duration) -> SearchFlow {
        SearchFlow {
            params: SearchParams {
                keyword: "rust \"async\" book".into(),
                target: TARGET.into(),
                stay,
            },
            engine: SearchEngineConfig::default(),
        }
    }

    /// Search engine whose target link appears on `found_on` (1-based), or
    /// never.
    fn engine(found_on: Option<u32>) -> MockProvider {
        let mut page = 0;
        MockProvider::new(Box::new(move |script: &str| {
            if script.contains("input.value") {
                page = 1;
                ("\"submitted\"".into(), Some("https://www.google.com/search?q=rust".into()))
            } else if script.contains("querySelectorAll('a')") {
                if Some(page) == found_on {
                    ("\"found\"".into(), Some(format!("https://{TARGET}/")))
                } else {
                    ("\"not\"".into(), None)
                }
            } else if script.contains("#pnnext") {
                page += 1;
                (
                    "\"nextclicked\"".into(),
                    Some(format!("https://www.google.com/search?q=rust&start={page}")),
                )
            } else {
                ("null".into(), None)
            }
        }))
    }

    fn scans(scripts: &[String]) -> usize {
        scripts
            .iter()
            .filter(|s| s.contains("querySelectorAll('a')"))
            .count()
    }

    #[test]
    fn stay_time_defaults_to_five_seconds() {
        let base = [("keywoard", "rust"), ("targetWebsite", TARGET)];
        let envelope: Envelope = base.into_iter().collect();
        assert_eq!(resolve(&envelope).unwrap().stay, Duration::from_secs(5));

        let envelope: Envelope = base
            .into_iter()
            .chain([("stayTime", "soon")])
            .collect();
        assert_eq!(resolve(&envelope).unwrap().stay, Duration::from_secs(5));

        let envelope: Envelope = base.into_iter().chain([("stayTime", "9")]).collect();
        assert_eq!(resolve(&envelope).unwrap().stay, Duration::from_secs(9));
    }

    #[test]
    fn negative_stay_time_means_no_stay() {
        let envelope: Envelope = [
            ("keywoard", "rust"),
            ("targetWebsite", TARGET),
            ("stayTime", "-3"),
        ]
        .into_iter()
        .collect();
        assert_eq!(resolve(&envelope).unwrap().stay, Duration::ZERO);
    }

    #[test]
    fn keyword_and_target_required() {
        let envelope: Envelope = [("keywoard", "rust"), ("targetWebsite", "  ")]
            .into_iter()
            .collect();
        assert!(resolve(&envelope).is_err());
        let envelope: Envelope = [("targetWebsite", TARGET)].into_iter().collect();
        assert!(resolve(&envelope).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn finds_target_on_third_page_and_scrolls() {
        let provider = engine(Some(3));
        let started = Instant::now();
        drive(
            &provider,
            flow(Duration::from_secs(5)),
            FlowLimits::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let log = provider.log.lock().unwrap();
        assert_eq!(log.loads, vec!["https://www.google.com"]);
        assert!(log.scripts[0].contains(r#"input.value = "rust \"async\" book";"#));
        assert_eq!(scans(&log.scripts), 3);

        // Two paging pauses of 3-5 s each precede the scroll.
        let (first_scroll, _) = log.scrolls[0];
        let paging = first_scroll - started;
        assert!(paging >= Duration::from_secs(6) && paging <= Duration::from_secs(11));

        let (last_scroll, _) = *log.scrolls.last().unwrap();
        assert!(last_scroll - first_scroll < Duration::from_secs(5));
        assert!(log.destroyed_at.unwrap() - first_scroll >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_pages_leaves_surface_open_without_stall_timeout() {
        let provider = std::sync::Arc::new(engine(None));
        let mut task = {
            let provider = std::sync::Arc::clone(&provider);
            tokio::spawn(async move {
                drive(
                    provider.as_ref(),
                    flow(Duration::from_secs(5)),
                    FlowLimits::default(),
                    CancellationToken::new(),
                )
                .await
            })
        };

        let still_running = tokio::time::timeout(Duration::from_secs(120), &mut task).await;
        assert!(still_running.is_err(), "flow should still be waiting");

        {
            let log = provider.log.lock().unwrap();
            assert_eq!(scans(&log.scripts), 10);
            assert!(log.scrolls.is_empty());
            assert!(log.destroyed_at.is_none());
        }
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_flow_closes_on_stall_timeout() {
        let provider = engine(None);
        let err = drive(
            &provider,
            flow(Duration::from_secs(5)),
            FlowLimits {
                stall: Some(Duration::from_secs(60)),
                deadline: None,
            },
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CommandError::AutomationStall { ref state } if state == "exhausted"));
        let log = provider.log.lock().unwrap();
        assert_eq!(scans(&log.scripts), 10);
        assert!(log.destroyed_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn off_engine_pages_are_ignored_before_submission() {
        let mut loads = vec!["https://consent.example/".to_string()];
        let provider = MockProvider::new(Box::new(move |script: &str| {
            if script.contains("input.value") {
                ("\"noinput\"".into(), loads.pop())
            } else {
                ("null".into(), None)
            }
        }));
        let err = drive(
            &provider,
            flow(Duration::from_secs(5)),
            FlowLimits {
                stall: Some(Duration::from_secs(30)),
                deadline: None,
            },
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            CommandError::AutomationStall { ref state } if state == "homepage_loading"
        ));
        let log = provider.log.lock().unwrap();
        assert_eq!(log.scripts.len(), 1);
    }
}

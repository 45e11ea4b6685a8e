//! Command handlers, one module per command kind.
//!
//! Each handler has two halves: a synchronous `resolve` that turns an
//! envelope into typed parameters (or rejects it), and an async `run` that
//! the dispatcher submits to the execution pool.

pub mod http;
pub mod page_click;
pub mod search;
pub mod shell;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::automation::SurfaceProvider;
use crate::config::Config;
use crate::envelope::Envelope;
use crate::error::CommandError;
use crate::sink::CallbackPoster;

/// Shared services handed to every background task.
#[derive(Clone)]
pub struct HandlerContext {
    pub config: Arc<Config>,
    pub poster: CallbackPoster,
    pub surfaces: Option<Arc<dyn SurfaceProvider>>,
    pub cancel: CancellationToken,
}

/// Read a required, non-blank field.
fn required<'a>(envelope: &'a Envelope, field: &'static str) -> Result<&'a str, CommandError> {
    envelope
        .get_non_blank(field)
        .ok_or_else(|| CommandError::missing(field))
}

/// Parse a whole-second duration field.
///
/// Any integer is accepted; negative values clamp to zero. `Ok(None)` when
/// the field is absent or blank.
fn seconds_field(envelope: &Envelope, field: &'static str) -> Result<Option<u64>, CommandError> {
    envelope
        .get_non_blank(field)
        .map(|raw| {
            raw.trim()
                .parse::<i64>()
                .map(|secs| u64::try_from(secs).unwrap_or(0))
                .map_err(|e| CommandError::Validation {
                    field,
                    reason: format!("{raw:?} is not a whole number of seconds ({e})"),
                })
        })
        .transpose()
}

/// Parse an optional duration field, falling back to `default` (logged)
/// when the value is present but malformed.
fn seconds_or(envelope: &Envelope, field: &'static str, default: u64) -> u64 {
    seconds_field(envelope, field).map_or_else(
        |e| {
            warn!(error = %e, default, "Using default");
            default
        },
        |secs| secs.unwrap_or(default),
    )
}

const fn non_zero(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

//! Error taxonomy for command handling.
//!
//! None of these cross a command boundary: each one is either folded into
//! an [`ExecutionResult`](crate::sink::ExecutionResult) or logged and dropped.

use thiserror::Error;

/// Failures that can occur while resolving, executing, or delivering a command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// A required field is missing or could not be parsed.
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// An encoded field (base64, JSON, UTF-8) could not be decoded.
    #[error("could not decode {field}: {reason}")]
    Decode { field: &'static str, reason: String },

    /// The subprocess or outbound HTTP call failed.
    #[error("{0}")]
    Execution(String),

    /// The result could not be posted to the callback endpoint.
    #[error("callback delivery to {url} failed: {reason}")]
    Delivery { url: String, reason: String },

    /// An automation flow waited too long for a page event.
    #[error("automation stalled in state {state}")]
    AutomationStall { state: String },

    /// The execution pool refused the task.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl CommandError {
    pub(crate) fn missing(field: &'static str) -> Self {
        Self::Validation {
            field,
            reason: "missing or blank".into(),
        }
    }
}

/// Backpressure and lifecycle errors from the execution pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("execution pool is saturated ({capacity} tasks in flight)")]
    Saturated { capacity: usize },

    #[error("execution pool is shut down")]
    ShutDown,
}

//! Automation helper protocol message types.
//!
//! Length-prefixed JSON protocol for daemon ↔ helper communication.
//! Messages are framed as: [4-byte BE length][JSON payload]

use serde::{Deserialize, Serialize};

/// Request sent from daemon to helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HelperRequest {
    /// Navigate the surface to `url`.
    Load { url: String },
    /// Evaluate a script; answered by a `script_result` with the same id.
    Evaluate { id: u64, script: String },
    ScrollBy { delta_y: i32 },
    /// Release the surface. The helper may exit afterwards.
    Destroy,
}

/// Message sent from helper to daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HelperMessage {
    /// Helper is ready to accept requests (sent on startup).
    Ready,
    /// A page finished loading.
    PageFinished { url: String },
    ScriptResult { id: u64, result: String },
    Error { message: String },
}

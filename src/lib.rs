//! push-relay daemon library
//!
//! This crate provides the core of the push-relay daemon:
//! - Typed interpretation of pushed command envelopes
//! - Shell, HTTP relay, and browser automation handlers
//! - A bounded execution pool and result delivery to listeners or callbacks

pub mod automation;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod pool;
pub mod relay;
pub mod sink;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use dispatcher::{DispatchOutcome, Dispatcher, IgnoreReason};
pub use envelope::{CommandKind, Envelope};
pub use sink::TestListener;

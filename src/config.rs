//! Daemon configuration.
//!
//! Configuration is JSON, passed either through the `PUSH_RELAY_CONFIG`
//! environment variable or a file given on the command line. Every field
//! has a default, so an absent variable yields a usable configuration.

use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

/// Environment variable holding the JSON configuration.
pub const CONFIG_ENV: &str = "PUSH_RELAY_CONFIG";

/// Top-level configuration for the daemon.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Execution pool sizing.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Shell command execution (`x1`).
    #[serde(default)]
    pub shell: ShellConfig,

    /// Outbound HTTP (`x3` and callback posts).
    #[serde(default)]
    pub http: HttpConfig,

    /// Browser automation (`x2`, `x4`).
    #[serde(default)]
    pub automation: AutomationConfig,
}

/// Bounds for the shared execution pool.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Tasks allowed to run at the same time.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Tasks allowed to wait for a worker. Submissions beyond
    /// `max_workers + max_queued` are rejected.
    #[serde(default = "default_max_queued")]
    pub max_queued: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            max_queued: default_max_queued(),
        }
    }
}

/// How shell commands are run.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
    /// Shell binary; commands run as `<program> -c <command>`.
    #[serde(default = "default_shell_program")]
    pub program: String,

    /// Per-command deadline in seconds. `0` waits indefinitely.
    #[serde(default = "default_shell_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: default_shell_program(),
            timeout_seconds: default_shell_timeout(),
        }
    }
}

impl ShellConfig {
    pub fn timeout(&self) -> Option<Duration> {
        non_zero_secs(self.timeout_seconds)
    }
}

/// Outbound HTTP defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Timeout applied to relayed requests when `timeout` is not given.
    #[serde(default = "default_http_timeout")]
    pub default_timeout_seconds: u64,

    /// Timeout for posting shell output to `endpointURL`.
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: default_http_timeout(),
            callback_timeout_seconds: default_callback_timeout(),
        }
    }
}

/// Browser automation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AutomationConfig {
    /// Helper executable that hosts automation surfaces. Automation
    /// commands are dropped when this is unset.
    #[serde(default)]
    pub helper_exec: Option<String>,

    /// Arguments passed to `helper_exec`.
    #[serde(default)]
    pub helper_args: Vec<String>,

    /// How long to wait for the helper's `ready` message.
    #[serde(default = "default_helper_ready_timeout")]
    pub helper_ready_timeout_seconds: u64,

    /// Close the surface when no page-load event arrives for this long.
    /// `0` waits forever.
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout_seconds: u64,

    /// Upper bound for a whole automation flow. `0` disables it.
    #[serde(default = "default_flow_deadline")]
    pub deadline_seconds: u64,

    /// Search engine driven by `x4`.
    #[serde(default)]
    pub search_engine: SearchEngineConfig,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            helper_exec: None,
            helper_args: Vec::new(),
            helper_ready_timeout_seconds: default_helper_ready_timeout(),
            stall_timeout_seconds: default_stall_timeout(),
            deadline_seconds: default_flow_deadline(),
            search_engine: SearchEngineConfig::default(),
        }
    }
}

impl AutomationConfig {
    pub fn stall_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.stall_timeout_seconds)
    }

    pub fn deadline(&self) -> Option<Duration> {
        non_zero_secs(self.deadline_seconds)
    }

    pub const fn helper_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.helper_ready_timeout_seconds)
    }
}

/// Search engine page structure used by the search-and-scroll flow.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchEngineConfig {
    /// Page loaded first.
    #[serde(default = "default_homepage")]
    pub homepage: String,

    /// Substring identifying the engine's own pages.
    #[serde(default = "default_domain_marker")]
    pub domain_marker: String,

    /// CSS selector of the query input.
    #[serde(default = "default_query_selector")]
    pub query_selector: String,

    /// CSS selector of the "next results page" control.
    #[serde(default = "default_next_selector")]
    pub next_selector: String,

    /// Result pages scanned before giving up.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Lower bound of the pause before paging, in seconds.
    #[serde(default = "default_next_delay_min")]
    pub next_delay_min_seconds: u64,

    /// Upper bound (inclusive) of the pause before paging, in seconds.
    #[serde(default = "default_next_delay_max")]
    pub next_delay_max_seconds: u64,
}

impl Default for SearchEngineConfig {
    fn default() -> Self {
        Self {
            homepage: default_homepage(),
            domain_marker: default_domain_marker(),
            query_selector: default_query_selector(),
            next_selector: default_next_selector(),
            max_pages: default_max_pages(),
            next_delay_min_seconds: default_next_delay_min(),
            next_delay_max_seconds: default_next_delay_max(),
        }
    }
}

impl SearchEngineConfig {
    /// Paging delay range in whole seconds; a reversed range collapses to
    /// its lower bound.
    pub fn next_delay_range(&self) -> RangeInclusive<u64> {
        let min = self.next_delay_min_seconds;
        min..=self.next_delay_max_seconds.max(min)
    }
}

impl Config {
    /// Load configuration from `PUSH_RELAY_CONFIG`, or defaults when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(json) => {
                Self::from_json(&json).with_context(|| format!("Failed to parse {CONFIG_ENV}"))
            }
            Err(_) => {
                debug!("{CONFIG_ENV} not set, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Invalid configuration JSON")?;
        Ok(config)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

const fn default_max_workers() -> usize {
    16
}

const fn default_max_queued() -> usize {
    256
}

fn default_shell_program() -> String {
    "/bin/sh".into()
}

const fn default_shell_timeout() -> u64 {
    300
}

const fn default_http_timeout() -> u64 {
    30
}

const fn default_callback_timeout() -> u64 {
    10
}

const fn default_helper_ready_timeout() -> u64 {
    30
}

const fn default_stall_timeout() -> u64 {
    60
}

const fn default_flow_deadline() -> u64 {
    600
}

fn default_homepage() -> String {
    "https://www.google.com".into()
}

fn default_domain_marker() -> String {
    "google".into()
}

fn default_query_selector() -> String {
    r#"input[name="q"]"#.into()
}

fn default_next_selector() -> String {
    "#pnnext".into()
}

const fn default_max_pages() -> u32 {
    10
}

const fn default_next_delay_min() -> u64 {
    3
}

const fn default_next_delay_max() -> u64 {
    5
}

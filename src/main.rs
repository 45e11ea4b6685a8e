//! push-relay daemon
//!
//! Local trigger for the command dispatcher. Envelopes come either from
//! `--set key=value` pairs or as newline-delimited JSON objects on stdin.
//! Configuration is read from `PUSH_RELAY_CONFIG` or `--config`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use push_relay_daemon::{config::Config, Dispatcher, Envelope};

#[derive(Parser, Debug)]
#[command(name = "push-relay-daemon")]
#[command(about = "Interprets pushed command envelopes and relays their results")]
struct Args {
    /// Read newline-delimited JSON envelopes from stdin
    #[arg(long)]
    stdio: bool,

    /// Dispatch one envelope built from these fields (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_field)]
    fields: Vec<(String, String)>,

    /// JSON configuration file (overrides PUSH_RELAY_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging (stderr so stdout is free for piped output)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => Config::from_file(path),
        None => Config::from_env(),
    }
    .context("Failed to load configuration")?;

    info!(
        max_workers = config.pool.max_workers,
        automation = config.automation.helper_exec.is_some(),
        "Loaded configuration"
    );

    if args.fields.is_empty() && !args.stdio {
        anyhow::bail!("Nothing to dispatch: pass --set KEY=VALUE or --stdio");
    }

    let dispatcher = Dispatcher::new(config)?;

    if !args.fields.is_empty() {
        let envelope: Envelope = args.fields.iter().cloned().collect();
        let outcome = dispatcher.dispatch(envelope);
        info!(?outcome, "Dispatched envelope from --set");
    }

    if args.stdio {
        tokio::select! {
            read = read_envelopes(&dispatcher) => read?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                dispatcher.shutdown();
            }
        }
    }

    dispatcher.wait_idle().await;
    dispatcher.shutdown();
    Ok(())
}

/// Dispatch each JSON object read from stdin until EOF.
async fn read_envelopes(dispatcher: &Dispatcher) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let envelope = serde_json::from_str::<Value>(line)
            .context("Invalid JSON")
            .and_then(|value| Envelope::from_json(&value));
        match envelope {
            Ok(envelope) => {
                let outcome = dispatcher.dispatch(envelope);
                info!(?outcome, "Dispatched envelope");
            }
            Err(e) => warn!(error = %e, "Skipping malformed envelope line"),
        }
    }
    Ok(())
}

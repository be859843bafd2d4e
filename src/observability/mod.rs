use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;
use crate::stream::{AbortReason, StreamOutcome};

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
///
/// [`LogFormat::Json`] writes one JSON object per event for log shippers.
pub fn init_tracing(log_level: &str, log_format: LogFormat) {
    let level = log_level.to_uppercase();

    if level == "DISABLED" {
        return;
    }

    let filter = EnvFilter::try_new(tracing_directive(&level))
        .unwrap_or_else(|_| EnvFilter::new("INFO"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);
    match log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn tracing_directive(level: &str) -> &str {
    match level {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    }
}

/// Log how a proxied stream ended.
///
/// The downstream body looks identical for a clean end and a truncated one;
/// this log line is the only place the difference is recorded.
pub fn log_stream_outcome(
    request_id: &str,
    caller: Option<&str>,
    outcome: &StreamOutcome,
    elapsed: Duration,
) {
    let stats = outcome.stats();
    let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    let caller = caller.unwrap_or("-");
    match outcome {
        StreamOutcome::Completed(_) => tracing::info!(
            request_id,
            caller,
            fragments = stats.fragments,
            downstream_bytes = stats.downstream_bytes,
            upstream_bytes = stats.upstream_bytes,
            malformed_records = stats.malformed_records,
            saw_done_sentinel = stats.saw_done_sentinel,
            elapsed_ms,
            "coach stream completed"
        ),
        StreamOutcome::Aborted {
            reason: AbortReason::UpstreamRead(error),
            ..
        } => tracing::warn!(
            request_id,
            caller,
            error = %error,
            fragments = stats.fragments,
            downstream_bytes = stats.downstream_bytes,
            discarded_tail_bytes = stats.discarded_tail_bytes,
            elapsed_ms,
            "coach stream truncated by upstream read error"
        ),
        StreamOutcome::Aborted {
            reason: AbortReason::DownstreamCancelled,
            ..
        } => tracing::warn!(
            request_id,
            caller,
            fragments = stats.fragments,
            downstream_bytes = stats.downstream_bytes,
            elapsed_ms,
            "coach stream cancelled by client, upstream connection closed"
        ),
    }
}

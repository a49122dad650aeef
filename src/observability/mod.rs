pub mod token_counter;

use std::time::Instant;

use tracing_subscriber::EnvFilter;

use crate::protocol::Provider;
use crate::stream::{FinishReason, Usage};

use self::token_counter::StreamTally;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
///
/// Logs go to stderr so stdout stays a clean data stream.
pub fn init_tracing(log_level: &str) {
    let Some(directive) = tracing_directive(log_level) else {
        return;
    };

    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("INFO"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn tracing_directive(log_level: &str) -> Option<String> {
    let level = log_level.to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

/// Log usage for a completed stream, computing duration from start time.
pub fn log_stream_complete(
    provider: Provider,
    finish_reason: FinishReason,
    usage: Usage,
    tally: &StreamTally,
    start_time: Instant,
) {
    token_counter::log_stream_usage(provider, finish_reason, usage, tally, start_time.elapsed());
}

use std::time::Duration;

use tracing::info;

use crate::protocol::Provider;
use crate::stream::{DataStreamPart, FinishReason, Usage};

/// Rough token estimate for `text` (`bytes / 4`, rounded up).
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Running totals over the parts of one data stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamTally {
    pub steps: u32,
    pub tool_calls: u32,
    pub errors: u32,
    pub text_bytes: u64,
    estimated_output: u64,
}

impl StreamTally {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, part: &DataStreamPart) {
        match part {
            DataStreamPart::Text(text) | DataStreamPart::Reasoning(text) => {
                self.text_bytes += text.len() as u64;
                self.estimated_output += estimate_tokens(text);
            }
            DataStreamPart::ToolCallDelta(delta) => {
                self.estimated_output += estimate_tokens(&delta.args_text_delta);
            }
            DataStreamPart::ToolCallStart(_) => self.tool_calls += 1,
            DataStreamPart::StartStep(_) => self.steps += 1,
            DataStreamPart::Error(_) => self.errors += 1,
            _ => {}
        }
    }

    /// Usage with unknown completion tokens filled from the local estimate.
    #[must_use]
    pub fn merged_usage(&self, reported: Usage) -> Usage {
        let completion_tokens = match reported.completion_tokens {
            Some(v) if v > 0 => Some(v),
            _ => i64::try_from(self.estimated_output).ok(),
        };
        Usage::new(reported.prompt_tokens, completion_tokens)
    }
}

/// Log usage for a completed stream at INFO level.
pub fn log_stream_usage(
    provider: Provider,
    finish_reason: FinishReason,
    usage: Usage,
    tally: &StreamTally,
    duration: Duration,
) {
    let usage = tally.merged_usage(usage);
    info!(
        provider = provider.as_str(),
        finish_reason = finish_reason.as_str(),
        prompt_tokens = usage.prompt_tokens.unwrap_or(0),
        completion_tokens = usage.completion_tokens.unwrap_or(0),
        steps = tally.steps,
        tool_calls = tally.tool_calls,
        errors = tally.errors,
        duration_seconds = duration.as_secs_f64(),
        "stream completed"
    );
}

use futures_util::Stream;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::StreamError;
use crate::protocol::mapping::{openai_finish_to_canonical, usage_from_counts};
use crate::stream::adapter::{AdapterStream, StreamDecoder};
use crate::stream::part::{DataStreamPart, FinishReason, Usage};
use crate::stream::sse::SseEvent;
use crate::util::new_message_id;

use super::{OpenAiStreamChunk, OpenAiStreamToolCall};

/// Parse one SSE event into an `OpenAI` stream chunk.
///
/// Returns `None` for the `[DONE]` sentinel and empty payloads.
#[must_use]
pub fn parse_openai_sse(event: &SseEvent) -> Option<Result<OpenAiStreamChunk, StreamError>> {
    let data = event.data.trim();
    if data.is_empty() || event.is_done() {
        return None;
    }
    Some(serde_json::from_str(data).map_err(|err| {
        StreamError::MalformedEvent(format!("invalid OpenAI stream chunk: {err}"))
    }))
}

/// Translates `OpenAI` chat completion chunks into data stream parts.
#[derive(Debug, Default)]
pub struct OpenAiStreamDecoder {
    started: bool,
    // Tool call index -> call id.
    tool_calls: FxHashMap<u32, String>,
    finish_reason: FinishReason,
    usage: Usage,
}

impl OpenAiStreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_tool_call(
        &mut self,
        tool_call: OpenAiStreamToolCall,
        out: &mut Vec<DataStreamPart>,
    ) -> Result<(), StreamError> {
        let function = tool_call.function.unwrap_or_default();
        if let Some(id) = tool_call.id.filter(|id| !id.is_empty()) {
            out.push(DataStreamPart::tool_call_start(
                id.clone(),
                function.name.unwrap_or_default(),
            ));
            self.tool_calls.insert(tool_call.index, id);
        }
        let Some(arguments) = function.arguments.filter(|args| !args.is_empty()) else {
            return Ok(());
        };
        let Some(id) = self.tool_calls.get(&tool_call.index) else {
            return Err(StreamError::MalformedEvent(format!(
                "tool call arguments for index {} before its id",
                tool_call.index
            )));
        };
        out.push(DataStreamPart::tool_call_delta(id.clone(), arguments));
        Ok(())
    }
}

impl StreamDecoder for OpenAiStreamDecoder {
    type Event = OpenAiStreamChunk;

    fn decode(
        &mut self,
        chunk: OpenAiStreamChunk,
        out: &mut Vec<DataStreamPart>,
    ) -> Result<(), StreamError> {
        if let Some(usage) = &chunk.usage {
            self.usage = usage_from_counts(Some(usage.prompt_tokens), Some(usage.completion_tokens));
        }
        if !self.started {
            self.started = true;
            let message_id = if chunk.id.is_empty() {
                new_message_id()
            } else {
                chunk.id
            };
            debug!(message_id = %message_id, "openai stream started");
            out.push(DataStreamPart::start_step(message_id));
        }

        for choice in chunk.choices {
            let delta = choice.delta;
            if let Some(content) = delta.content.filter(|text| !text.is_empty()) {
                out.push(DataStreamPart::text(content));
            }
            if let Some(refusal) = delta.refusal.filter(|text| !text.is_empty()) {
                out.push(DataStreamPart::text(refusal));
            }
            for tool_call in delta.tool_calls.into_iter().flatten() {
                self.decode_tool_call(tool_call, out)?;
            }
            if let Some(reason) = choice.finish_reason.filter(|reason| !reason.is_empty()) {
                self.finish_reason = openai_finish_to_canonical(&reason);
                out.push(DataStreamPart::finish_step(self.finish_reason, self.usage, false));
            }
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<DataStreamPart>) {
        out.push(DataStreamPart::finish_message(self.finish_reason, self.usage));
    }

    fn finish_reason(&self) -> FinishReason {
        self.finish_reason
    }

    fn usage(&self) -> Usage {
        self.usage
    }
}

/// Adapt a stream of `OpenAI` chunks into a data stream.
pub fn openai_data_stream<S, E>(chunks: S) -> AdapterStream<S, OpenAiStreamDecoder>
where
    S: Stream<Item = Result<OpenAiStreamChunk, E>>,
    E: Into<StreamError>,
{
    AdapterStream::new(chunks, OpenAiStreamDecoder::new())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

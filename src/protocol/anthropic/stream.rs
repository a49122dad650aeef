use futures_util::Stream;
use tracing::{debug, warn};

use crate::error::StreamError;
use crate::protocol::mapping::anthropic_stop_to_canonical;
use crate::stream::adapter::{AdapterStream, StreamDecoder};
use crate::stream::part::{
    DataStreamPart, FinishReason, ReasoningSignature, RedactedReasoning, Usage,
};
use crate::stream::sse::SseEvent;

use super::{AnthropicContentBlock, AnthropicDelta, AnthropicStreamEvent};

const KNOWN_EVENTS: &[&str] = &[
    "message_start",
    "content_block_start",
    "content_block_delta",
    "content_block_stop",
    "message_delta",
    "message_stop",
    "ping",
    "error",
];

/// Parse one SSE event into an Anthropic stream event.
///
/// Returns `None` for event names this decoder does not know.
#[must_use]
pub fn parse_anthropic_sse(event: &SseEvent) -> Option<Result<AnthropicStreamEvent, StreamError>> {
    if let Some(name) = event.event.as_deref() {
        if !KNOWN_EVENTS.contains(&name) {
            warn!(event = name, "ignoring unknown Anthropic stream event");
            return None;
        }
    }
    let data = event.data.trim();
    if data.is_empty() {
        return None;
    }
    Some(serde_json::from_str(data).map_err(|err| {
        StreamError::MalformedEvent(format!("invalid Anthropic stream event: {err}"))
    }))
}

/// Translates Anthropic message stream events into data stream parts.
#[derive(Debug, Default)]
pub struct AnthropicStreamDecoder {
    current_tool_call: Option<String>,
    finish_reason: FinishReason,
    usage: Usage,
}

impl AnthropicStreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn block_start(&mut self, block: AnthropicContentBlock, out: &mut Vec<DataStreamPart>) {
        match block {
            AnthropicContentBlock::ToolUse { id, name, .. } => {
                out.push(DataStreamPart::tool_call_start(id.clone(), name));
                self.current_tool_call = Some(id);
            }
            AnthropicContentBlock::RedactedThinking { data } => {
                out.push(DataStreamPart::RedactedReasoning(RedactedReasoning { data }));
            }
            AnthropicContentBlock::Text { text } if !text.is_empty() => {
                out.push(DataStreamPart::text(text));
            }
            AnthropicContentBlock::Thinking { thinking, .. } if !thinking.is_empty() => {
                out.push(DataStreamPart::reasoning(thinking));
            }
            _ => {}
        }
    }

    fn block_delta(
        &mut self,
        delta: AnthropicDelta,
        out: &mut Vec<DataStreamPart>,
    ) -> Result<(), StreamError> {
        match delta {
            AnthropicDelta::TextDelta { text } => {
                if !text.is_empty() {
                    out.push(DataStreamPart::text(text));
                }
            }
            AnthropicDelta::ThinkingDelta { thinking } => {
                if !thinking.is_empty() {
                    out.push(DataStreamPart::reasoning(thinking));
                }
            }
            AnthropicDelta::SignatureDelta { signature } => {
                out.push(DataStreamPart::ReasoningSignature(ReasoningSignature {
                    signature,
                }));
            }
            AnthropicDelta::InputJsonDelta { partial_json } => {
                if partial_json.is_empty() {
                    return Ok(());
                }
                let Some(id) = &self.current_tool_call else {
                    return Err(StreamError::MalformedEvent(
                        "input_json_delta outside a tool_use block".to_string(),
                    ));
                };
                out.push(DataStreamPart::tool_call_delta(id.clone(), partial_json));
            }
        }
        Ok(())
    }
}

impl StreamDecoder for AnthropicStreamDecoder {
    type Event = AnthropicStreamEvent;

    fn decode(
        &mut self,
        event: AnthropicStreamEvent,
        out: &mut Vec<DataStreamPart>,
    ) -> Result<(), StreamError> {
        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                if let Some(input_tokens) = message.usage.input_tokens {
                    self.usage.prompt_tokens = i64::try_from(input_tokens).ok();
                }
                debug!(message_id = %message.id, model = %message.model, "anthropic message started");
                out.push(DataStreamPart::start_step(message.id));
            }
            AnthropicStreamEvent::ContentBlockStart { content_block, .. } => {
                self.block_start(content_block, out);
            }
            AnthropicStreamEvent::ContentBlockDelta { delta, .. } => {
                self.block_delta(delta, out)?;
            }
            AnthropicStreamEvent::ContentBlockStop { .. } => self.current_tool_call = None,
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if let Some(stop_reason) = delta.stop_reason {
                    self.finish_reason = anthropic_stop_to_canonical(&stop_reason);
                }
                if let Some(output_tokens) = usage.output_tokens {
                    self.usage.completion_tokens = i64::try_from(output_tokens).ok();
                }
            }
            AnthropicStreamEvent::MessageStop {} => {
                if self.finish_reason == FinishReason::Unknown {
                    self.finish_reason = FinishReason::Stop;
                }
                out.push(DataStreamPart::finish_step(self.finish_reason, self.usage, false));
                out.push(DataStreamPart::finish_message(self.finish_reason, self.usage));
            }
            AnthropicStreamEvent::Ping {} => {}
            AnthropicStreamEvent::Error { error } => {
                return Err(StreamError::Transport(format!(
                    "{}: {}",
                    error.type_, error.message
                )));
            }
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<DataStreamPart>) {
        if self.finish_reason == FinishReason::Unknown {
            self.finish_reason = FinishReason::Error;
        }
        out.push(DataStreamPart::finish_message(self.finish_reason, self.usage));
    }

    fn finish_reason(&self) -> FinishReason {
        self.finish_reason
    }

    fn usage(&self) -> Usage {
        self.usage
    }
}

/// Adapt a stream of Anthropic events into a data stream.
pub fn anthropic_data_stream<S, E>(events: S) -> AdapterStream<S, AnthropicStreamDecoder>
where
    S: Stream<Item = Result<AnthropicStreamEvent, E>>,
    E: Into<StreamError>,
{
    AdapterStream::new(events, AnthropicStreamDecoder::new())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::sse::parse_sse_text;

    fn decode_body(body: &str) -> Result<Vec<DataStreamPart>, StreamError> {
        let mut decoder = AnthropicStreamDecoder::new();
        let mut out = Vec::new();
        for event in parse_sse_text(body) {
            if let Some(event) = parse_anthropic_sse(&event) {
                decoder.decode(event?, &mut out)?;
            }
        }
        Ok(out)
    }

    #[test]
    fn test_parse_ignores_unknown_event_names() {
        let events = parse_sse_text("event: future_event\ndata: {\"type\":\"future_event\"}\n\n");
        assert!(parse_anthropic_sse(&events[0]).is_none());
    }

    #[test]
    fn test_decode_text_message() {
        let parts = decode_body(concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"type\":\"message\",\"role\":\"assistant\",\"model\":\"m\",\"content\":[],\"usage\":{\"input_tokens\":3,\"output_tokens\":1}}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"hi\"}}\n\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"max_tokens\"},\"usage\":{\"output_tokens\":9}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        ))
        .expect("decode");
        let usage = Usage::new(Some(3), Some(9));
        assert_eq!(
            parts,
            vec![
                DataStreamPart::start_step("msg_1"),
                DataStreamPart::text("hi"),
                DataStreamPart::finish_step(FinishReason::Length, usage, false),
                DataStreamPart::finish_message(FinishReason::Length, usage),
            ]
        );
    }

    #[test]
    fn test_decode_thinking_block() {
        let parts = decode_body(concat!(
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"thinking\",\"thinking\":\"\"}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"hmm\"}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"signature_delta\",\"signature\":\"sig\"}}\n\n",
            "data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"redacted_thinking\",\"data\":\"xyz\"}}\n\n",
        ))
        .expect("decode");
        assert_eq!(
            parts,
            vec![
                DataStreamPart::reasoning("hmm"),
                DataStreamPart::ReasoningSignature(ReasoningSignature {
                    signature: "sig".into()
                }),
                DataStreamPart::RedactedReasoning(RedactedReasoning { data: "xyz".into() }),
            ]
        );
    }

    #[test]
    fn test_json_delta_outside_tool_block_is_malformed() {
        let err = decode_body(
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\"}}\n\n",
        )
        .expect_err("must fail");
        assert!(matches!(err, StreamError::MalformedEvent(_)));
    }

    #[test]
    fn test_error_event_is_transport_failure() {
        let err = decode_body(
            "event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
        )
        .expect_err("must fail");
        assert!(matches!(err, StreamError::Transport(message) if message == "overloaded_error: Overloaded"));
    }

    #[test]
    fn test_missing_message_stop_finishes_with_error() {
        let mut decoder = AnthropicStreamDecoder::new();
        let mut out = Vec::new();
        decoder.finish(&mut out);
        assert_eq!(
            out,
            vec![DataStreamPart::finish_message(FinishReason::Error, Usage::default())]
        );
    }
}

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures_util::Stream;
use tracing::debug;

use crate::error::StreamError;
use crate::protocol::mapping::{gemini_finish_to_canonical, usage_from_counts};
use crate::stream::adapter::{AdapterStream, StreamDecoder};
use crate::stream::part::{DataStreamPart, FilePart, FinishReason, Usage};
use crate::stream::sse::SseEvent;
use crate::util::{new_id, new_message_id};

use super::{GeminiFunctionCall, GeminiPart, GeminiResponse};

/// Parse one SSE event into a Gemini response.
#[must_use]
pub fn parse_gemini_sse(event: &SseEvent) -> Option<Result<GeminiResponse, StreamError>> {
    let data = event.data.trim();
    if data.is_empty() {
        return None;
    }
    Some(serde_json::from_str(data).map_err(|err| {
        StreamError::MalformedEvent(format!("invalid Gemini stream response: {err}"))
    }))
}

/// Translates Gemini `GenerateContentResponse` values into data stream parts.
///
/// Gemini sends no message id and no per-step boundary, so the whole stream is
/// one step closed when the upstream ends.
#[derive(Debug, Default)]
pub struct GeminiStreamDecoder {
    started: bool,
    saw_candidate: bool,
    saw_tool_call: bool,
    candidate_reason: Option<FinishReason>,
    usage: Usage,
}

impl GeminiStreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_part(
        &mut self,
        part: GeminiPart,
        out: &mut Vec<DataStreamPart>,
    ) -> Result<(), StreamError> {
        if let Some(call) = part.function_call {
            return self.decode_function_call(call, out);
        }
        if let Some(blob) = part.inline_data {
            let data = STANDARD.decode(blob.data.as_bytes()).map_err(|err| {
                StreamError::MalformedEvent(format!("invalid inline data: {err}"))
            })?;
            out.push(DataStreamPart::File(FilePart {
                data,
                mime_type: blob.mime_type,
            }));
            return Ok(());
        }
        if let Some(text) = part.text.filter(|text| !text.is_empty()) {
            if part.thought == Some(true) {
                out.push(DataStreamPart::reasoning(text));
            } else {
                out.push(DataStreamPart::text(text));
            }
        }
        Ok(())
    }

    fn decode_function_call(
        &mut self,
        call: GeminiFunctionCall,
        out: &mut Vec<DataStreamPart>,
    ) -> Result<(), StreamError> {
        let tool_call_id = call
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(new_id);
        let args = match call.args {
            None | Some(serde_json::Value::Null) => "{}".to_string(),
            Some(args) => serde_json::to_string(&args)?,
        };
        debug!(tool_call_id = %tool_call_id, tool_name = %call.name, "gemini function call");
        out.push(DataStreamPart::tool_call_start(tool_call_id.clone(), call.name));
        out.push(DataStreamPart::tool_call_delta(tool_call_id, args));
        self.saw_tool_call = true;
        Ok(())
    }
}

impl StreamDecoder for GeminiStreamDecoder {
    type Event = GeminiResponse;

    fn decode(
        &mut self,
        response: GeminiResponse,
        out: &mut Vec<DataStreamPart>,
    ) -> Result<(), StreamError> {
        if let Some(usage) = &response.usage_metadata {
            self.usage = usage_from_counts(usage.prompt_token_count, usage.candidates_token_count);
        }
        let Some(candidate) = response.candidates.into_iter().next() else {
            return Ok(());
        };
        self.saw_candidate = true;
        if let Some(reason) = candidate.finish_reason.filter(|reason| !reason.is_empty()) {
            self.candidate_reason = Some(gemini_finish_to_canonical(&reason));
        }
        let Some(content) = candidate.content else {
            return Ok(());
        };
        if !self.started {
            self.started = true;
            out.push(DataStreamPart::start_step(new_message_id()));
        }
        for part in content.parts {
            self.decode_part(part, out)?;
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<DataStreamPart>) {
        let reason = match self.finish_reason() {
            FinishReason::Unknown if !self.saw_candidate => FinishReason::Stop,
            reason => reason,
        };
        out.push(DataStreamPart::finish_step(reason, self.usage, false));
        out.push(DataStreamPart::finish_message(reason, self.usage));
    }

    /// A function call wins over whatever the candidate reported.
    fn finish_reason(&self) -> FinishReason {
        if self.saw_tool_call {
            FinishReason::ToolCalls
        } else {
            self.candidate_reason.unwrap_or_default()
        }
    }

    fn usage(&self) -> Usage {
        self.usage
    }
}

/// Adapt a stream of Gemini responses into a data stream.
pub fn gemini_data_stream<S, E>(responses: S) -> AdapterStream<S, GeminiStreamDecoder>
where
    S: Stream<Item = Result<GeminiResponse, E>>,
    E: Into<StreamError>,
{
    AdapterStream::new(responses, GeminiStreamDecoder::new())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_all(responses: Vec<serde_json::Value>) -> Result<Vec<DataStreamPart>, StreamError> {
        let mut decoder = GeminiStreamDecoder::new();
        let mut out = Vec::new();
        for response in responses {
            let response: GeminiResponse = serde_json::from_value(response).expect("response");
            decoder.decode(response, &mut out)?;
        }
        decoder.finish(&mut out);
        Ok(out)
    }

    #[test]
    fn test_text_and_thought_parts() {
        let parts = decode_all(vec![json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {"text": "pondering", "thought": true},
                {"text": "answer"}
            ]}, "finishReason": "MAX_TOKENS"}],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2}
        })])
        .expect("decode");
        assert!(matches!(parts[0], DataStreamPart::StartStep(_)));
        assert_eq!(parts[1], DataStreamPart::reasoning("pondering"));
        assert_eq!(parts[2], DataStreamPart::text("answer"));
        let usage = Usage::new(Some(4), Some(2));
        assert_eq!(parts[3], DataStreamPart::finish_step(FinishReason::Length, usage, false));
        assert_eq!(parts[4], DataStreamPart::finish_message(FinishReason::Length, usage));
    }

    #[test]
    fn test_synthesized_message_id_is_prefixed() {
        let parts = decode_all(vec![json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "hi"}]}}]
        })])
        .expect("decode");
        let DataStreamPart::StartStep(step) = &parts[0] else {
            panic!("expected start step");
        };
        assert!(step.message_id.starts_with("msg-"));
    }

    #[test]
    fn test_function_call_wins_finish_reason() {
        let parts = decode_all(vec![json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {"functionCall": {"id": "fc_1", "name": "print", "args": {"message": "hi"}}}
            ]}, "finishReason": "STOP"}]
        })])
        .expect("decode");
        assert_eq!(parts[1], DataStreamPart::tool_call_start("fc_1", "print"));
        assert_eq!(
            parts[2],
            DataStreamPart::tool_call_delta("fc_1", "{\"message\":\"hi\"}")
        );
        assert_eq!(
            parts[4],
            DataStreamPart::finish_message(FinishReason::ToolCalls, Usage::default())
        );
    }

    #[test]
    fn test_function_call_without_id_gets_uuid() {
        let parts = decode_all(vec![json!({
            "candidates": [{"content": {"parts": [{"functionCall": {"name": "now"}}]}}]
        })])
        .expect("decode");
        let DataStreamPart::ToolCallStart(start) = &parts[1] else {
            panic!("expected tool call start");
        };
        assert_eq!(start.tool_call_id.len(), 36);
        assert_eq!(
            parts[2],
            DataStreamPart::tool_call_delta(start.tool_call_id.clone(), "{}")
        );
    }

    #[test]
    fn test_inline_data_becomes_file() {
        let parts = decode_all(vec![json!({
            "candidates": [{"content": {"parts": [
                {"inlineData": {"mimeType": "image/png", "data": "AQID"}}
            ]}, "finishReason": "STOP"}]
        })])
        .expect("decode");
        assert_eq!(
            parts[1],
            DataStreamPart::File(FilePart {
                data: vec![1, 2, 3],
                mime_type: "image/png".into(),
            })
        );
    }

    #[test]
    fn test_invalid_inline_data_is_malformed() {
        let err = decode_all(vec![json!({
            "candidates": [{"content": {"parts": [
                {"inlineData": {"mimeType": "image/png", "data": "%%%"}}
            ]}}]
        })])
        .expect_err("must fail");
        assert!(matches!(err, StreamError::MalformedEvent(_)));
    }

    #[test]
    fn test_empty_stream_still_terminates() {
        let parts = decode_all(Vec::new()).expect("decode");
        assert_eq!(
            parts,
            vec![
                DataStreamPart::finish_step(FinishReason::Stop, Usage::default(), false),
                DataStreamPart::finish_message(FinishReason::Stop, Usage::default()),
            ]
        );
    }

    #[test]
    fn test_candidate_without_reason_is_unknown() {
        let parts = decode_all(vec![json!({
            "candidates": [{"content": {"parts": [{"text": "partial"}]}}]
        })])
        .expect("decode");
        assert_eq!(
            parts.last(),
            Some(&DataStreamPart::finish_message(FinishReason::Unknown, Usage::default()))
        );
    }
}

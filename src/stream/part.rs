use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PartParseError;
use crate::protocol::canonical::ToolCallResult;
use crate::util::push_json_string_escaped;

/// Why a step or message stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
    Other,
    #[default]
    Unknown,
}

impl FinishReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content-filter",
            FinishReason::ToolCalls => "tool-calls",
            FinishReason::Error => "error",
            FinishReason::Other => "other",
            FinishReason::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage. Unknown counts serialize as `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: Option<i64>,
    #[serde(default)]
    pub completion_tokens: Option<i64>,
}

impl Usage {
    #[must_use]
    pub fn new(prompt_tokens: Option<i64>, completion_tokens: Option<i64>) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactedReasoning {
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningSignature {
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcePart {
    pub source_type: String,
    pub id: String,
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePart {
    #[serde(with = "crate::util::base64_bytes")]
    pub data: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallStart {
    pub tool_call_id: String,
    pub tool_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallDelta {
    pub tool_call_id: String,
    pub args_text_delta: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPart {
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultPart {
    pub tool_call_id: String,
    pub result: ToolCallResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStart {
    pub message_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishStep {
    pub finish_reason: FinishReason,
    pub usage: Usage,
    pub is_continued: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishMessage {
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

/// One line of the data stream protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum DataStreamPart {
    Text(String),
    Reasoning(String),
    RedactedReasoning(RedactedReasoning),
    ReasoningSignature(ReasoningSignature),
    Source(SourcePart),
    File(FilePart),
    Data(Vec<Value>),
    MessageAnnotations(Vec<Value>),
    Error(String),
    ToolCallStart(ToolCallStart),
    ToolCallDelta(ToolCallDelta),
    ToolCall(ToolCallPart),
    ToolResult(ToolResultPart),
    StartStep(StepStart),
    FinishStep(FinishStep),
    FinishMessage(FinishMessage),
}

// ---------------------------------------------------------------------------
// Constructors
// ---------------------------------------------------------------------------

impl DataStreamPart {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        DataStreamPart::Text(text.into())
    }

    #[must_use]
    pub fn reasoning(text: impl Into<String>) -> Self {
        DataStreamPart::Reasoning(text.into())
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        DataStreamPart::Error(message.into())
    }

    #[must_use]
    pub fn start_step(message_id: impl Into<String>) -> Self {
        DataStreamPart::StartStep(StepStart {
            message_id: message_id.into(),
        })
    }

    #[must_use]
    pub fn tool_call_start(tool_call_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        DataStreamPart::ToolCallStart(ToolCallStart {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
        })
    }

    #[must_use]
    pub fn tool_call_delta(tool_call_id: impl Into<String>, delta: impl Into<String>) -> Self {
        DataStreamPart::ToolCallDelta(ToolCallDelta {
            tool_call_id: tool_call_id.into(),
            args_text_delta: delta.into(),
        })
    }

    #[must_use]
    pub fn tool_call(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        args: Map<String, Value>,
    ) -> Self {
        DataStreamPart::ToolCall(ToolCallPart {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args,
        })
    }

    #[must_use]
    pub fn tool_result(tool_call_id: impl Into<String>, result: impl Into<ToolCallResult>) -> Self {
        DataStreamPart::ToolResult(ToolResultPart {
            tool_call_id: tool_call_id.into(),
            result: result.into(),
        })
    }

    #[must_use]
    pub fn finish_step(finish_reason: FinishReason, usage: Usage, is_continued: bool) -> Self {
        DataStreamPart::FinishStep(FinishStep {
            finish_reason,
            usage,
            is_continued,
        })
    }

    #[must_use]
    pub fn finish_message(finish_reason: FinishReason, usage: Usage) -> Self {
        DataStreamPart::FinishMessage(FinishMessage {
            finish_reason,
            usage,
        })
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

impl DataStreamPart {
    /// Single-byte wire tag.
    #[must_use]
    pub fn type_id(&self) -> u8 {
        match self {
            DataStreamPart::Text(_) => b'0',
            DataStreamPart::Reasoning(_) => b'g',
            DataStreamPart::RedactedReasoning(_) => b'i',
            DataStreamPart::ReasoningSignature(_) => b'j',
            DataStreamPart::Source(_) => b'h',
            DataStreamPart::File(_) => b'k',
            DataStreamPart::Data(_) => b'2',
            DataStreamPart::MessageAnnotations(_) => b'8',
            DataStreamPart::Error(_) => b'3',
            DataStreamPart::ToolCallStart(_) => b'b',
            DataStreamPart::ToolCallDelta(_) => b'c',
            DataStreamPart::ToolCall(_) => b'9',
            DataStreamPart::ToolResult(_) => b'a',
            DataStreamPart::StartStep(_) => b'f',
            DataStreamPart::FinishStep(_) => b'e',
            DataStreamPart::FinishMessage(_) => b'd',
        }
    }

    /// Encode as a `TAG:JSON\n` line.
    ///
    /// # Errors
    ///
    /// Fails only when a JSON payload cannot be serialized.
    pub fn format(&self) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        self.format_into(&mut out)?;
        Ok(out)
    }

    /// Append the encoded line to `out`, reusing its allocation.
    ///
    /// # Errors
    ///
    /// Fails only when a JSON payload cannot be serialized. `out` may then
    /// hold a partial line.
    pub fn format_into(&self, out: &mut String) -> Result<(), serde_json::Error> {
        out.push(char::from(self.type_id()));
        out.push(':');
        match self {
            DataStreamPart::Text(text)
            | DataStreamPart::Reasoning(text)
            | DataStreamPart::Error(text) => push_json_string_escaped(out, text),
            DataStreamPart::RedactedReasoning(p) => push_json(out, p)?,
            DataStreamPart::ReasoningSignature(p) => push_json(out, p)?,
            DataStreamPart::Source(p) => push_json(out, p)?,
            DataStreamPart::File(p) => push_json(out, p)?,
            DataStreamPart::Data(values) | DataStreamPart::MessageAnnotations(values) => {
                push_json(out, values)?;
            }
            DataStreamPart::ToolCallStart(p) => push_json(out, p)?,
            DataStreamPart::ToolCallDelta(p) => push_json(out, p)?,
            DataStreamPart::ToolCall(p) => push_json(out, p)?,
            DataStreamPart::ToolResult(p) => push_json(out, p)?,
            DataStreamPart::StartStep(p) => push_json(out, p)?,
            DataStreamPart::FinishStep(p) => push_json(out, p)?,
            DataStreamPart::FinishMessage(p) => push_json(out, p)?,
        }
        out.push('\n');
        Ok(())
    }
}

#[inline]
fn push_json<T: Serialize + ?Sized>(out: &mut String, value: &T) -> Result<(), serde_json::Error> {
    out.push_str(&serde_json::to_string(value)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

impl DataStreamPart {
    /// Parse one `TAG:JSON` line. A trailing `\n` or `\r\n` is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`PartParseError`] for a missing separator, an unknown tag or a
    /// payload that does not match the tag.
    pub fn parse_line(line: &str) -> Result<Self, PartParseError> {
        let line = line.trim_end_matches(['\n', '\r']);
        let (tag, payload) = line
            .split_once(':')
            .ok_or(PartParseError::MissingSeparator)?;
        let mut chars = tag.chars();
        let tag = match (chars.next(), chars.next()) {
            (Some(tag), None) => tag,
            _ => return Err(PartParseError::UnknownTag(tag.to_string())),
        };

        let part = match tag {
            '0' => DataStreamPart::Text(decode(tag, payload)?),
            'g' => DataStreamPart::Reasoning(decode(tag, payload)?),
            'i' => DataStreamPart::RedactedReasoning(decode(tag, payload)?),
            'j' => DataStreamPart::ReasoningSignature(decode(tag, payload)?),
            'h' => DataStreamPart::Source(decode(tag, payload)?),
            'k' => DataStreamPart::File(decode(tag, payload)?),
            '2' => DataStreamPart::Data(decode(tag, payload)?),
            '8' => DataStreamPart::MessageAnnotations(decode(tag, payload)?),
            '3' => DataStreamPart::Error(decode(tag, payload)?),
            'b' => DataStreamPart::ToolCallStart(decode(tag, payload)?),
            'c' => DataStreamPart::ToolCallDelta(decode(tag, payload)?),
            '9' => DataStreamPart::ToolCall(decode(tag, payload)?),
            'a' => DataStreamPart::ToolResult(decode(tag, payload)?),
            'f' => DataStreamPart::StartStep(decode(tag, payload)?),
            'e' => DataStreamPart::FinishStep(decode(tag, payload)?),
            'd' => DataStreamPart::FinishMessage(decode(tag, payload)?),
            other => return Err(PartParseError::UnknownTag(other.to_string())),
        };
        Ok(part)
    }
}

fn decode<T: DeserializeOwned>(tag: char, payload: &str) -> Result<T, PartParseError> {
    serde_json::from_str(payload).map_err(|source| PartParseError::Payload { tag, source })
}

/// Parse a whole data stream body, skipping blank lines.
///
/// # Errors
///
/// Returns the first line that fails to parse.
pub fn parse_data_stream(body: &str) -> Result<Vec<DataStreamPart>, PartParseError> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(DataStreamPart::parse_line)
        .collect()
}

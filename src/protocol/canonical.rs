use std::borrow::Cow;
use std::fmt;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::ConversionError;

/// Body posted by the chat UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Author role of a canonical message.
///
/// Unknown role names survive deserialization as [`Role::Other`] so that
/// converters can reject them with a typed error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    Other(String),
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::Other(name) => name,
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.as_str() {
            "system" => Role::System,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            _ => Role::Other(value),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File attached to a user message, usually as a `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub url: String,
}

/// Provider-independent chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Value>,
    #[serde(default)]
    pub content: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Value>,
    #[serde(
        default,
        rename = "experimental_attachments",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub attachments: Vec<Attachment>,
    /// Pre-`parts` representation still sent by older UI clients.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_invocations: Vec<ToolInvocation>,
}

impl Message {
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self {
            id: String::new(),
            created_at: None,
            content: String::new(),
            role,
            parts: Vec::new(),
            annotations: Vec::new(),
            attachments: Vec::new(),
            tool_invocations: Vec::new(),
        }
    }

    /// Message whose content is a single text part.
    #[must_use]
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        let text = text.into();
        let mut message = Self::new(role);
        message.parts.push(Part::Text { text: text.clone() });
        message.content = text;
        message
    }

    /// Parts to convert, falling back to `content` and legacy tool invocations
    /// when the message carries no explicit parts.
    #[must_use]
    pub fn effective_parts(&self) -> Cow<'_, [Part]> {
        if !self.parts.is_empty() {
            return Cow::Borrowed(&self.parts);
        }
        let mut parts = Vec::with_capacity(1 + self.tool_invocations.len());
        if !self.content.is_empty() {
            parts.push(Part::Text {
                text: self.content.clone(),
            });
        }
        parts.extend(
            self.tool_invocations
                .iter()
                .cloned()
                .map(|tool_invocation| Part::ToolInvocation { tool_invocation }),
        );
        Cow::Owned(parts)
    }

    /// Concatenated text of all text parts.
    #[must_use]
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for part in self.effective_parts().iter() {
            if let Part::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }

    /// Tool invocations in order of appearance.
    pub fn tool_invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                Part::ToolInvocation { tool_invocation } => Some(tool_invocation),
                _ => None,
            })
            .chain(self.tool_invocations.iter())
    }

    pub(crate) fn tool_invocation_mut(&mut self, tool_call_id: &str) -> Option<&mut ToolInvocation> {
        self.parts
            .iter_mut()
            .filter_map(|part| match part {
                Part::ToolInvocation { tool_invocation } => Some(tool_invocation),
                _ => None,
            })
            .chain(self.tool_invocations.iter_mut())
            .find(|invocation| invocation.tool_call_id == tool_call_id)
    }
}

/// One ordered element of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    Text {
        text: String,
    },
    Reasoning {
        reasoning: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        details: Vec<ReasoningDetail>,
    },
    ToolInvocation {
        #[serde(rename = "toolInvocation")]
        tool_invocation: ToolInvocation,
    },
    Source {
        source: SourceInfo,
    },
    File {
        #[serde(rename = "mimeType")]
        mime_type: String,
        #[serde(with = "crate::util::base64_bytes")]
        data: Vec<u8>,
    },
    StepStart,
}

/// Segment of exposed model reasoning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReasoningDetail {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    Redacted {
        data: String,
    },
}

/// Cited source attached to an assistant message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// Lifecycle of a tool invocation. Ordering follows the allowed transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolInvocationState {
    PartialCall,
    Call,
    Result,
}

/// Tool call arguments: raw text while streaming, decoded JSON afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolArgs {
    Partial(String),
    Decoded(Value),
}

impl Default for ToolArgs {
    fn default() -> Self {
        ToolArgs::Decoded(Value::Null)
    }
}

impl ToolArgs {
    /// JSON text suitable for providers that carry arguments as a string.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError::MarshalFailure`] when the decoded value cannot be encoded.
    pub fn to_json_text(&self) -> Result<String, ConversionError> {
        match self {
            ToolArgs::Partial(text) => Ok(text.clone()),
            ToolArgs::Decoded(value) => {
                serde_json::to_string(value).map_err(|source| ConversionError::MarshalFailure {
                    context: "tool call args",
                    source,
                })
            }
        }
    }

    /// True for `null`, `{}` and blank partial text.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            ToolArgs::Decoded(Value::Null) => true,
            ToolArgs::Decoded(Value::Object(map)) => map.is_empty(),
            ToolArgs::Decoded(_) => false,
            ToolArgs::Partial(text) => text.trim().is_empty(),
        }
    }

    /// Arguments as a JSON object. `null` and empty partial text become `{}`.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError::InvalidArgsType`] naming `tool_name` when the
    /// arguments are not an object.
    pub fn to_object(&self, tool_name: &str) -> Result<Map<String, Value>, ConversionError> {
        let invalid = || ConversionError::InvalidArgsType(tool_name.to_string());
        match self {
            ToolArgs::Decoded(Value::Object(map)) => Ok(map.clone()),
            ToolArgs::Decoded(Value::Null) => Ok(Map::new()),
            ToolArgs::Decoded(_) => Err(invalid()),
            ToolArgs::Partial(text) if text.trim().is_empty() => Ok(Map::new()),
            ToolArgs::Partial(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => Ok(map),
                _ => Err(invalid()),
            },
        }
    }
}

/// A tool call as seen by a UI message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub state: ToolInvocationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
    pub tool_call_id: String,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub args: ToolArgs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolCallResult>,
}

impl ToolInvocation {
    #[must_use]
    pub fn call(tool_call_id: impl Into<String>, tool_name: impl Into<String>, args: Value) -> Self {
        Self {
            state: ToolInvocationState::Call,
            step: None,
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            args: ToolArgs::Decoded(args),
            result: None,
        }
    }

    /// Move to `result` state carrying `result`.
    #[must_use]
    pub fn with_result(mut self, result: impl Into<ToolCallResult>) -> Self {
        self.state = ToolInvocationState::Result;
        self.result = Some(result.into());
        self
    }
}

/// Tool calls already written into an outgoing provider request, by call id.
///
/// Legacy histories list a call and its result as separate invocations with
/// the same id, possibly in different messages. The call must be written once.
#[derive(Debug, Default)]
pub(crate) struct SentToolCalls {
    calls: FxHashMap<String, (String, ToolArgs)>,
}

impl SentToolCalls {
    /// Completes `invocation` from the earlier call with the same id.
    ///
    /// The flag is true when the call has not been written yet; it is recorded
    /// as written before returning.
    pub(crate) fn admit<'a>(
        &mut self,
        invocation: &'a ToolInvocation,
    ) -> (Cow<'a, ToolInvocation>, bool) {
        let Some((name, args)) = self.calls.get(&invocation.tool_call_id) else {
            self.calls.insert(
                invocation.tool_call_id.clone(),
                (invocation.tool_name.clone(), invocation.args.clone()),
            );
            return (Cow::Borrowed(invocation), true);
        };
        if !invocation.tool_name.is_empty() && !invocation.args.is_empty() {
            return (Cow::Borrowed(invocation), false);
        }
        let mut completed = invocation.clone();
        if completed.tool_name.is_empty() {
            completed.tool_name = name.clone();
        }
        if completed.args.is_empty() {
            completed.args = args.clone();
        }
        (Cow::Owned(completed), false)
    }
}

/// A completed tool call handed to a tool handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: Map<String, Value>,
}

/// Value returned by a tool handler.
///
/// Serializes transparently. Deserialization always yields [`ToolCallResult::Value`],
/// since the wire form does not record which constructor produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallResult {
    Part(Box<Part>),
    Parts(Vec<Part>),
    Value(Value),
}

impl ToolCallResult {
    /// Flatten into message parts. Plain values become one text part holding their JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError::MarshalFailure`] when a value cannot be encoded.
    pub fn to_parts(&self) -> Result<Vec<Part>, ConversionError> {
        match self {
            ToolCallResult::Part(part) => Ok(vec![(**part).clone()]),
            ToolCallResult::Parts(parts) => Ok(parts.clone()),
            ToolCallResult::Value(value) => {
                let text = serde_json::to_string(value).map_err(|source| {
                    ConversionError::MarshalFailure {
                        context: "tool call result",
                        source,
                    }
                })?;
                Ok(vec![Part::Text { text }])
            }
        }
    }
}

impl Serialize for ToolCallResult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            ToolCallResult::Part(part) => part.serialize(serializer),
            ToolCallResult::Parts(parts) => parts.serialize(serializer),
            ToolCallResult::Value(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ToolCallResult {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer).map(ToolCallResult::Value)
    }
}

impl From<Part> for ToolCallResult {
    fn from(part: Part) -> Self {
        ToolCallResult::Part(Box::new(part))
    }
}

impl From<Vec<Part>> for ToolCallResult {
    fn from(parts: Vec<Part>) -> Self {
        ToolCallResult::Parts(parts)
    }
}

impl From<Value> for ToolCallResult {
    fn from(value: Value) -> Self {
        ToolCallResult::Value(value)
    }
}

/// Tool output text is JSON-decoded when possible, otherwise kept as a string.
pub(crate) fn decode_tool_output(text: &str) -> ToolCallResult {
    ToolCallResult::Value(
        serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())),
    )
}

/// Attach `result` to the latest assistant call with `tool_call_id`.
///
/// Fails with [`ConversionError::OrphanResult`] when no earlier assistant
/// message declares any call, and [`ConversionError::UnknownId`] when none matches.
pub(crate) fn resolve_tool_call(
    messages: &mut [Message],
    tool_call_id: &str,
    result: ToolCallResult,
) -> Result<(), ConversionError> {
    let mut saw_call = false;
    for message in messages
        .iter_mut()
        .rev()
        .filter(|message| message.role == Role::Assistant)
    {
        saw_call |= message.tool_invocations().next().is_some();
        if let Some(invocation) = message.tool_invocation_mut(tool_call_id) {
            invocation.state = ToolInvocationState::Result;
            invocation.result = Some(result);
            return Ok(());
        }
    }
    if saw_call {
        Err(ConversionError::UnknownId(tool_call_id.to_string()))
    } else {
        Err(ConversionError::OrphanResult(tool_call_id.to_string()))
    }
}

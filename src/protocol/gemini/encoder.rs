use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Value};

use crate::error::ConversionError;
use crate::protocol::canonical::{
    Attachment, Message, Part, Role, SentToolCalls, ToolCallResult, ToolInvocation,
    ToolInvocationState,
};
use crate::protocol::mapping::canonical_role_to_gemini;
use crate::util::split_data_url;

use super::{GeminiContent, GeminiFunctionCall, GeminiFunctionResponse, GeminiPart};

/// Encode canonical messages as Gemini `contents`.
///
/// System messages are skipped; see [`gemini_system_instruction`]. A resolved
/// tool call closes the current `model` content and is answered by a
/// `function` content holding the `functionResponse`. A call listed again by a
/// later result entry is written once.
///
/// # Errors
///
/// Returns [`ConversionError`] for unsupported roles, non-object tool
/// arguments and attachments that are not valid base64 `data:` URLs.
pub fn encode_gemini_contents(messages: &[Message]) -> Result<Vec<GeminiContent>, ConversionError> {
    let mut out = Vec::with_capacity(messages.len());
    let mut sent = SentToolCalls::default();
    for message in messages {
        match &message.role {
            Role::System => {}
            Role::User => out.push(encode_user_message(message)?),
            Role::Assistant => encode_assistant_message(message, &mut sent, &mut out)?,
            role @ (Role::Tool | Role::Other(_)) => {
                return Err(ConversionError::UnsupportedRole(role.to_string()));
            }
        }
    }
    Ok(out)
}

/// System messages as a Gemini `systemInstruction`, one text part each.
#[must_use]
pub fn gemini_system_instruction(messages: &[Message]) -> Option<GeminiContent> {
    let parts: Vec<_> = messages
        .iter()
        .filter(|message| message.role == Role::System)
        .map(Message::text_content)
        .filter(|text| !text.is_empty())
        .map(GeminiPart::text)
        .collect();
    (!parts.is_empty()).then_some(GeminiContent { role: None, parts })
}

fn encode_user_message(message: &Message) -> Result<GeminiContent, ConversionError> {
    let mut content = GeminiContent::new("user");
    for part in message.effective_parts().iter() {
        match part {
            Part::Text { text } => content.parts.push(GeminiPart::text(text.clone())),
            Part::File { mime_type, data } => content
                .parts
                .push(GeminiPart::inline_data(mime_type.clone(), STANDARD.encode(data))),
            Part::ToolInvocation { .. } => {
                return Err(ConversionError::UnsupportedRole(
                    "user message with tool invocations".to_string(),
                ));
            }
            _ => {}
        }
    }
    for attachment in &message.attachments {
        content.parts.push(attachment_part(attachment)?);
    }
    Ok(content)
}

fn attachment_part(attachment: &Attachment) -> Result<GeminiPart, ConversionError> {
    let invalid = || ConversionError::InvalidAttachment(attachment.url.clone());
    let (media_type, payload) = split_data_url(&attachment.url).ok_or_else(invalid)?;
    STANDARD.decode(payload).map_err(|_| invalid())?;
    let mime_type = attachment.content_type.as_deref().unwrap_or(media_type);
    Ok(GeminiPart::inline_data(mime_type, payload))
}

fn encode_assistant_message(
    message: &Message,
    sent: &mut SentToolCalls,
    out: &mut Vec<GeminiContent>,
) -> Result<(), ConversionError> {
    let model_role = canonical_role_to_gemini(&Role::Assistant).unwrap_or("model");
    let mut content = GeminiContent::new(model_role);
    for part in message.effective_parts().iter() {
        match part {
            Part::Text { text } if !text.is_empty() => {
                content.parts.push(GeminiPart::text(text.clone()));
            }
            Part::ToolInvocation { tool_invocation } => {
                let (invocation, unsent) = sent.admit(tool_invocation);
                if unsent {
                    content.parts.push(GeminiPart::function_call(GeminiFunctionCall {
                        id: Some(invocation.tool_call_id.clone()),
                        name: invocation.tool_name.clone(),
                        args: Some(Value::Object(
                            invocation.args.to_object(&invocation.tool_name)?,
                        )),
                    }));
                }
                if invocation.state == ToolInvocationState::Result {
                    let finished = std::mem::replace(&mut content, GeminiContent::new(model_role));
                    if !finished.parts.is_empty() {
                        out.push(finished);
                    }
                    push_function_content(out, function_content(&invocation)?);
                }
            }
            _ => {}
        }
    }
    if !content.parts.is_empty() {
        out.push(content);
    }
    Ok(())
}

/// Responses to parallel calls share one `function` content.
fn push_function_content(out: &mut Vec<GeminiContent>, content: GeminiContent) {
    match out.last_mut() {
        Some(last) if last.role == content.role => last.parts.extend(content.parts),
        _ => out.push(content),
    }
}

fn function_content(invocation: &ToolInvocation) -> Result<GeminiContent, ConversionError> {
    let mut content = GeminiContent::new(canonical_role_to_gemini(&Role::Tool).unwrap_or("function"));
    let mut files = Vec::new();
    let response = match &invocation.result {
        None => Value::Object(Map::new()),
        Some(ToolCallResult::Value(Value::Object(map))) if !is_result_wrapper(map) => {
            Value::Object(map.clone())
        }
        Some(ToolCallResult::Value(value)) => wrap_result(value.clone()),
        Some(result) => {
            let mut text = String::new();
            for part in result.to_parts()? {
                match part {
                    Part::Text { text: chunk } => text.push_str(&chunk),
                    Part::File { mime_type, data } => {
                        files.push(GeminiPart::inline_data(mime_type, STANDARD.encode(data)));
                    }
                    _ => {}
                }
            }
            wrap_result(Value::String(text))
        }
    };
    content
        .parts
        .push(GeminiPart::function_response(GeminiFunctionResponse {
            id: Some(invocation.tool_call_id.clone()),
            name: invocation.tool_name.clone(),
            response,
        }));
    content.parts.extend(files);
    Ok(content)
}

/// Objects shaped like the wrapper are wrapped again so decoding can unwrap.
fn is_result_wrapper(map: &Map<String, Value>) -> bool {
    map.len() == 1 && map.contains_key("result")
}

fn wrap_result(value: Value) -> Value {
    let mut map = Map::with_capacity(1);
    map.insert("result".to_string(), value);
    Value::Object(map)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use serde_json::Value;

use crate::error::ConversionError;
use crate::protocol::canonical::{
    Attachment, Message, Part, ReasoningDetail, Role, ToolCallResult, ToolInvocation,
    ToolInvocationState,
};
use crate::protocol::mapping::gemini_role_to_canonical;
use crate::util::new_id;

use super::{GeminiContent, GeminiFunctionResponse};

/// Decode Gemini `contents` into canonical messages.
///
/// A `functionResponse` resolves the most recent unresolved call with the same
/// function name. `{"result": …}` payloads are unwrapped.
///
/// # Errors
///
/// Returns [`ConversionError::OrphanResult`] when no earlier call exists,
/// [`ConversionError::NameMismatch`] when none has the function name, and
/// [`ConversionError::UnsupportedRole`] for unknown roles.
pub fn decode_gemini_contents(contents: &[GeminiContent]) -> Result<Vec<Message>, ConversionError> {
    let mut out = Vec::with_capacity(contents.len());
    for content in contents {
        let role = gemini_role_to_canonical(content.role.as_deref().unwrap_or_default());
        match role {
            Role::Assistant => out.push(decode_model_content(content)),
            Role::User | Role::Tool => {
                let message = decode_user_content(content, &mut out)?;
                if !message.parts.is_empty() || !message.attachments.is_empty() {
                    out.push(message);
                }
            }
            role => return Err(ConversionError::UnsupportedRole(role.to_string())),
        }
    }
    Ok(out)
}

fn push_text(message: &mut Message, text: &str) {
    if text.is_empty() {
        return;
    }
    message.content.push_str(text);
    message.parts.push(Part::Text {
        text: text.to_string(),
    });
}

fn decode_model_content(content: &GeminiContent) -> Message {
    let mut out = Message::new(Role::Assistant);
    for part in &content.parts {
        if let Some(call) = &part.function_call {
            let id = call
                .id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(new_id);
            out.parts.push(Part::ToolInvocation {
                tool_invocation: ToolInvocation::call(
                    id,
                    call.name.clone(),
                    call.args.clone().unwrap_or(Value::Null),
                ),
            });
        } else if let Some(text) = &part.text {
            if part.thought == Some(true) {
                out.parts.push(Part::Reasoning {
                    reasoning: text.clone(),
                    details: vec![ReasoningDetail::Text {
                        text: text.clone(),
                        signature: None,
                    }],
                });
            } else {
                push_text(&mut out, text);
            }
        }
    }
    out
}

fn decode_user_content(
    content: &GeminiContent,
    previous: &mut [Message],
) -> Result<Message, ConversionError> {
    let mut out = Message::new(Role::User);
    for part in &content.parts {
        if let Some(response) = &part.function_response {
            resolve_function_response(previous, response)?;
        } else if let Some(blob) = &part.inline_data {
            out.attachments.push(Attachment {
                name: None,
                content_type: Some(blob.mime_type.clone()),
                url: format!("data:{};base64,{}", blob.mime_type, blob.data),
            });
        } else if let Some(text) = &part.text {
            push_text(&mut out, text);
        }
    }
    Ok(out)
}

fn unwrap_result(response: &Value) -> Value {
    match response {
        Value::Object(map) if map.len() == 1 => map
            .get("result")
            .cloned()
            .unwrap_or_else(|| response.clone()),
        other => other.clone(),
    }
}

fn resolve_function_response(
    messages: &mut [Message],
    response: &GeminiFunctionResponse,
) -> Result<(), ConversionError> {
    let wanted_id = response.id.as_deref().filter(|id| !id.is_empty());
    let mut saw_call = false;
    for message in messages
        .iter_mut()
        .rev()
        .filter(|message| message.role == Role::Assistant)
    {
        saw_call |= message.tool_invocations().next().is_some();
        let candidate = message
            .parts
            .iter_mut()
            .filter_map(|part| match part {
                Part::ToolInvocation { tool_invocation } => Some(tool_invocation),
                _ => None,
            })
            .chain(message.tool_invocations.iter_mut())
            .rev()
            .find(|invocation| {
                invocation.tool_name == response.name
                    && invocation.state != ToolInvocationState::Result
                    && wanted_id.map_or(true, |id| id == invocation.tool_call_id)
            });
        if let Some(invocation) = candidate {
            invocation.state = ToolInvocationState::Result;
            invocation.result = Some(ToolCallResult::Value(unwrap_result(&response.response)));
            return Ok(());
        }
    }
    if saw_call {
        Err(ConversionError::NameMismatch(response.name.clone()))
    } else {
        Err(ConversionError::OrphanResult(response.name.clone()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

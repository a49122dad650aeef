use serde_json::Value;
use tracing::warn;

use crate::error::ConversionError;
use crate::protocol::canonical::{
    decode_tool_output, resolve_tool_call, Attachment, Message, Part, Role, ToolInvocation,
};
use crate::protocol::mapping::openai_role_to_canonical;
use crate::util::split_data_url;

use super::{OpenAiContent, OpenAiContentPart, OpenAiMessage};

/// Decode `OpenAI` request messages into canonical messages.
///
/// `tool` messages patch the matching call of an earlier assistant message
/// instead of producing messages of their own.
///
/// # Errors
///
/// Returns [`ConversionError::OrphanResult`] when a tool message has no earlier
/// assistant tool call, and [`ConversionError::UnknownId`] when none matches its id.
pub fn decode_openai_messages(messages: &[OpenAiMessage]) -> Result<Vec<Message>, ConversionError> {
    let mut out: Vec<Message> = Vec::with_capacity(messages.len());
    for message in messages {
        match openai_role_to_canonical(&message.role) {
            Role::System => out.push(Message::text(
                Role::System,
                content_text(message.content.as_ref()),
            )),
            Role::User => out.push(decode_user_message(message)),
            Role::Assistant => out.push(decode_assistant_message(message)),
            Role::Tool => apply_tool_result(&mut out, message)?,
            Role::Other(role) => return Err(ConversionError::UnsupportedRole(role)),
        }
    }
    Ok(out)
}

fn content_text(content: Option<&OpenAiContent>) -> String {
    match content {
        None => String::new(),
        Some(OpenAiContent::Text(text)) => text.clone(),
        Some(OpenAiContent::Parts(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                OpenAiContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect(),
    }
}

fn decode_user_message(message: &OpenAiMessage) -> Message {
    let mut out = Message::new(Role::User);
    match &message.content {
        None => {}
        Some(OpenAiContent::Text(text)) => push_text(&mut out, text),
        Some(OpenAiContent::Parts(parts)) => {
            for part in parts {
                match part {
                    OpenAiContentPart::Text { text } => push_text(&mut out, text),
                    OpenAiContentPart::ImageUrl { image_url } => {
                        let content_type = split_data_url(&image_url.url)
                            .map(|(media_type, _)| media_type.to_string())
                            .filter(|media_type| !media_type.is_empty());
                        out.attachments.push(Attachment {
                            name: None,
                            content_type,
                            url: image_url.url.clone(),
                        });
                    }
                    OpenAiContentPart::Refusal { .. } => {}
                }
            }
        }
    }
    out
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

fn decode_assistant_message(message: &OpenAiMessage) -> Message {
    let mut out = Message::new(Role::Assistant);
    push_text(&mut out, &content_text(message.content.as_ref()));
    if let Some(refusal) = &message.refusal {
        push_text(&mut out, refusal);
    }
    for call in message.tool_calls.iter().flatten() {
        let args = if call.function.arguments.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&call.function.arguments).unwrap_or_else(|err| {
                warn!(tool_call_id = %call.id, error = %err, "undecodable tool call arguments");
                Value::Null
            })
        };
        out.parts.push(Part::ToolInvocation {
            tool_invocation: ToolInvocation::call(
                call.id.clone(),
                call.function.name.clone(),
                args,
            ),
        });
    }
    out
}

fn apply_tool_result(out: &mut [Message], message: &OpenAiMessage) -> Result<(), ConversionError> {
    let tool_call_id = message.tool_call_id.as_deref().unwrap_or_default();
    let result = decode_tool_output(&content_text(message.content.as_ref()));
    resolve_tool_call(out, tool_call_id, result)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::{ToolArgs, ToolCallResult, ToolInvocationState};
    use serde_json::json;

    fn messages(value: Value) -> Vec<OpenAiMessage> {
        serde_json::from_value(value).expect("messages")
    }

    #[test]
    fn test_simple_user_message() {
        let out = decode_openai_messages(&messages(json!([
            {"role": "developer", "content": "rules"},
            {"role": "user", "content": "hi"}
        ])))
        .expect("decode");
        assert_eq!(out[0].role, Role::System);
        assert_eq!(out[0].content, "rules");
        assert_eq!(out[1].parts, vec![Part::Text { text: "hi".into() }]);
    }

    #[test]
    fn test_image_parts_become_attachments() {
        let out = decode_openai_messages(&messages(json!([
            {"role": "user", "content": [
                {"type": "text", "text": "what is this"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,AQID"}}
            ]}
        ])))
        .expect("decode");
        assert_eq!(out[0].content, "what is this");
        assert_eq!(out[0].attachments[0].content_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_tool_message_patches_call() {
        let out = decode_openai_messages(&messages(json!([
            {"role": "assistant", "content": null, "tool_calls": [
                {"id": "c1", "type": "function", "function": {"name": "print", "arguments": "{\"m\":1}"}}
            ]},
            {"role": "tool", "tool_call_id": "c1", "content": "{\"ok\":true}"}
        ])))
        .expect("decode");
        assert_eq!(out.len(), 1);
        let invocation = out[0].tool_invocations().next().expect("invocation");
        assert_eq!(invocation.state, ToolInvocationState::Result);
        assert_eq!(invocation.args, ToolArgs::Decoded(json!({"m": 1})));
        assert_eq!(invocation.result, Some(ToolCallResult::Value(json!({"ok": true}))));
    }

    #[test]
    fn test_plain_text_tool_output_stays_string() {
        assert_eq!(
            decode_tool_output("sunny"),
            ToolCallResult::Value(json!("sunny"))
        );
    }

    #[test]
    fn test_invalid_arguments_decode_to_null() {
        let out = decode_openai_messages(&messages(json!([
            {"role": "assistant", "tool_calls": [
                {"id": "c1", "type": "function", "function": {"name": "t", "arguments": "{oops"}}
            ]}
        ])))
        .expect("decode");
        let invocation = out[0].tool_invocations().next().expect("invocation");
        assert_eq!(invocation.args, ToolArgs::Decoded(Value::Null));
    }

    #[test]
    fn test_orphan_and_unknown_results() {
        let err = decode_openai_messages(&messages(json!([
            {"role": "user", "content": "hi"},
            {"role": "tool", "tool_call_id": "c1", "content": "x"}
        ])))
        .expect_err("orphan");
        assert!(matches!(err, ConversionError::OrphanResult(_)));

        let err = decode_openai_messages(&messages(json!([
            {"role": "assistant", "tool_calls": [
                {"id": "c1", "type": "function", "function": {"name": "t", "arguments": "{}"}}
            ]},
            {"role": "tool", "tool_call_id": "c2", "content": "x"}
        ])))
        .expect_err("unknown");
        assert!(matches!(err, ConversionError::UnknownId(id) if id == "c2"));
    }
}

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rustc_hash::FxHashSet;

use crate::error::ConversionError;
use crate::protocol::canonical::{Message, Part, Role, ToolInvocation, ToolInvocationState};

use super::{OpenAiContent, OpenAiContentPart, OpenAiImageUrl, OpenAiMessage, OpenAiToolCall};

const FILE_RESULT_NOTICE: &str =
    "File content was provided as a tool result, but is not supported by OpenAI.";

/// Encode canonical messages as `OpenAI` chat completion request messages.
///
/// Assistant tool calls are packed into one `assistant` message per run of
/// calls. Every resolved call is followed by its `tool` message, preceded by an
/// assistant message declaring the call unless one was already emitted.
///
/// # Errors
///
/// Returns [`ConversionError`] for roles `OpenAI` requests cannot carry, user
/// messages holding tool invocations, and values that fail to encode.
pub fn encode_openai_messages(messages: &[Message]) -> Result<Vec<OpenAiMessage>, ConversionError> {
    let mut out = Vec::with_capacity(messages.len() + 2);
    // Calls already sent in an assistant message and still awaiting their result.
    let mut open_calls: FxHashSet<String> = FxHashSet::default();

    for message in messages {
        match &message.role {
            Role::System => out.push(OpenAiMessage::new(
                "system",
                Some(OpenAiContent::Text(message.text_content())),
            )),
            Role::User => out.push(encode_user_message(message)?),
            Role::Assistant => encode_assistant_message(message, &mut open_calls, &mut out)?,
            role @ (Role::Tool | Role::Other(_)) => {
                return Err(ConversionError::UnsupportedRole(role.to_string()));
            }
        }
    }
    Ok(out)
}

fn encode_user_message(message: &Message) -> Result<OpenAiMessage, ConversionError> {
    let parts = message.effective_parts();
    let mut content = Vec::with_capacity(parts.len() + message.attachments.len());
    for part in parts.iter() {
        match part {
            Part::Text { text } => content.push(OpenAiContentPart::Text { text: text.clone() }),
            Part::File { mime_type, data } => content.push(image_part(format!(
                "data:{mime_type};base64,{}",
                STANDARD.encode(data)
            ))),
            Part::ToolInvocation { .. } => {
                return Err(ConversionError::UnsupportedRole(
                    "user message with tool invocations".to_string(),
                ));
            }
            Part::Reasoning { .. } | Part::Source { .. } | Part::StepStart => {}
        }
    }
    content.extend(
        message
            .attachments
            .iter()
            .map(|attachment| image_part(attachment.url.clone())),
    );

    let content = match content.as_slice() {
        [OpenAiContentPart::Text { text }] => OpenAiContent::Text(text.clone()),
        _ => OpenAiContent::Parts(content),
    };
    Ok(OpenAiMessage::new("user", Some(content)))
}

fn image_part(url: String) -> OpenAiContentPart {
    OpenAiContentPart::ImageUrl {
        image_url: OpenAiImageUrl { url, detail: None },
    }
}

#[derive(Debug, Default)]
struct AssistantDraft {
    text: String,
    tool_calls: Vec<OpenAiToolCall>,
}

impl AssistantDraft {
    fn is_empty(&self) -> bool {
        self.text.is_empty() && self.tool_calls.is_empty()
    }

    fn declares(&self, tool_call_id: &str) -> bool {
        self.tool_calls.iter().any(|call| call.id == tool_call_id)
    }

    fn flush(&mut self, out: &mut Vec<OpenAiMessage>) {
        if self.is_empty() {
            return;
        }
        let draft = std::mem::take(self);
        let content = (!draft.text.is_empty()).then_some(OpenAiContent::Text(draft.text));
        let mut message = OpenAiMessage::new("assistant", content);
        if !draft.tool_calls.is_empty() {
            message.tool_calls = Some(draft.tool_calls);
        }
        out.push(message);
    }
}

fn encode_assistant_message(
    message: &Message,
    open_calls: &mut FxHashSet<String>,
    out: &mut Vec<OpenAiMessage>,
) -> Result<(), ConversionError> {
    let mut draft = AssistantDraft::default();
    for part in message.effective_parts().iter() {
        match part {
            Part::Text { text } => draft.text.push_str(text),
            Part::ToolInvocation { tool_invocation } => {
                if tool_invocation.state != ToolInvocationState::Result {
                    draft.tool_calls.push(tool_call(tool_invocation)?);
                    open_calls.insert(tool_invocation.tool_call_id.clone());
                    continue;
                }
                let id = &tool_invocation.tool_call_id;
                let already_sent = draft.is_empty() && open_calls.contains(id);
                if !already_sent && !draft.declares(id) {
                    draft.tool_calls.push(tool_call(tool_invocation)?);
                }
                draft.flush(out);
                out.push(tool_message(tool_invocation)?);
                open_calls.remove(id);
            }
            Part::Reasoning { .. } | Part::Source { .. } | Part::File { .. } | Part::StepStart => {}
        }
    }
    draft.flush(out);
    Ok(())
}

fn tool_call(invocation: &ToolInvocation) -> Result<OpenAiToolCall, ConversionError> {
    Ok(OpenAiToolCall::function(
        invocation.tool_call_id.clone(),
        invocation.tool_name.clone(),
        invocation.args.to_json_text()?,
    ))
}

fn tool_message(invocation: &ToolInvocation) -> Result<OpenAiMessage, ConversionError> {
    let mut text = String::new();
    if let Some(result) = &invocation.result {
        for part in result.to_parts()? {
            match part {
                Part::Text { text: chunk } => text.push_str(&chunk),
                Part::File { .. } => text.push_str(FILE_RESULT_NOTICE),
                _ => {}
            }
        }
    }
    let mut message = OpenAiMessage::new("tool", Some(OpenAiContent::Text(text)));
    message.tool_call_id = Some(invocation.tool_call_id.clone());
    Ok(message)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::{Attachment, ToolCallResult};
    use serde_json::json;

    fn assistant(parts: Vec<Part>) -> Message {
        let mut message = Message::new(Role::Assistant);
        message.parts = parts;
        message
    }

    fn invocation(tool_invocation: ToolInvocation) -> Part {
        Part::ToolInvocation { tool_invocation }
    }

    #[test]
    fn test_system_and_user_text() {
        let out = encode_openai_messages(&[
            Message::text(Role::System, "be brief"),
            Message::text(Role::User, "hi"),
        ])
        .expect("encode");
        assert_eq!(
            serde_json::to_value(&out).expect("json"),
            json!([
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"}
            ])
        );
    }

    #[test]
    fn test_user_file_and_attachment_become_images() {
        let mut message = Message::text(Role::User, "look");
        message.parts.push(Part::File {
            mime_type: "image/png".into(),
            data: vec![1, 2, 3],
        });
        message.attachments.push(Attachment {
            name: None,
            content_type: Some("image/jpeg".into()),
            url: "data:image/jpeg;base64,AAAA".into(),
        });
        let out = encode_openai_messages(&[message]).expect("encode");
        assert_eq!(
            serde_json::to_value(&out[0].content).expect("json"),
            json!([
                {"type": "text", "text": "look"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,AQID"}},
                {"type": "image_url", "image_url": {"url": "data:image/jpeg;base64,AAAA"}}
            ])
        );
    }

    #[test]
    fn test_result_in_same_message_gets_placeholder_call() {
        let out = encode_openai_messages(&[assistant(vec![
            Part::StepStart,
            invocation(
                ToolInvocation::call("call_1", "print", json!({"message": "hi"}))
                    .with_result(json!({"ok": true})),
            ),
        ])])
        .expect("encode");
        assert_eq!(out.len(), 2);
        let calls = out[0].tool_calls.as_ref().expect("tool calls");
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.arguments, "{\"message\":\"hi\"}");
        assert_eq!(out[1].role, "tool");
        assert_eq!(out[1].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(out[1].content, Some(OpenAiContent::Text("{\"ok\":true}".into())));
    }

    #[test]
    fn test_call_then_result_in_later_message() {
        let out = encode_openai_messages(&[
            Message::text(Role::User, "weather?"),
            assistant(vec![invocation(ToolInvocation::call(
                "call_weather",
                "weather",
                json!({"city": "Paris"}),
            ))]),
            assistant(vec![invocation(
                ToolInvocation::call("call_weather", "weather", json!({"city": "Paris"}))
                    .with_result(json!("sunny")),
            )]),
            Message::text(Role::Assistant, "It is sunny."),
        ])
        .expect("encode");
        let roles: Vec<_> = out.iter().map(|message| message.role.as_str()).collect();
        assert_eq!(roles, ["user", "assistant", "tool", "assistant"]);
        assert_eq!(out[1].tool_calls.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_file_result_becomes_notice() {
        let result = ToolCallResult::from(vec![
            Part::Text { text: "see ".into() },
            Part::File {
                mime_type: "image/png".into(),
                data: vec![0],
            },
        ]);
        let out = encode_openai_messages(&[assistant(vec![invocation(
            ToolInvocation::call("c1", "shot", json!({})).with_result(result),
        )])])
        .expect("encode");
        assert_eq!(
            out[1].content,
            Some(OpenAiContent::Text(format!("see {FILE_RESULT_NOTICE}")))
        );
    }

    #[test]
    fn test_rejects_tool_role_and_user_invocations() {
        let err = encode_openai_messages(&[Message::text(Role::Tool, "x")]).expect_err("tool role");
        assert!(matches!(err, ConversionError::UnsupportedRole(_)));

        let mut user = Message::new(Role::User);
        user.parts
            .push(invocation(ToolInvocation::call("c1", "t", json!({}))));
        let err = encode_openai_messages(&[user]).expect_err("user invocation");
        assert!(matches!(err, ConversionError::UnsupportedRole(_)));
    }
}

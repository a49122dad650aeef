use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::ConversionError;
use crate::protocol::canonical::{
    decode_tool_output, resolve_tool_call, Attachment, Message, Part, ReasoningDetail, Role,
    ToolCallResult, ToolInvocation,
};
use crate::protocol::mapping::anthropic_role_to_canonical;

use super::{AnthropicContentBlock, AnthropicConversation, AnthropicMessage, AnthropicToolResultContent};

/// Decode an Anthropic conversation into canonical messages.
///
/// `tool_result` blocks patch the matching `tool_use` of an earlier assistant
/// message. A user message made only of tool results produces no message.
///
/// # Errors
///
/// Returns [`ConversionError::OrphanResult`] or [`ConversionError::UnknownId`]
/// for unmatched tool results, and [`ConversionError::UnsupportedRole`] for
/// roles other than `user` and `assistant`.
pub fn decode_anthropic_messages(
    conversation: &AnthropicConversation,
) -> Result<Vec<Message>, ConversionError> {
    let mut out = Vec::with_capacity(conversation.messages.len() + 1);
    if let Some(system) = conversation.system.as_deref().filter(|text| !text.is_empty()) {
        out.push(Message::text(Role::System, system));
    }
    for message in &conversation.messages {
        match anthropic_role_to_canonical(&message.role) {
            Role::User => {
                let decoded = decode_user_message(message, &mut out)?;
                if !decoded.parts.is_empty() || !decoded.attachments.is_empty() {
                    out.push(decoded);
                }
            }
            Role::Assistant => out.push(decode_assistant_message(message)),
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

fn decode_user_message(
    message: &AnthropicMessage,
    previous: &mut [Message],
) -> Result<Message, ConversionError> {
    let mut out = Message::new(Role::User);
    for block in &message.content {
        match block {
            AnthropicContentBlock::Text { text } => push_text(&mut out, text),
            AnthropicContentBlock::Image { source } => out.attachments.push(Attachment {
                name: None,
                content_type: Some(source.media_type.clone()),
                url: format!("data:{};base64,{}", source.media_type, source.data),
            }),
            AnthropicContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => resolve_tool_call(previous, tool_use_id, tool_result(content))?,
            _ => {}
        }
    }
    Ok(out)
}

fn tool_result(content: &AnthropicToolResultContent) -> ToolCallResult {
    let blocks = match content {
        AnthropicToolResultContent::Text(text) => return decode_tool_output(text),
        AnthropicToolResultContent::Blocks(blocks) => blocks,
    };
    let has_images = blocks
        .iter()
        .any(|block| matches!(block, AnthropicContentBlock::Image { .. }));
    if !has_images {
        let text: String = blocks
            .iter()
            .filter_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        return decode_tool_output(&text);
    }
    let parts = blocks
        .iter()
        .filter_map(|block| match block {
            AnthropicContentBlock::Text { text } => Some(Part::Text { text: text.clone() }),
            AnthropicContentBlock::Image { source } => {
                STANDARD.decode(&source.data).ok().map(|data| Part::File {
                    mime_type: source.media_type.clone(),
                    data,
                })
            }
            _ => None,
        })
        .collect::<Vec<_>>();
    ToolCallResult::from(parts)
}

fn decode_assistant_message(message: &AnthropicMessage) -> Message {
    let mut out = Message::new(Role::Assistant);
    for block in &message.content {
        match block {
            AnthropicContentBlock::Text { text } => push_text(&mut out, text),
            AnthropicContentBlock::Thinking {
                thinking,
                signature,
            } => out.parts.push(Part::Reasoning {
                reasoning: thinking.clone(),
                details: vec![ReasoningDetail::Text {
                    text: thinking.clone(),
                    signature: (!signature.is_empty()).then(|| signature.clone()),
                }],
            }),
            AnthropicContentBlock::RedactedThinking { data } => out.parts.push(Part::Reasoning {
                reasoning: String::new(),
                details: vec![ReasoningDetail::Redacted { data: data.clone() }],
            }),
            AnthropicContentBlock::ToolUse { id, name, input } => {
                out.parts.push(Part::ToolInvocation {
                    tool_invocation: ToolInvocation::call(id.clone(), name.clone(), input.clone()),
                });
            }
            AnthropicContentBlock::Image { .. } | AnthropicContentBlock::ToolResult { .. } => {}
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

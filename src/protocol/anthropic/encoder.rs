use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;

use crate::error::ConversionError;
use crate::protocol::canonical::{
    Attachment, Message, Part, ReasoningDetail, Role, SentToolCalls, ToolInvocation,
    ToolInvocationState,
};
use crate::protocol::mapping::canonical_role_to_anthropic;
use crate::util::split_data_url;

use super::{
    AnthropicContentBlock, AnthropicConversation, AnthropicImageSource, AnthropicMessage,
    AnthropicToolResultContent,
};

/// Encode canonical messages for the Anthropic Messages API.
///
/// The system message moves to [`AnthropicConversation::system`]. A resolved
/// tool call is split into the assistant `tool_use` block and a `user` message
/// holding the matching `tool_result`. A call listed again by a later result
/// entry is written once. Adjacent messages of the same role merge.
///
/// # Errors
///
/// Returns [`ConversionError`] for more than one system message, unsupported
/// roles, non-object tool arguments and attachments that are not `data:` URLs.
pub fn encode_anthropic_messages(
    messages: &[Message],
) -> Result<AnthropicConversation, ConversionError> {
    let mut conversation = AnthropicConversation::default();
    let mut sent = SentToolCalls::default();
    for message in messages {
        match &message.role {
            Role::System => {
                if conversation.system.is_some() {
                    return Err(ConversionError::MultipleSystemMessages);
                }
                conversation.system = Some(message.text_content());
            }
            Role::User => {
                let mut content = encode_user_parts(message)?;
                content.extend(encode_attachments(&message.attachments)?);
                push_message(&mut conversation.messages, &Role::User, content);
            }
            Role::Assistant => {
                encode_assistant_message(message, &mut sent, &mut conversation.messages)?;
            }
            role @ (Role::Tool | Role::Other(_)) => {
                return Err(ConversionError::UnsupportedRole(role.to_string()));
            }
        }
    }
    Ok(conversation)
}

fn encode_user_parts(message: &Message) -> Result<Vec<AnthropicContentBlock>, ConversionError> {
    let parts = message.effective_parts();
    let mut content = Vec::with_capacity(parts.len());
    for part in parts.iter() {
        match part {
            Part::Text { text } if !text.is_empty() => {
                content.push(AnthropicContentBlock::Text { text: text.clone() });
            }
            Part::File { mime_type, data } => content.push(image_block(mime_type, data)),
            Part::ToolInvocation { .. } => {
                return Err(ConversionError::UnsupportedRole(
                    "user message with tool invocations".to_string(),
                ));
            }
            _ => {}
        }
    }
    Ok(content)
}

fn encode_assistant_message(
    message: &Message,
    sent: &mut SentToolCalls,
    out: &mut Vec<AnthropicMessage>,
) -> Result<(), ConversionError> {
    let mut content = Vec::new();
    for part in message.effective_parts().iter() {
        match part {
            Part::Text { text } if !text.is_empty() => {
                content.push(AnthropicContentBlock::Text { text: text.clone() });
            }
            Part::Reasoning { details, .. } => content.extend(details.iter().filter_map(thinking_block)),
            Part::ToolInvocation { tool_invocation } => {
                let (invocation, unsent) = sent.admit(tool_invocation);
                if unsent {
                    content.push(AnthropicContentBlock::ToolUse {
                        id: invocation.tool_call_id.clone(),
                        name: invocation.tool_name.clone(),
                        input: Value::Object(
                            invocation.args.to_object(&invocation.tool_name)?,
                        ),
                    });
                }
                if invocation.state == ToolInvocationState::Result {
                    push_message(out, &Role::Assistant, std::mem::take(&mut content));
                    push_message(out, &Role::User, vec![tool_result_block(&invocation)?]);
                }
            }
            _ => {}
        }
    }
    content.extend(encode_attachments(&message.attachments)?);
    push_message(out, &Role::Assistant, content);
    Ok(())
}

/// Unsigned reasoning cannot be replayed to Anthropic and is dropped.
fn thinking_block(detail: &ReasoningDetail) -> Option<AnthropicContentBlock> {
    match detail {
        ReasoningDetail::Text {
            text,
            signature: Some(signature),
        } => Some(AnthropicContentBlock::Thinking {
            thinking: text.clone(),
            signature: signature.clone(),
        }),
        ReasoningDetail::Text { signature: None, .. } => None,
        ReasoningDetail::Redacted { data } => {
            Some(AnthropicContentBlock::RedactedThinking { data: data.clone() })
        }
    }
}

fn tool_result_block(invocation: &ToolInvocation) -> Result<AnthropicContentBlock, ConversionError> {
    let mut blocks = Vec::new();
    if let Some(result) = &invocation.result {
        for part in result.to_parts()? {
            match part {
                Part::Text { text } => blocks.push(AnthropicContentBlock::Text { text }),
                Part::File { mime_type, data } => blocks.push(image_block(&mime_type, &data)),
                _ => {}
            }
        }
    }
    Ok(AnthropicContentBlock::ToolResult {
        tool_use_id: invocation.tool_call_id.clone(),
        content: AnthropicToolResultContent::Blocks(blocks),
        is_error: None,
    })
}

fn image_block(mime_type: &str, data: &[u8]) -> AnthropicContentBlock {
    AnthropicContentBlock::Image {
        source: AnthropicImageSource::base64(mime_type, STANDARD.encode(data)),
    }
}

fn encode_attachments(
    attachments: &[Attachment],
) -> Result<Vec<AnthropicContentBlock>, ConversionError> {
    attachments
        .iter()
        .map(|attachment| {
            let (media_type, payload) = split_data_url(&attachment.url)
                .ok_or_else(|| ConversionError::InvalidAttachment(attachment.url.clone()))?;
            let media_type = attachment.content_type.as_deref().unwrap_or(media_type);
            Ok(AnthropicContentBlock::Image {
                source: AnthropicImageSource::base64(media_type, payload),
            })
        })
        .collect()
}

fn push_message(out: &mut Vec<AnthropicMessage>, role: &Role, content: Vec<AnthropicContentBlock>) {
    if content.is_empty() {
        return;
    }
    let Some(role) = canonical_role_to_anthropic(role) else {
        return;
    };
    match out.last_mut() {
        Some(last) if last.role == role => last.content.extend(content),
        _ => out.push(AnthropicMessage {
            role: role.to_string(),
            content,
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

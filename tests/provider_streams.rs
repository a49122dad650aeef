use std::convert::Infallible;

use aisdk::error::StreamError;
use aisdk::protocol::anthropic::encoder::encode_anthropic_messages;
use aisdk::protocol::anthropic::{AnthropicContentBlock, AnthropicToolResultContent};
use aisdk::protocol::canonical::{Message, Part, Role, ToolArgs, ToolCallResult, ToolInvocationState};
use aisdk::protocol::gemini::encoder::encode_gemini_contents;
use aisdk::protocol::openai_chat::encoder::encode_openai_messages;
use aisdk::protocol::openai_chat::OpenAiContent;
use aisdk::protocol::{adapt_sse, Provider};
use aisdk::stream::{
    pipe, sse_event_stream, DataStreamAccumulator, DataStreamExt, FinishReason, Usage,
};
use bytes::Bytes;
use serde_json::{json, Value};

const ANTHROPIC_SSE: &str = include_str!("fixtures/anthropic.sse");
const OPENAI_SSE: &str = include_str!("fixtures/openai.sse");
const GEMINI_SSE: &str = include_str!("fixtures/gemini.sse");

const POTATO: &str = "Here you go:\n\nEnglish: potato\nSpanish: patata\nFrench: pomme de terre\nGerman: Kartoffel\nItalian: patata\nJapanese: ジャガイモ (jagaimo)\nRussian: картофель (kartofel')\n";

/// Split `body` into small byte chunks, cutting through UTF-8 sequences.
fn chunked(body: &str) -> Vec<Result<Bytes, Infallible>> {
    body.as_bytes()
        .chunks(13)
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect()
}

struct Replay {
    lines: Vec<String>,
    accumulator: DataStreamAccumulator,
    result: Result<(), StreamError>,
}

async fn replay(provider: Provider, body: &str) -> Replay {
    let events = sse_event_stream(futures_util::stream::iter(chunked(body)));
    let mut accumulator = DataStreamAccumulator::new();
    let mut out: Vec<u8> = Vec::new();
    let stream = adapt_sse(provider, events)
        .with_tool_calling(|_| {
            ToolCallResult::from(json!({"message": "Message printed to the console"}))
        })
        .with_accumulator(&mut accumulator);
    let result = pipe(stream, &mut out).await;
    let lines = String::from_utf8(out)
        .expect("utf8")
        .lines()
        .map(str::to_string)
        .collect();
    Replay {
        lines,
        accumulator,
        result,
    }
}

#[tokio::test]
async fn anthropic_capture_produces_data_stream() {
    let replay = replay(Provider::Anthropic, ANTHROPIC_SSE).await;
    replay.result.expect("replay");

    let id = "toolu_01RA76iwg1LbKuDjJnc6ym45";
    let expected = vec![
        r#"f:{"messageId":"msg_01LHXQM4FBxykQGT7N1a7kJ7"}"#.to_string(),
        r#"0:"I""#.to_string(),
        r#"0:"'ll help you print 'hello world' to the console""#.to_string(),
        r#"0:" using the print function.""#.to_string(),
        format!(r#"b:{{"toolCallId":"{id}","toolName":"print"}}"#),
        format!(r#"c:{{"toolCallId":"{id}","argsTextDelta":"{{\"message\""}}"#),
        format!(r#"c:{{"toolCallId":"{id}","argsTextDelta":": \"hel"}}"#),
        format!(r#"c:{{"toolCallId":"{id}","argsTextDelta":"lo worl"}}"#),
        format!(r#"c:{{"toolCallId":"{id}","argsTextDelta":"d\"}}"}}"#),
        format!(r#"9:{{"toolCallId":"{id}","toolName":"print","args":{{"message":"hello world"}}}}"#),
        format!(r#"a:{{"toolCallId":"{id}","result":{{"message":"Message printed to the console"}}}}"#),
        r#"e:{"finishReason":"tool-calls","usage":{"promptTokens":408,"completionTokens":71},"isContinued":false}"#.to_string(),
        r#"d:{"finishReason":"tool-calls","usage":{"promptTokens":408,"completionTokens":71}}"#.to_string(),
    ];
    assert_eq!(replay.lines, expected);

    let messages = replay.accumulator.messages();
    assert_eq!(messages.len(), 1);
    let message = &messages[0];
    assert_eq!(message.id, "msg_01LHXQM4FBxykQGT7N1a7kJ7");
    assert_eq!(message.role, Role::Assistant);
    assert_eq!(
        message.content,
        "I'll help you print 'hello world' to the console using the print function."
    );
    assert_eq!(message.parts.len(), 3);
    assert_eq!(message.parts[0], Part::StepStart);
    let Part::ToolInvocation { tool_invocation } = &message.parts[2] else {
        panic!("expected tool invocation");
    };
    assert_eq!(tool_invocation.state, ToolInvocationState::Result);
    assert_eq!(tool_invocation.tool_name, "print");
    assert_eq!(
        tool_invocation.args,
        ToolArgs::Decoded(json!({"message": "hello world"}))
    );
    assert_eq!(
        tool_invocation.result,
        Some(ToolCallResult::from(
            json!({"message": "Message printed to the console"})
        ))
    );
    assert_eq!(replay.accumulator.finish_reason(), FinishReason::ToolCalls);
    assert_eq!(replay.accumulator.usage(), Usage::new(Some(408), Some(71)));

    let conversation = encode_anthropic_messages(messages).expect("encode");
    assert!(conversation.system.is_none());
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(conversation.messages[0].role, "assistant");
    assert_eq!(conversation.messages[0].content.len(), 2);
    let AnthropicContentBlock::ToolUse { name, input, .. } = &conversation.messages[0].content[1]
    else {
        panic!("expected tool_use");
    };
    assert_eq!(name, "print");
    assert_eq!(input, &json!({"message": "hello world"}));

    assert_eq!(conversation.messages[1].role, "user");
    let AnthropicContentBlock::ToolResult {
        tool_use_id,
        content: AnthropicToolResultContent::Blocks(blocks),
        ..
    } = &conversation.messages[1].content[0]
    else {
        panic!("expected tool_result");
    };
    assert_eq!(tool_use_id, id);
    let [AnthropicContentBlock::Text { text }] = blocks.as_slice() else {
        panic!("expected a single text block");
    };
    let result: Value = serde_json::from_str(text).expect("json result");
    assert_eq!(result, json!({"message": "Message printed to the console"}));
}

#[tokio::test]
async fn openai_capture_produces_data_stream() {
    let replay = replay(Provider::OpenAi, OPENAI_SSE).await;
    replay.result.expect("replay");

    let id = "call_Qib2xfCV1qpazcvBOLg3wCNL";
    let mut expected = vec![
        r#"f:{"messageId":"chatcmpl-BIqITiyCGCjDeajdE8K0NWx18VRsO"}"#.to_string(),
        format!(r#"b:{{"toolCallId":"{id}","toolName":"print"}}"#),
    ];
    for delta in [r#"{\""#, "message", r#"\":\""#, "hello", " world", r#"\"}"#] {
        expected.push(format!(
            r#"c:{{"toolCallId":"{id}","argsTextDelta":"{delta}"}}"#
        ));
    }
    expected.extend([
        format!(r#"9:{{"toolCallId":"{id}","toolName":"print","args":{{"message":"hello world"}}}}"#),
        format!(r#"a:{{"toolCallId":"{id}","result":{{"message":"Message printed to the console"}}}}"#),
        r#"e:{"finishReason":"tool-calls","usage":{"promptTokens":null,"completionTokens":null},"isContinued":false}"#.to_string(),
        r#"d:{"finishReason":"tool-calls","usage":{"promptTokens":null,"completionTokens":null}}"#.to_string(),
    ]);
    assert_eq!(replay.lines, expected);

    let encoded = encode_openai_messages(replay.accumulator.messages()).expect("encode");
    assert_eq!(encoded.len(), 2);
    assert_eq!(encoded[0].role, "assistant");
    let calls = encoded[0].tool_calls.as_ref().expect("tool calls");
    assert_eq!(calls[0].function.name, "print");
    assert_eq!(encoded[1].role, "tool");
    assert_eq!(encoded[1].tool_call_id.as_deref(), Some(id));
    let Some(OpenAiContent::Text(text)) = &encoded[1].content else {
        panic!("expected string tool content");
    };
    assert_eq!(text, r#"{"message":"Message printed to the console"}"#);
}

#[tokio::test]
async fn gemini_capture_accumulates_text() {
    let replay = replay(Provider::Google, GEMINI_SSE).await;
    replay.result.expect("replay");

    assert!(replay.lines[0].starts_with("f:"));
    assert_eq!(
        replay.lines.last().map(String::as_str),
        Some(r#"d:{"finishReason":"stop","usage":{"promptTokens":10,"completionTokens":49}}"#)
    );

    let messages = replay.accumulator.messages();
    assert_eq!(messages.len(), 1);
    let message = &messages[0];
    assert_eq!(message.role, Role::Assistant);
    assert_eq!(message.content, POTATO);
    assert_eq!(
        message.parts,
        vec![
            Part::StepStart,
            Part::Text {
                text: POTATO.to_string()
            }
        ]
    );

    let contents = encode_gemini_contents(messages).expect("encode");
    assert_eq!(contents.len(), 1);
    assert_eq!(contents[0].role.as_deref(), Some("model"));
    assert_eq!(contents[0].parts.len(), 1);
    assert_eq!(contents[0].parts[0].text.as_deref(), Some(POTATO));
}

#[tokio::test]
async fn truncated_stream_still_finishes_message() {
    let body = "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"par\"}}]}\n\n";
    let replay = replay(Provider::OpenAi, body).await;
    replay.result.expect("replay");
    assert_eq!(
        replay.lines,
        vec![
            r#"f:{"messageId":"c1"}"#,
            r#"0:"par""#,
            r#"d:{"finishReason":"unknown","usage":{"promptTokens":null,"completionTokens":null}}"#,
        ]
    );
}

#[tokio::test]
async fn malformed_event_ends_stream_with_error() {
    let body = "data: {\"id\":\"c1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"}}]}\n\ndata: {not json\n\n";
    let replay = replay(Provider::OpenAi, body).await;
    let err = replay.result.expect_err("must fail");
    assert!(matches!(err, StreamError::MalformedEvent(_)));
    assert_eq!(replay.lines[0], r#"f:{"messageId":"c1"}"#);
    assert_eq!(replay.lines[1], r#"0:"hi""#);
    assert_eq!(
        replay.lines.last().map(String::as_str),
        Some(r#"d:{"finishReason":"error","usage":{"promptTokens":null,"completionTokens":null}}"#)
    );
}

const ANTHROPIC_OVERLOADED: &str = "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"m1\",\"role\":\"assistant\",\"usage\":{\"input_tokens\":3}}}\n\nevent: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n";

#[tokio::test]
async fn anthropic_error_event_reports_transport_failure() {
    let events = sse_event_stream(futures_util::stream::iter(chunked(ANTHROPIC_OVERLOADED)));
    let mut out: Vec<u8> = Vec::new();
    let err = pipe(adapt_sse(Provider::Anthropic, events), &mut out)
        .await
        .expect_err("must fail");
    assert!(err.is_transport());

    let text = String::from_utf8(out).expect("utf8");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], r#"f:{"messageId":"m1"}"#);
    assert!(lines[1].starts_with("3:"));
    assert!(lines[1].contains("Overloaded"));
    assert_eq!(
        lines[2],
        r#"d:{"finishReason":"error","usage":{"promptTokens":3,"completionTokens":null}}"#
    );
}

#[tokio::test]
async fn accumulator_rejects_error_part() {
    let replay = replay(Provider::Anthropic, ANTHROPIC_OVERLOADED).await;
    let err = replay.result.expect_err("must fail");
    assert!(matches!(err, StreamError::Accumulator(_)));
    assert_eq!(replay.lines, vec![r#"f:{"messageId":"m1"}"#]);
    assert_eq!(replay.accumulator.finish_reason(), FinishReason::Error);
}

#[test]
fn accumulated_messages_serialize_for_the_ui() {
    let message = Message::text(Role::User, "hi");
    let value = serde_json::to_value(&message).expect("json");
    assert_eq!(
        value,
        json!({"id": "", "content": "hi", "role": "user", "parts": [{"type": "text", "text": "hi"}]})
    );
}

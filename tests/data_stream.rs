use aisdk::error::AccumulatorError;
use aisdk::protocol::canonical::{Part, Role, ToolArgs, ToolCallResult, ToolInvocationState};
use aisdk::stream::{
    data_stream_headers, into_body_stream, parse_data_stream, DataStreamAccumulator,
    DataStreamPart, FinishReason, Usage,
};
use futures_util::StreamExt;
use serde_json::json;

fn accumulate(body: &str) -> DataStreamAccumulator {
    let mut acc = DataStreamAccumulator::new();
    for part in parse_data_stream(body).expect("parse") {
        acc.push(&part).expect("push");
    }
    acc
}

#[test]
fn text_stream_accumulates_into_one_message() {
    let body = r#"f:{"messageId":"msg_01E71z89cub9AaDBUreABi5E"}
0:"I'd be happy to"
0:" chat with you! Is there something specific you'd like"
0:" to talk about?"

d:{"finishReason":"stop","usage":{"promptTokens":10,"completionTokens":90}}
"#;
    let acc = accumulate(body);
    let text = "I'd be happy to chat with you! Is there something specific you'd like to talk about?";
    let messages = acc.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "msg_01E71z89cub9AaDBUreABi5E");
    assert_eq!(messages[0].role, Role::Assistant);
    assert_eq!(messages[0].content, text);
    assert_eq!(
        messages[0].parts,
        vec![
            Part::StepStart,
            Part::Text {
                text: text.to_string()
            }
        ]
    );
    assert_eq!(acc.finish_reason(), FinishReason::Stop);
    assert_eq!(acc.usage(), Usage::new(Some(10), Some(90)));
}

#[test]
fn tool_call_stream_accumulates_result() {
    let body = r#"f:{"messageId":"msg_01PcSiPgKmjGHDU6JNzw5BHP"}
b:{"toolCallId":"tool_123","toolName":"get_weather"}
c:{"toolCallId":"tool_123","argsTextDelta":"{\"location\":\""}
c:{"toolCallId":"tool_123","argsTextDelta":"San Francisco\"}"}
9:{"toolCallId":"tool_123","toolName":"get_weather","args":{"location":"San Francisco"}}
a:{"toolCallId":"tool_123","result":{"temperature":72,"unit":"F"}}
e:{"finishReason":"tool-calls","usage":{"promptTokens":null,"completionTokens":90},"isContinued":false}
d:{"finishReason":"tool-calls","usage":{"promptTokens":null,"completionTokens":90}}
"#;
    let acc = accumulate(body);
    let messages = acc.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].parts.len(), 2);
    let Part::ToolInvocation { tool_invocation } = &messages[0].parts[1] else {
        panic!("expected tool invocation");
    };
    assert_eq!(tool_invocation.state, ToolInvocationState::Result);
    assert_eq!(tool_invocation.tool_name, "get_weather");
    assert_eq!(
        tool_invocation.args,
        ToolArgs::Decoded(json!({"location": "San Francisco"}))
    );
    assert_eq!(
        tool_invocation.result,
        Some(ToolCallResult::from(json!({"temperature": 72, "unit": "F"})))
    );
    assert_eq!(acc.usage(), Usage::new(None, Some(90)));
}

#[test]
fn continued_step_keeps_one_message() {
    let body = r#"f:{"messageId":"m1"}
0:"first"
e:{"finishReason":"tool-calls","usage":{"promptTokens":null,"completionTokens":null},"isContinued":true}
f:{"messageId":"m2"}
0:"second"
e:{"finishReason":"stop","usage":{"promptTokens":null,"completionTokens":null},"isContinued":false}
d:{"finishReason":"stop","usage":{"promptTokens":null,"completionTokens":null}}
"#;
    let acc = accumulate(body);
    let messages = acc.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "m1");
    assert_eq!(messages[0].content, "firstsecond");
    assert_eq!(
        messages[0].parts,
        vec![
            Part::StepStart,
            Part::Text {
                text: "first".into()
            },
            Part::StepStart,
            Part::Text {
                text: "second".into()
            },
        ]
    );
}

#[test]
fn reasoning_parts_collect_details() {
    let body = r#"f:{"messageId":"m1"}
g:"Let me think"
g:" about it."
j:{"signature":"sig-1"}
i:{"data":"opaque"}
0:"Done."
d:{"finishReason":"stop","usage":{"promptTokens":null,"completionTokens":null}}
"#;
    let acc = accumulate(body);
    let message = &acc.messages()[0];
    assert_eq!(
        serde_json::to_value(&message.parts[1]).expect("json"),
        json!({
            "type": "reasoning",
            "reasoning": "Let me think about it.",
            "details": [
                {"type": "text", "text": "Let me think about it.", "signature": "sig-1"},
                {"type": "redacted", "data": "opaque"}
            ]
        })
    );
    assert_eq!(message.content, "Done.");
}

#[test]
fn error_part_is_rejected_by_accumulator() {
    let mut acc = DataStreamAccumulator::new();
    acc.push(&DataStreamPart::start_step("m1")).expect("push");
    let err = acc
        .push(&DataStreamPart::error("upstream reset"))
        .expect_err("must fail");
    assert_eq!(err, AccumulatorError::Stream("upstream reset".into()));
    assert_eq!(acc.finish_reason(), FinishReason::Error);
}

#[test]
fn delta_for_unknown_call_is_rejected() {
    let mut acc = DataStreamAccumulator::new();
    acc.push(&DataStreamPart::start_step("m1")).expect("push");
    let err = acc
        .push(&DataStreamPart::tool_call_delta("missing", "{}"))
        .expect_err("must fail");
    assert_eq!(err, AccumulatorError::UnknownToolCall("missing".into()));
}

#[test]
fn formatted_parts_parse_back() {
    let body = concat!(
        "0:\"hi\"\n",
        "2:[{\"step\":1}]\n",
        "8:[{\"id\":\"note\"}]\n",
        "k:{\"data\":\"AQID\",\"mimeType\":\"image/png\"}\n",
        "d:{\"finishReason\":\"length\",\"usage\":{\"promptTokens\":1,\"completionTokens\":2}}\n",
    );
    let parts = parse_data_stream(body).expect("parse");
    let formatted: String = parts
        .iter()
        .map(|part| part.format().expect("format"))
        .collect();
    assert_eq!(parse_data_stream(&formatted).expect("reparse"), parts);
    assert_eq!(parts[0].type_id(), b'0');
    assert_eq!(parts[4].type_id(), b'd');
}

#[test]
fn unknown_tag_is_an_error() {
    assert!(parse_data_stream("z:\"x\"\n").is_err());
    assert!(parse_data_stream("no separator\n").is_err());
}

#[test]
fn response_headers_announce_v1() {
    let headers = data_stream_headers();
    assert_eq!(headers["content-type"], "text/plain; charset=utf-8");
    assert_eq!(headers["x-vercel-ai-data-stream"], "v1");
}

#[tokio::test]
async fn body_stream_frames_one_line_per_chunk() {
    let parts = vec![
        Ok(DataStreamPart::start_step("m1")),
        Ok(DataStreamPart::text("hi")),
        Ok(DataStreamPart::finish_message(FinishReason::Stop, Usage::default())),
    ];
    let chunks: Vec<_> = into_body_stream(futures_util::stream::iter(parts))
        .map(|chunk| chunk.expect("chunk"))
        .collect()
        .await;
    let body: Vec<u8> = chunks.concat();
    assert_eq!(
        String::from_utf8(body).expect("utf8"),
        "f:{\"messageId\":\"m1\"}\n0:\"hi\"\nd:{\"finishReason\":\"stop\",\"usage\":{\"promptTokens\":null,\"completionTokens\":null}}\n"
    );
}

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures_util::Stream;
use pin_project_lite::pin_project;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::part::{DataStreamPart, FinishReason, SourcePart, Usage};
use crate::error::{AccumulatorError, StreamError};
use crate::protocol::canonical::{
    Message, Part, ReasoningDetail, Role, SourceInfo, ToolArgs, ToolInvocation,
    ToolInvocationState,
};

/// Folds a data stream back into canonical assistant messages.
///
/// One message is in progress at a time. It is flushed to the output list on
/// `finish-message`, or on `finish-step` when the step is not continued.
#[derive(Debug, Default)]
pub struct DataStreamAccumulator {
    messages: Vec<Message>,
    current: Option<Message>,
    /// Tool call id -> index of its part in `current.parts`.
    wip_tool_calls: FxHashMap<String, usize>,
    finish_reason: FinishReason,
    usage: Usage,
}

impl DataStreamAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed messages in the order they were flushed.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    #[must_use]
    pub fn finish_reason(&self) -> FinishReason {
        self.finish_reason
    }

    #[must_use]
    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// Apply one part.
    ///
    /// # Errors
    ///
    /// Returns [`AccumulatorError`] when the part references state that does
    /// not exist, or when the part is a stream `error`.
    pub fn push(&mut self, part: &DataStreamPart) -> Result<(), AccumulatorError> {
        match part {
            DataStreamPart::Text(text) => {
                let message = self.ensure_message();
                message.content.push_str(text);
                if let Some(Part::Text { text: last }) = message.parts.last_mut() {
                    last.push_str(text);
                } else {
                    message.parts.push(Part::Text { text: text.clone() });
                }
            }
            DataStreamPart::Reasoning(text) => {
                with_reasoning(self.ensure_message(), |reasoning, details| {
                    reasoning.push_str(text);
                    match details.last_mut() {
                        Some(ReasoningDetail::Text {
                            text: last,
                            signature: None,
                        }) => last.push_str(text),
                        _ => details.push(ReasoningDetail::Text {
                            text: text.clone(),
                            signature: None,
                        }),
                    }
                });
            }
            DataStreamPart::ReasoningSignature(sig) => {
                with_reasoning(self.ensure_message(), |_, details| match details.last_mut() {
                    Some(ReasoningDetail::Text { signature, .. }) => {
                        *signature = Some(sig.signature.clone());
                    }
                    _ => details.push(ReasoningDetail::Text {
                        text: String::new(),
                        signature: Some(sig.signature.clone()),
                    }),
                });
            }
            DataStreamPart::RedactedReasoning(redacted) => {
                with_reasoning(self.ensure_message(), |_, details| {
                    details.push(ReasoningDetail::Redacted {
                        data: redacted.data.clone(),
                    });
                });
            }
            DataStreamPart::Source(source) => {
                self.ensure_message().parts.push(Part::Source {
                    source: source_info(source),
                });
            }
            DataStreamPart::File(file) => {
                self.ensure_message().parts.push(Part::File {
                    mime_type: file.mime_type.clone(),
                    data: file.data.clone(),
                });
            }
            DataStreamPart::Data(values) | DataStreamPart::MessageAnnotations(values) => {
                self.ensure_message()
                    .annotations
                    .extend(values.iter().cloned());
            }
            DataStreamPart::StartStep(step) => {
                let message = self.ensure_message();
                if message.id.is_empty() {
                    message.id.clone_from(&step.message_id);
                }
                message.parts.push(Part::StepStart);
            }
            DataStreamPart::ToolCallStart(start) => {
                let message = self.ensure_message();
                message.parts.push(Part::ToolInvocation {
                    tool_invocation: ToolInvocation {
                        state: ToolInvocationState::PartialCall,
                        step: None,
                        tool_call_id: start.tool_call_id.clone(),
                        tool_name: start.tool_name.clone(),
                        args: ToolArgs::Partial(String::new()),
                        result: None,
                    },
                });
                let index = message.parts.len() - 1;
                self.wip_tool_calls
                    .insert(start.tool_call_id.clone(), index);
            }
            DataStreamPart::ToolCallDelta(delta) => {
                let message = self
                    .current
                    .as_mut()
                    .ok_or(AccumulatorError::InvalidState("tool-call-delta"))?;
                let Some(&index) = self.wip_tool_calls.get(&delta.tool_call_id) else {
                    return Err(if message.tool_invocation_mut(&delta.tool_call_id).is_some() {
                        AccumulatorError::TypeMismatch(delta.tool_call_id.clone())
                    } else {
                        AccumulatorError::UnknownToolCall(delta.tool_call_id.clone())
                    });
                };
                match message.parts.get_mut(index) {
                    Some(Part::ToolInvocation {
                        tool_invocation:
                            ToolInvocation {
                                args: ToolArgs::Partial(buffer),
                                ..
                            },
                    }) => buffer.push_str(&delta.args_text_delta),
                    _ => return Err(AccumulatorError::TypeMismatch(delta.tool_call_id.clone())),
                }
            }
            DataStreamPart::ToolCall(call) => {
                self.wip_tool_calls.remove(&call.tool_call_id);
                let message = self.ensure_message();
                let args = Value::Object(call.args.clone());
                if let Some(invocation) = message.tool_invocation_mut(&call.tool_call_id) {
                    invocation.tool_name.clone_from(&call.tool_name);
                    invocation.args = ToolArgs::Decoded(args);
                    if invocation.state < ToolInvocationState::Call {
                        invocation.state = ToolInvocationState::Call;
                    }
                } else {
                    message.parts.push(Part::ToolInvocation {
                        tool_invocation: ToolInvocation::call(
                            call.tool_call_id.clone(),
                            call.tool_name.clone(),
                            args,
                        ),
                    });
                }
            }
            DataStreamPart::ToolResult(result) => {
                let message = self
                    .current
                    .as_mut()
                    .ok_or(AccumulatorError::InvalidState("tool-result"))?;
                let invocation = message
                    .tool_invocation_mut(&result.tool_call_id)
                    .ok_or_else(|| AccumulatorError::UnknownToolCall(result.tool_call_id.clone()))?;
                invocation.state = ToolInvocationState::Result;
                invocation.result = Some(result.result.clone());
                self.wip_tool_calls.remove(&result.tool_call_id);
            }
            DataStreamPart::FinishStep(step) => {
                self.finish_reason = step.finish_reason;
                if self.current.is_some() {
                    self.promote_wip_tool_calls();
                    if !step.is_continued {
                        self.flush();
                    }
                }
            }
            DataStreamPart::FinishMessage(finish) => {
                self.promote_wip_tool_calls();
                self.flush();
                self.finish_reason = finish.finish_reason;
                self.usage = finish.usage;
            }
            DataStreamPart::Error(message) => {
                self.finish_reason = FinishReason::Error;
                return Err(AccumulatorError::Stream(message.clone()));
            }
        }
        Ok(())
    }

    fn ensure_message(&mut self) -> &mut Message {
        self.current
            .get_or_insert_with(|| Message::new(Role::Assistant))
    }

    /// Decode buffered argument text of calls that never saw a finalized `tool-call`.
    fn promote_wip_tool_calls(&mut self) {
        let Some(message) = self.current.as_mut() else {
            self.wip_tool_calls.clear();
            return;
        };
        let mut indices: Vec<usize> = self.wip_tool_calls.drain().map(|(_, i)| i).collect();
        indices.sort_unstable();
        for index in indices {
            let Some(Part::ToolInvocation { tool_invocation }) = message.parts.get_mut(index) else {
                continue;
            };
            let ToolArgs::Partial(text) = &tool_invocation.args else {
                continue;
            };
            if text.is_empty() {
                continue;
            }
            match serde_json::from_str::<Map<String, Value>>(text) {
                Ok(args) => {
                    tool_invocation.args = ToolArgs::Decoded(Value::Object(args));
                    tool_invocation.state = ToolInvocationState::Call;
                }
                Err(err) => warn!(
                    tool_call_id = %tool_invocation.tool_call_id,
                    error = %err,
                    "tool call args are not a JSON object; leaving call partial"
                ),
            }
        }
    }

    fn flush(&mut self) {
        self.wip_tool_calls.clear();
        if let Some(message) = self.current.take() {
            debug!(
                message_id = %message.id,
                parts = message.parts.len(),
                "accumulated message"
            );
            self.messages.push(message);
        }
    }
}

/// Run `f` on the message's single reasoning part, creating it when missing.
fn with_reasoning(message: &mut Message, f: impl FnOnce(&mut String, &mut Vec<ReasoningDetail>)) {
    for part in &mut message.parts {
        if let Part::Reasoning { reasoning, details } = part {
            f(reasoning, details);
            return;
        }
    }
    let mut reasoning = String::new();
    let mut details = Vec::new();
    f(&mut reasoning, &mut details);
    message.parts.push(Part::Reasoning { reasoning, details });
}

fn source_info(source: &SourcePart) -> SourceInfo {
    let mut metadata = Map::new();
    metadata.insert("id".into(), Value::String(source.id.clone()));
    metadata.insert("title".into(), Value::String(source.title.clone()));
    metadata.insert(
        "sourceType".into(),
        Value::String(source.source_type.clone()),
    );
    SourceInfo {
        uri: source.url.clone(),
        metadata,
        ..SourceInfo::default()
    }
}

pin_project! {
    /// Pushes every part into an accumulator before forwarding it.
    ///
    /// A part the accumulator rejects ends the stream with
    /// [`StreamError::Accumulator`] instead of being forwarded.
    pub struct WithAccumulator<'a, S> {
        #[pin]
        upstream: S,
        accumulator: &'a mut DataStreamAccumulator,
        done: bool,
    }
}

impl<'a, S> WithAccumulator<'a, S> {
    pub fn new(upstream: S, accumulator: &'a mut DataStreamAccumulator) -> Self {
        Self {
            upstream,
            accumulator,
            done: false,
        }
    }
}

impl<S> Stream for WithAccumulator<'_, S>
where
    S: Stream<Item = Result<DataStreamPart, StreamError>>,
{
    type Item = Result<DataStreamPart, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }
        let item = match ready!(this.upstream.poll_next(cx)) {
            Some(Ok(part)) => match this.accumulator.push(&part) {
                Ok(()) => Ok(part),
                Err(err) => Err(StreamError::Accumulator(err)),
            },
            Some(Err(err)) => Err(err),
            None => {
                *this.done = true;
                return Poll::Ready(None);
            }
        };
        if item.is_err() {
            *this.done = true;
        }
        Poll::Ready(Some(item))
    }
}

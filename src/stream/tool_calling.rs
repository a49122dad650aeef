use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures_util::Stream;
use pin_project_lite::pin_project;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Map, Value};
use smallvec::SmallVec;
use tracing::debug;

use super::part::DataStreamPart;
use crate::error::StreamError;
use crate::protocol::canonical::{ToolCall, ToolCallResult};

#[derive(Debug, Default)]
struct ArgsBuffer {
    tool_name: String,
    text: String,
}

/// Per-stream bookkeeping for tool calls assembled from deltas.
#[derive(Debug, Default)]
struct ToolCallTracker {
    buffers: FxHashMap<String, ArgsBuffer>,
    handled: FxHashSet<String>,
}

impl ToolCallTracker {
    /// Parts to emit after `part` has been forwarded, in order.
    fn observe<F>(&mut self, part: &DataStreamPart, handler: &mut F, out: &mut Vec<DataStreamPart>)
    where
        F: FnMut(ToolCall) -> ToolCallResult,
    {
        match part {
            DataStreamPart::ToolCallStart(start) => {
                if !self.handled.contains(&start.tool_call_id) {
                    self.buffers.insert(
                        start.tool_call_id.clone(),
                        ArgsBuffer {
                            tool_name: start.tool_name.clone(),
                            text: String::new(),
                        },
                    );
                }
            }
            DataStreamPart::ToolCallDelta(delta) => {
                if self.handled.contains(&delta.tool_call_id) {
                    return;
                }
                let buffer = self
                    .buffers
                    .entry(delta.tool_call_id.clone())
                    .or_default();
                buffer.text.push_str(&delta.args_text_delta);
                // An object can only be complete once the text ends with a brace.
                if !buffer.text.trim_end().ends_with('}') {
                    return;
                }
                let Ok(args) = serde_json::from_str::<Map<String, Value>>(&buffer.text) else {
                    return;
                };
                if let Some(buffer) = self.buffers.remove(&delta.tool_call_id) {
                    let id = delta.tool_call_id.clone();
                    out.push(DataStreamPart::tool_call(
                        id.clone(),
                        buffer.tool_name.clone(),
                        args.clone(),
                    ));
                    self.invoke(id, buffer.tool_name, args, handler, out);
                }
            }
            DataStreamPart::ToolCall(call) => {
                if self.handled.contains(&call.tool_call_id) {
                    return;
                }
                self.buffers.remove(&call.tool_call_id);
                self.invoke(
                    call.tool_call_id.clone(),
                    call.tool_name.clone(),
                    call.args.clone(),
                    handler,
                    out,
                );
            }
            DataStreamPart::FinishStep(_) => self.buffers.clear(),
            _ => {}
        }
    }

    fn invoke<F>(
        &mut self,
        id: String,
        name: String,
        args: Map<String, Value>,
        handler: &mut F,
        out: &mut Vec<DataStreamPart>,
    ) where
        F: FnMut(ToolCall) -> ToolCallResult,
    {
        debug!(tool_call_id = %id, tool_name = %name, "invoking tool handler");
        self.handled.insert(id.clone());
        let result = handler(ToolCall {
            id: id.clone(),
            name,
            args,
        });
        out.push(DataStreamPart::tool_result(id, result));
    }
}

pin_project! {
    /// Forwards every upstream part and answers completed tool calls with `handler`.
    ///
    /// For calls assembled from deltas, a finalized `tool-call` part is emitted
    /// before the `tool-result`. Each call id reaches the handler at most once.
    pub struct WithToolCalling<S, F> {
        #[pin]
        upstream: S,
        handler: F,
        tracker: ToolCallTracker,
        // Reversed so the next part is popped from the back.
        pending: SmallVec<[DataStreamPart; 4]>,
        scratch: Vec<DataStreamPart>,
        done: bool,
    }
}

impl<S, F> WithToolCalling<S, F> {
    pub fn new(upstream: S, handler: F) -> Self {
        Self {
            upstream,
            handler,
            tracker: ToolCallTracker::default(),
            pending: SmallVec::new(),
            scratch: Vec::new(),
            done: false,
        }
    }
}

impl<S, F> Stream for WithToolCalling<S, F>
where
    S: Stream<Item = Result<DataStreamPart, StreamError>>,
    F: FnMut(ToolCall) -> ToolCallResult,
{
    type Item = Result<DataStreamPart, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if let Some(part) = this.pending.pop() {
            return Poll::Ready(Some(Ok(part)));
        }
        if *this.done {
            return Poll::Ready(None);
        }
        match ready!(this.upstream.poll_next(cx)) {
            Some(Ok(part)) => {
                this.tracker.observe(&part, this.handler, this.scratch);
                this.pending.extend(this.scratch.drain(..).rev());
                Poll::Ready(Some(Ok(part)))
            }
            Some(Err(err)) => {
                *this.done = true;
                Poll::Ready(Some(Err(err)))
            }
            None => {
                *this.done = true;
                Poll::Ready(None)
            }
        }
    }
}

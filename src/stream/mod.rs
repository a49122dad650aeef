pub mod accumulator;
pub mod adapter;
pub mod part;
pub mod sse;
pub mod tool_calling;

pub use accumulator::{DataStreamAccumulator, WithAccumulator};
pub use adapter::{AdapterStream, StreamDecoder};
pub use part::{parse_data_stream, DataStreamPart, FinishReason, Usage};
pub use sse::{parse_sse_text, sse_event_stream, SseEvent, SseParser};
pub use tool_calling::WithToolCalling;

use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::StreamError;
use crate::protocol::canonical::{ToolCall, ToolCallResult};

/// Boxed stream of data stream parts, as produced by the provider adapters.
pub type DataStream = Pin<Box<dyn Stream<Item = Result<DataStreamPart, StreamError>> + Send>>;

pub const DATA_STREAM_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
pub const DATA_STREAM_HEADER: &str = "x-vercel-ai-data-stream";
pub const DATA_STREAM_VERSION: &str = "v1";

/// Combinators available on every part stream.
pub trait DataStreamExt: Stream<Item = Result<DataStreamPart, StreamError>> + Sized {
    /// Answer completed tool calls with `handler`. See [`WithToolCalling`].
    fn with_tool_calling<F>(self, handler: F) -> WithToolCalling<Self, F>
    where
        F: FnMut(ToolCall) -> ToolCallResult,
    {
        WithToolCalling::new(self, handler)
    }

    /// Feed every part into `accumulator` before forwarding it.
    fn with_accumulator(self, accumulator: &mut DataStreamAccumulator) -> WithAccumulator<'_, Self> {
        WithAccumulator::new(self, accumulator)
    }

    fn into_data_stream(self) -> DataStream
    where
        Self: Send + 'static,
    {
        Box::pin(self)
    }
}

impl<S> DataStreamExt for S where S: Stream<Item = Result<DataStreamPart, StreamError>> {}

/// Response headers announcing a v1 data stream.
#[must_use]
pub fn data_stream_headers() -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(2);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(DATA_STREAM_CONTENT_TYPE));
    headers.insert(
        HeaderName::from_static(DATA_STREAM_HEADER),
        HeaderValue::from_static(DATA_STREAM_VERSION),
    );
    headers
}

/// Write every part to `writer` as one line, flushing after each line.
///
/// Stops at the first stream, encode or write error and returns it. The
/// stream is dropped on return, so no further upstream polls happen.
///
/// # Errors
///
/// Returns the first [`StreamError`] yielded by the stream or raised by the writer.
pub async fn pipe<S, W>(stream: S, writer: &mut W) -> Result<(), StreamError>
where
    S: Stream<Item = Result<DataStreamPart, StreamError>>,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut stream = std::pin::pin!(stream);
    let mut line = String::with_capacity(256);
    while let Some(part) = stream.next().await {
        let part = part?;
        line.clear();
        part.format_into(&mut line)?;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Encode each part as a body chunk for an HTTP response.
pub fn into_body_stream<S>(stream: S) -> impl Stream<Item = Result<Bytes, StreamError>> + Send
where
    S: Stream<Item = Result<DataStreamPart, StreamError>> + Send,
{
    stream.map(|part| -> Result<Bytes, StreamError> {
        let line = part?.format()?;
        Ok(Bytes::from(line))
    })
}

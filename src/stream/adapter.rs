use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures_util::Stream;
use pin_project_lite::pin_project;
use smallvec::SmallVec;
use tracing::debug;

use super::part::{DataStreamPart, FinishReason, Usage};
use crate::error::StreamError;

/// Per-vendor state machine turning vendor events into data stream parts.
///
/// Decoders never perform I/O; [`AdapterStream`] drives them from an upstream stream.
pub trait StreamDecoder {
    type Event;

    /// Translate one vendor event, appending any parts it produces to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::MalformedEvent`] when the event cannot be placed
    /// in the current state, or [`StreamError::Transport`] for in-band vendor errors.
    fn decode(&mut self, event: Self::Event, out: &mut Vec<DataStreamPart>) -> Result<(), StreamError>;

    /// Upstream ended without error. Emit whatever terminal parts are still owed.
    fn finish(&mut self, out: &mut Vec<DataStreamPart>);

    /// Reason recorded so far, used for the terminal part after a failure.
    fn finish_reason(&self) -> FinishReason;

    fn usage(&self) -> Usage;
}

#[derive(Debug)]
enum Phase {
    Running,
    Failing(StreamError),
    Done,
}

pin_project! {
    /// Drives a [`StreamDecoder`] from an upstream stream of vendor events.
    ///
    /// Failures are turned into a well-formed tail: an `error` part for
    /// transport failures, then `finish-message` if none was sent, then the error.
    pub struct AdapterStream<S, D> {
        #[pin]
        upstream: S,
        decoder: D,
        // Reversed so the next part is popped from the back.
        pending: SmallVec<[DataStreamPart; 8]>,
        scratch: Vec<DataStreamPart>,
        phase: Phase,
        finish_sent: bool,
    }
}

impl<S, D> AdapterStream<S, D> {
    pub fn new(upstream: S, decoder: D) -> Self {
        Self {
            upstream,
            decoder,
            pending: SmallVec::new(),
            scratch: Vec::with_capacity(8),
            phase: Phase::Running,
            finish_sent: false,
        }
    }
}

fn enqueue(
    scratch: &mut Vec<DataStreamPart>,
    pending: &mut SmallVec<[DataStreamPart; 8]>,
    finish_sent: &mut bool,
) {
    if scratch
        .iter()
        .any(|part| matches!(part, DataStreamPart::FinishMessage(_)))
    {
        *finish_sent = true;
    }
    pending.extend(scratch.drain(..).rev());
}

fn failure_tail<D: StreamDecoder>(
    decoder: &D,
    err: &StreamError,
    finish_sent: bool,
    out: &mut Vec<DataStreamPart>,
) {
    if err.is_transport() {
        let message = match err {
            StreamError::Transport(message) => message.clone(),
            other => other.to_string(),
        };
        out.push(DataStreamPart::Error(message));
    }
    if !finish_sent {
        let reason = match decoder.finish_reason() {
            FinishReason::Unknown => FinishReason::Error,
            recorded => recorded,
        };
        out.push(DataStreamPart::finish_message(reason, decoder.usage()));
    }
}

impl<S, D, E> Stream for AdapterStream<S, D>
where
    S: Stream<Item = Result<D::Event, E>>,
    D: StreamDecoder,
    E: Into<StreamError>,
{
    type Item = Result<DataStreamPart, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if let Some(part) = this.pending.pop() {
                return Poll::Ready(Some(Ok(part)));
            }
            match std::mem::replace(this.phase, Phase::Done) {
                Phase::Done => return Poll::Ready(None),
                Phase::Failing(err) => return Poll::Ready(Some(Err(err))),
                Phase::Running => *this.phase = Phase::Running,
            }

            let next = ready!(this.upstream.as_mut().poll_next(cx));
            match next {
                Some(Ok(event)) => {
                    if let Err(err) = this.decoder.decode(event, this.scratch) {
                        debug!(error = %err, "vendor stream decode failed");
                        failure_tail(this.decoder, &err, *this.finish_sent, this.scratch);
                        *this.phase = Phase::Failing(err);
                    }
                }
                Some(Err(err)) => {
                    let err = err.into();
                    debug!(error = %err, "vendor stream failed");
                    failure_tail(this.decoder, &err, *this.finish_sent, this.scratch);
                    *this.phase = Phase::Failing(err);
                }
                None => {
                    if !*this.finish_sent {
                        this.decoder.finish(this.scratch);
                    }
                    *this.phase = Phase::Done;
                }
            }
            enqueue(this.scratch, this.pending, this.finish_sent);
        }
    }
}
